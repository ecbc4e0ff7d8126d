//! Configuration for devorg-org

use std::collections::HashSet;
use std::path::Path;

use devorg_memory::MemoryConfig;
use serde::{Deserialize, Serialize};

use crate::collaborators::GenerationOptions;
use crate::error::{Error, Result};
use crate::role::{DelegationPolicy, Role};

/// Environment variable naming the JSON config file
pub const CONFIG_ENV: &str = "DEVORG_CONFIG";

/// One layer of the hierarchy: every agent sharing a role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub role: Role,

    pub count: usize,

    /// Role whose agents this layer is attached to (a cross-edge, not a
    /// reporting line)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attach_to: Option<Role>,

    /// Overrides the role's default delegation policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<DelegationPolicy>,

    /// Overrides the role's default system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

impl LayerConfig {
    pub fn new(role: Role, count: usize) -> Self {
        Self {
            role,
            count,
            attach_to: None,
            policy: None,
            system_prompt: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }

    pub fn attach_to(mut self, role: Role) -> Self {
        self.attach_to = Some(role);
        self
    }

    pub fn with_policy(mut self, policy: DelegationPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn policy(&self) -> DelegationPolicy {
        self.policy.unwrap_or_else(|| self.role.default_policy())
    }

    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            system_prompt: self
                .system_prompt
                .clone()
                .unwrap_or_else(|| self.role.default_system_prompt().to_string()),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Ordered role layers, root first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyConfig {
    pub layers: Vec<LayerConfig>,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            layers: vec![
                LayerConfig::new(Role::President, 1),
                LayerConfig::new(Role::Secretary, 1),
                LayerConfig::new(Role::Director, 3),
                LayerConfig::new(Role::Manager, 6),
                LayerConfig::new(Role::Engineer, 12),
            ],
        }
    }
}

impl HierarchyConfig {
    pub fn new(layers: Vec<LayerConfig>) -> Self {
        Self { layers }
    }

    pub fn layer(&self, role: Role) -> Option<&LayerConfig> {
        self.layers.iter().find(|l| l.role == role)
    }

    /// Reject hierarchies that cannot be built into a rooted tree
    pub fn validate(&self) -> Result<()> {
        let Some(first) = self.layers.first() else {
            return Err(Error::config("Hierarchy has no layers"));
        };
        if first.count != 1 {
            return Err(Error::config(format!(
                "Root layer {} must have exactly one agent, found {}",
                first.role, first.count
            )));
        }

        let mut seen = HashSet::new();
        for layer in &self.layers {
            if !seen.insert(layer.role) {
                return Err(Error::config(format!("Duplicate layer for role {}", layer.role)));
            }
        }

        for pair in self.layers.windows(2) {
            let (parent, child) = (&pair[0], &pair[1]);
            if child.count > 0 && parent.count == 0 {
                return Err(Error::config(format!(
                    "Layer {} has {} agents but no {} to report to",
                    child.role,
                    child.count,
                    parent.role.plural()
                )));
            }
        }

        for layer in &self.layers {
            let Some(target) = layer.attach_to else {
                continue;
            };
            let registered = self.layer(target).map(|l| l.count).unwrap_or(0);
            if registered == 0 {
                return Err(Error::config(format!(
                    "Layer {} is attached to {}, which has no registered agents",
                    layer.role,
                    target.plural()
                )));
            }
        }

        Ok(())
    }
}

/// Top-level configuration read by the server binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrgConfig {
    pub hierarchy: HierarchyConfig,

    pub memory: MemoryConfig,

    /// Disable to run the organization without persistence
    pub memory_enabled: bool,

    /// HTTP server port
    pub server_port: u16,

    /// Deadline applied to each submitted task
    pub task_timeout_secs: Option<u64>,
}

impl Default for OrgConfig {
    fn default() -> Self {
        Self {
            hierarchy: HierarchyConfig::default(),
            memory: MemoryConfig::default(),
            memory_enabled: true,
            server_port: 8430,
            task_timeout_secs: Some(300),
        }
    }
}

impl OrgConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: OrgConfig = serde_json::from_str(&raw)?;
        config.hierarchy.validate()?;
        Ok(config)
    }

    /// Load from the file named by `DEVORG_CONFIG`, or use defaults
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn task_timeout(&self) -> Option<std::time::Duration> {
        self.task_timeout_secs.map(std::time::Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_hierarchy_is_valid() {
        let hierarchy = HierarchyConfig::default();
        hierarchy.validate().unwrap();

        let counts: Vec<_> = hierarchy.layers.iter().map(|l| (l.role, l.count)).collect();
        assert_eq!(
            counts,
            vec![
                (Role::President, 1),
                (Role::Secretary, 1),
                (Role::Director, 3),
                (Role::Manager, 6),
                (Role::Engineer, 12),
            ]
        );
    }

    #[test]
    fn test_validation_errors() {
        assert!(HierarchyConfig::new(vec![]).validate().is_err());

        let duplicate = HierarchyConfig::new(vec![
            LayerConfig::new(Role::President, 1),
            LayerConfig::new(Role::Manager, 1),
            LayerConfig::new(Role::Manager, 2),
        ]);
        assert!(matches!(duplicate.validate(), Err(Error::Config(_))));

        let orphaned = HierarchyConfig::new(vec![
            LayerConfig::new(Role::President, 1),
            LayerConfig::new(Role::Director, 0),
            LayerConfig::new(Role::Manager, 2),
        ]);
        let err = orphaned.validate().unwrap_err();
        assert!(err.to_string().contains("no directors"));

        let dangling = HierarchyConfig::new(vec![
            LayerConfig::new(Role::President, 1),
            LayerConfig::new(Role::Secretary, 1).attach_to(Role::Director),
        ]);
        let err = dangling.validate().unwrap_err();
        assert!(err.to_string().contains("no registered agents"));
    }

    #[test]
    fn test_layer_overrides() {
        let layer: LayerConfig = serde_json::from_str(
            r#"{"role":"manager","count":2,"policy":{"kind":"round_robin"},"system_prompt":"Be brief."}"#,
        )
        .unwrap();

        assert_eq!(layer.policy(), DelegationPolicy::RoundRobin);
        assert_eq!(layer.generation_options().system_prompt, "Be brief.");
        assert_eq!(layer.max_tokens, 1024);
        assert_eq!(
            LayerConfig::new(Role::Manager, 1).policy(),
            DelegationPolicy::MemoryInformed { related_tasks: 5 }
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("org.json");
        std::fs::write(
            &path,
            r#"{
                "hierarchy": {"layers": [
                    {"role": "president", "count": 1},
                    {"role": "engineer", "count": 4}
                ]},
                "memory_enabled": false,
                "server_port": 9000
            }"#,
        )
        .unwrap();

        let config = OrgConfig::load(&path).unwrap();
        assert_eq!(config.server_port, 9000);
        assert!(!config.memory_enabled);
        assert_eq!(config.hierarchy.layers.len(), 2);
        assert_eq!(config.task_timeout_secs, Some(300));
    }
}
