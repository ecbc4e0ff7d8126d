//! Roles in the organization and how each one hands work down

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Position of an agent in the organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    President,
    Secretary,
    Director,
    Manager,
    Engineer,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::President,
        Role::Secretary,
        Role::Director,
        Role::Manager,
        Role::Engineer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::President => "president",
            Role::Secretary => "secretary",
            Role::Director => "director",
            Role::Manager => "manager",
            Role::Engineer => "engineer",
        }
    }

    /// Plural used in user-facing messages ("No engineers available")
    pub fn plural(&self) -> &'static str {
        match self {
            Role::President => "presidents",
            Role::Secretary => "secretaries",
            Role::Director => "directors",
            Role::Manager => "managers",
            Role::Engineer => "engineers",
        }
    }

    /// Short prefix for generated agent ids
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Role::President => "pres",
            Role::Secretary => "sec",
            Role::Director => "dir",
            Role::Manager => "mgr",
            Role::Engineer => "eng",
        }
    }

    /// The role that normally reports to this one
    pub fn subordinate_role(&self) -> Option<Role> {
        match self {
            Role::President => Some(Role::Secretary),
            Role::Secretary => Some(Role::Director),
            Role::Director => Some(Role::Manager),
            Role::Manager => Some(Role::Engineer),
            Role::Engineer => None,
        }
    }

    pub fn default_policy(&self) -> DelegationPolicy {
        match self {
            Role::President => DelegationPolicy::RoundRobin,
            Role::Secretary => DelegationPolicy::MemoryInformed { related_tasks: 5 },
            Role::Director => DelegationPolicy::FanOut,
            Role::Manager => DelegationPolicy::MemoryInformed { related_tasks: 5 },
            Role::Engineer => DelegationPolicy::None,
        }
    }

    pub fn default_system_prompt(&self) -> &'static str {
        match self {
            Role::President => {
                "You are the President of a software company. Set direction and decide which part of the organization should own each request."
            }
            Role::Secretary => {
                "You are the Secretary to the President. Triage incoming work, summarize it clearly and route it to the right director."
            }
            Role::Director => {
                "You are a Director. Break initiatives into workstreams that your managers can run in parallel."
            }
            Role::Manager => {
                "You are an engineering Manager. Turn a workstream into a concrete, well-scoped assignment for one engineer."
            }
            Role::Engineer => {
                "You are a software Engineer. Produce a concrete technical answer or implementation plan for the assignment."
            }
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let title = match self {
            Role::President => "President",
            Role::Secretary => "Secretary",
            Role::Director => "Director",
            Role::Manager => "Manager",
            Role::Engineer => "Engineer",
        };
        f.write_str(title)
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "president" => Ok(Role::President),
            "secretary" => Ok(Role::Secretary),
            "director" => Ok(Role::Director),
            "manager" => Ok(Role::Manager),
            "engineer" => Ok(Role::Engineer),
            other => Err(Error::config(format!("Unknown role: {}", other))),
        }
    }
}

/// How an agent chooses where its work goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DelegationPolicy {
    /// Handle every task locally
    None,
    /// Rotate through subordinates via the shared cursor
    RoundRobin,
    /// Round-robin, overridden by subordinates that succeeded on related
    /// past tasks
    MemoryInformed { related_tasks: usize },
    /// Dispatch to every subordinate concurrently and return once dispatched
    FanOut,
}

/// What the parent waits for when it delegates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationContract {
    /// No delegation; the agent answers itself
    Terminal,
    /// One subordinate, awaited in line; its failure fails the parent
    SynchronousSingle,
    /// All subordinates, each on its own task; failures only reach logs and
    /// the notifier
    FireAndForgetFanOut,
}

impl DelegationPolicy {
    pub fn contract(&self) -> DelegationContract {
        match self {
            DelegationPolicy::None => DelegationContract::Terminal,
            DelegationPolicy::RoundRobin | DelegationPolicy::MemoryInformed { .. } => {
                DelegationContract::SynchronousSingle
            }
            DelegationPolicy::FanOut => DelegationContract::FireAndForgetFanOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
        assert!("intern".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_contracts() {
        assert_eq!(
            Role::President.default_policy().contract(),
            DelegationContract::SynchronousSingle
        );
        assert_eq!(
            Role::Secretary.default_policy().contract(),
            DelegationContract::SynchronousSingle
        );
        assert_eq!(
            Role::Director.default_policy().contract(),
            DelegationContract::FireAndForgetFanOut
        );
        assert_eq!(
            Role::Manager.default_policy().contract(),
            DelegationContract::SynchronousSingle
        );
        assert_eq!(
            Role::Engineer.default_policy().contract(),
            DelegationContract::Terminal
        );
    }

    #[test]
    fn test_policy_serde() {
        let json = serde_json::to_string(&DelegationPolicy::MemoryInformed { related_tasks: 3 }).unwrap();
        assert_eq!(json, r#"{"kind":"memory_informed","related_tasks":3}"#);
        let parsed: DelegationPolicy = serde_json::from_str(r#"{"kind":"fan_out"}"#).unwrap();
        assert_eq!(parsed, DelegationPolicy::FanOut);
    }

    #[test]
    fn test_subordinate_chain_ends_at_engineer() {
        let mut role = Role::President;
        let mut depth = 0;
        while let Some(next) = role.subordinate_role() {
            role = next;
            depth += 1;
        }
        assert_eq!(role, Role::Engineer);
        assert_eq!(depth, 4);
    }
}
