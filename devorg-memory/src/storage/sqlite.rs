//! SQLite storage: the authoritative record of every memory

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use crate::error::{Error, Result};
use crate::memory::{MemoryEntry, MemoryQuery};

const SELECT_COLUMNS: &str = r#"
    SELECT id, agent_id, memory_type, content, metadata, tags, embedding,
           created_at, updated_at, expires_at
    FROM memories
"#;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Mutex<Option<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) the database file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| Error::storage("memory database is closed"))?;
        f(conn)
    }

    /// Insert a new memory. Fails if the id is already taken.
    pub fn insert(&self, entry: &MemoryEntry) -> Result<()> {
        let expires_at = entry
            .expires_at
            .ok_or_else(|| Error::invalid_input("memory has no expiration"))?;

        self.with_conn(|conn| {
            let result = conn.execute(
                r#"
                INSERT INTO memories (
                    id, agent_id, memory_type, content, metadata, tags, embedding,
                    created_at, updated_at, expires_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    entry.id,
                    entry.agent_id,
                    entry.memory_type.as_str(),
                    entry.content,
                    serde_json::to_string(&entry.metadata)?,
                    serde_json::to_string(&entry.tags)?,
                    entry.embedding.as_deref().map(encode_embedding),
                    format_timestamp(entry.created_at),
                    format_timestamp(entry.updated_at),
                    format_timestamp(expires_at),
                ],
            );

            match result {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                    Err(Error::invalid_input(format!("Memory {} already exists", entry.id)))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Get a memory by ID
    pub fn get(&self, id: &str) -> Result<Option<MemoryEntry>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE id = ?1", SELECT_COLUMNS);
            let row = conn
                .query_row(&sql, params![id], MemoryRow::from_row)
                .optional()?;
            row.map(MemoryRow::into_entry).transpose()
        })
    }

    /// List memories matching `query`, newest first
    pub fn query(&self, query: &MemoryQuery, default_limit: usize) -> Result<Vec<MemoryEntry>> {
        self.with_conn(|conn| {
            let mut sql = format!("{} WHERE 1=1", SELECT_COLUMNS);
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(agent_id) = &query.agent_id {
                sql.push_str(" AND agent_id = ?");
                params_vec.push(Box::new(agent_id.clone()));
            }

            if let Some(memory_type) = query.memory_type {
                sql.push_str(" AND memory_type = ?");
                params_vec.push(Box::new(memory_type.as_str().to_string()));
            }

            if let Some(text) = query.content.as_deref().filter(|t| !t.is_empty()) {
                sql.push_str(r" AND content LIKE ? ESCAPE '\'");
                params_vec.push(Box::new(format!("%{}%", escape_like(text))));
            }

            for tag in &query.tags {
                sql.push_str(r" AND tags LIKE ? ESCAPE '\'");
                let quoted = serde_json::to_string(tag)?;
                params_vec.push(Box::new(format!("%{}%", escape_like(&quoted))));
            }

            if let Some(start) = query.start_time {
                sql.push_str(" AND created_at >= ?");
                params_vec.push(Box::new(format_timestamp(start)));
            }

            if let Some(end) = query.end_time {
                sql.push_str(" AND created_at <= ?");
                params_vec.push(Box::new(format_timestamp(end)));
            }

            let limit = if query.limit == 0 { default_limit } else { query.limit };
            sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?");
            params_vec.push(Box::new(limit as i64));
            params_vec.push(Box::new(query.offset as i64));

            let mut stmt = conn.prepare(&sql)?;
            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|p| p.as_ref()).collect();
            let rows = stmt.query_map(params_refs.as_slice(), MemoryRow::from_row)?;

            let mut entries = Vec::new();
            for row in rows {
                entries.push(row?.into_entry()?);
            }
            Ok(entries)
        })
    }

    /// Replace every stored field of an existing memory
    pub fn update(&self, entry: &MemoryEntry) -> Result<()> {
        let expires_at = entry
            .expires_at
            .ok_or_else(|| Error::invalid_input("memory has no expiration"))?;

        self.with_conn(|conn| {
            let changed = conn.execute(
                r#"
                UPDATE memories SET
                    agent_id = ?2, memory_type = ?3, content = ?4, metadata = ?5,
                    tags = ?6, embedding = ?7, created_at = ?8, updated_at = ?9,
                    expires_at = ?10
                WHERE id = ?1
                "#,
                params![
                    entry.id,
                    entry.agent_id,
                    entry.memory_type.as_str(),
                    entry.content,
                    serde_json::to_string(&entry.metadata)?,
                    serde_json::to_string(&entry.tags)?,
                    entry.embedding.as_deref().map(encode_embedding),
                    format_timestamp(entry.created_at),
                    format_timestamp(entry.updated_at),
                    format_timestamp(expires_at),
                ],
            )?;
            if changed == 0 {
                return Err(Error::not_found(format!("memory {}", entry.id)));
            }
            Ok(())
        })
    }

    /// Delete a memory
    pub fn delete(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
            if changed == 0 {
                return Err(Error::not_found(format!("memory {}", id)));
            }
            Ok(())
        })
    }

    /// IDs of memories that expired at or before `now`
    pub fn expired_ids(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM memories WHERE expires_at <= ?1")?;
            let rows = stmt.query_map(params![format_timestamp(now)], |row| row.get(0))?;
            rows.collect::<std::result::Result<Vec<String>, _>>()
                .map_err(Error::from)
        })
    }

    /// Delete every memory that expired at or before `now`
    pub fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM memories WHERE expires_at <= ?1",
                params![format_timestamp(now)],
            )?;
            Ok(removed)
        })
    }

    /// Count memories, optionally for one agent
    pub fn count(&self, agent_id: Option<&str>) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = match agent_id {
                Some(aid) => conn.query_row(
                    "SELECT COUNT(*) FROM memories WHERE agent_id = ?1",
                    params![aid],
                    |row| row.get(0),
                )?,
                None => conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?,
            };
            Ok(count as usize)
        })
    }

    /// Close the connection. Later calls fail with a storage error.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        match guard.take() {
            Some(conn) => conn.close().map_err(|(_, e)| Error::from(e)),
            None => Ok(()),
        }
    }
}

/// Fixed-width UTC timestamps so text comparison matches time order
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::storage(format!("bad timestamp {:?}: {}", s, e)))
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::storage("embedding blob is not a whole number of f32s"));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Intermediate struct for reading from SQLite
struct MemoryRow {
    id: String,
    agent_id: String,
    memory_type: String,
    content: String,
    metadata: String,
    tags: String,
    embedding: Option<Vec<u8>>,
    created_at: String,
    updated_at: String,
    expires_at: String,
}

impl MemoryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            agent_id: row.get(1)?,
            memory_type: row.get(2)?,
            content: row.get(3)?,
            metadata: row.get(4)?,
            tags: row.get(5)?,
            embedding: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            expires_at: row.get(9)?,
        })
    }

    fn into_entry(self) -> Result<MemoryEntry> {
        Ok(MemoryEntry {
            memory_type: self.memory_type.parse()?,
            id: self.id,
            agent_id: self.agent_id,
            content: self.content,
            metadata: serde_json::from_str(&self.metadata)?,
            tags: serde_json::from_str(&self.tags)?,
            embedding: self.embedding.as_deref().map(decode_embedding).transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            expires_at: Some(parse_timestamp(&self.expires_at)?),
            score: None,
        })
    }
}
