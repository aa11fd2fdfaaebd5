use std::path::Path;

use anyhow::{Context, Result};
use dashmap::DashMap;
use tracing::warn;

use crate::print::models::Connection;

/// key: connection-registry -> hot per-tenant configuration map
///
/// Monitors read their connection from here on every heartbeat, so edits
/// (disable, reconfigure) take effect at the next loop boundary without
/// locking the whole map.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading connection registry {}", path.display()))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let entries: Vec<Connection> =
            serde_json::from_str(raw).context("parsing connection registry")?;
        let registry = Self::new();
        for connection in entries {
            registry.upsert(connection);
        }
        Ok(registry)
    }

    /// Connection ids appear as a segment of the encoded job name, so they
    /// must be non-empty and dot-free.
    pub fn upsert(&self, connection: Connection) {
        if connection.id.is_empty() || connection.id.contains('.') {
            warn!(id = %connection.id, "connection id must be non-empty and dot-free; entry skipped");
            return;
        }
        self.connections.insert(connection.id.clone(), connection);
    }

    pub fn remove(&self, id: &str) -> Option<Connection> {
        self.connections.remove(id).map(|(_, connection)| connection)
    }

    pub fn get(&self, id: &str) -> Option<Connection> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    pub fn snapshot(&self) -> Vec<Connection> {
        let mut all: Vec<Connection> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}
