//! Persistence adapters for policy rules and grouping relations.
//!
//! An adapter stores one row per rule or relation and can be reloaded in
//! full. Every call is durable by the time it returns.

mod file;
mod postgres;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::models::RuleLine;
use crate::error::Result;

pub use file::FileAdapter;
pub use postgres::PostgresAdapter;

/// Trait for rule store backends.
#[async_trait]
pub trait PolicyAdapter: Send + Sync {
    /// Backend name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Read every persisted row.
    async fn load_lines(&self) -> Result<Vec<RuleLine>>;

    /// Persist one row. Adding a row that already exists is a no-op.
    async fn append_line(&self, line: &RuleLine) -> Result<()>;

    /// Delete one row. Deleting a missing row is a no-op.
    async fn remove_line(&self, line: &RuleLine) -> Result<()>;

    /// Delete `remove` and insert `add` as a single durable operation.
    async fn replace_lines(&self, remove: &[RuleLine], add: &[RuleLine]) -> Result<()>;
}

/// In-memory adapter for testing and development.
#[derive(Debug, Default, Clone)]
pub struct MemoryAdapter {
    lines: Arc<RwLock<Vec<RuleLine>>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with pre-seeded rows.
    pub fn with_lines(lines: impl IntoIterator<Item = RuleLine>) -> Self {
        let mut unique = Vec::new();
        for line in lines {
            if !unique.contains(&line) {
                unique.push(line);
            }
        }
        Self {
            lines: Arc::new(RwLock::new(unique)),
        }
    }

    /// Number of persisted rows.
    pub async fn len(&self) -> usize {
        self.lines.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.lines.read().await.is_empty()
    }
}

#[async_trait]
impl PolicyAdapter for MemoryAdapter {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load_lines(&self) -> Result<Vec<RuleLine>> {
        Ok(self.lines.read().await.clone())
    }

    async fn append_line(&self, line: &RuleLine) -> Result<()> {
        let mut lines = self.lines.write().await;
        if !lines.contains(line) {
            lines.push(line.clone());
        }
        Ok(())
    }

    async fn remove_line(&self, line: &RuleLine) -> Result<()> {
        self.lines.write().await.retain(|l| l != line);
        Ok(())
    }

    async fn replace_lines(&self, remove: &[RuleLine], add: &[RuleLine]) -> Result<()> {
        let mut lines = self.lines.write().await;
        lines.retain(|l| !remove.contains(l));
        for line in add {
            if !lines.contains(line) {
                lines.push(line.clone());
            }
        }
        Ok(())
    }
}
