//! Durable log of saga runs and step outcomes.
//!
//! The journal is what makes step execution exactly-once: a step whose
//! outcome has been recorded is never invoked again for the same run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{ErrorCode, Result, WardenError};

// ═══════════════════════════════════════════════════════════════════════════════
// Step records
// ═══════════════════════════════════════════════════════════════════════════════

/// Recorded outcome of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Completed { output: serde_json::Value },
    Failed { code: ErrorCode, message: String },
}

/// One journaled step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: String,
    #[serde(flatten)]
    pub outcome: StepOutcome,
    /// Attempts used, including the one that produced the outcome
    pub attempts: u32,
    pub finished_at: DateTime<Utc>,
}

impl StepRecord {
    pub fn completed(step: impl Into<String>, output: serde_json::Value, attempts: u32) -> Self {
        Self {
            step: step.into(),
            outcome: StepOutcome::Completed { output },
            attempts,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(step: impl Into<String>, error: &WardenError, attempts: u32) -> Self {
        Self {
            step: step.into(),
            outcome: StepOutcome::Failed {
                code: error.code(),
                message: error.user_message().to_string(),
            },
            attempts,
            finished_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, StepOutcome::Completed { .. })
    }

    /// Turn the record back into the step's result.
    pub fn replay(&self) -> Result<serde_json::Value> {
        match &self.outcome {
            StepOutcome::Completed { output } => Ok(output.clone()),
            StepOutcome::Failed { code, message } => Err(WardenError::new(*code, message.clone())
                .with_context("step", &self.step)
                .with_context("replayed", true)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Journal trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Trait for journal backends.
///
/// Run documents are opaque JSON owned by the workflow that writes them.
#[async_trait]
pub trait StepJournal: Send + Sync {
    /// Store `document` under `run_id` unless a run already exists.
    /// Returns the existing document when there is one.
    async fn create_run(
        &self,
        run_id: &str,
        document: &serde_json::Value,
    ) -> Result<Option<serde_json::Value>>;

    /// Overwrite the run document.
    async fn put_run(&self, run_id: &str, document: &serde_json::Value) -> Result<()>;

    async fn get_run(&self, run_id: &str) -> Result<Option<serde_json::Value>>;

    /// Record a step outcome. The first record for a step wins.
    async fn record_step(&self, run_id: &str, record: &StepRecord) -> Result<()>;

    async fn get_step(&self, run_id: &str, step: &str) -> Result<Option<StepRecord>>;

    /// All recorded steps of a run, oldest first.
    async fn steps(&self, run_id: &str) -> Result<Vec<StepRecord>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-memory journal
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory journal for testing and single-process use.
#[derive(Debug, Default, Clone)]
pub struct InMemoryJournal {
    runs: Arc<RwLock<HashMap<String, serde_json::Value>>>,
    steps: Arc<RwLock<HashMap<String, Vec<StepRecord>>>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StepJournal for InMemoryJournal {
    async fn create_run(
        &self,
        run_id: &str,
        document: &serde_json::Value,
    ) -> Result<Option<serde_json::Value>> {
        let mut runs = self.runs.write().await;
        if let Some(existing) = runs.get(run_id) {
            return Ok(Some(existing.clone()));
        }
        runs.insert(run_id.to_string(), document.clone());
        Ok(None)
    }

    async fn put_run(&self, run_id: &str, document: &serde_json::Value) -> Result<()> {
        self.runs
            .write()
            .await
            .insert(run_id.to_string(), document.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.runs.read().await.get(run_id).cloned())
    }

    async fn record_step(&self, run_id: &str, record: &StepRecord) -> Result<()> {
        let mut steps = self.steps.write().await;
        let entries = steps.entry(run_id.to_string()).or_default();
        if !entries.iter().any(|r| r.step == record.step) {
            entries.push(record.clone());
        }
        Ok(())
    }

    async fn get_step(&self, run_id: &str, step: &str) -> Result<Option<StepRecord>> {
        Ok(self
            .steps
            .read()
            .await
            .get(run_id)
            .and_then(|entries| entries.iter().find(|r| r.step == step).cloned()))
    }

    async fn steps(&self, run_id: &str) -> Result<Vec<StepRecord>> {
        Ok(self
            .steps
            .read()
            .await
            .get(run_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Redis journal
// ═══════════════════════════════════════════════════════════════════════════════

/// Redis-backed journal.
///
/// Keys: `{prefix}:run:{run_id}` holds the run document;
/// `{prefix}:run:{run_id}:steps` is a hash of step name to record, and
/// `{prefix}:run:{run_id}:order` lists step names in completion order.
pub struct RedisJournal {
    client: redis::Client,
    key_prefix: String,
}

impl RedisJournal {
    /// Create a new Redis journal.
    ///
    /// # Arguments
    /// * `client` - A Redis client
    /// * `key_prefix` - Namespace for every key (e.g. `"warden:saga"`)
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    /// Open a client for `url` and check that the server answers.
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let journal = Self::new(client, key_prefix);
        let mut conn = journal.get_conn().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(journal)
    }

    async fn get_conn(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                WardenError::journal_unavailable(format!("failed to get Redis connection: {e}"))
                    .with_source(e)
            })
    }

    fn run_key(&self, run_id: &str) -> String {
        format!("{}:run:{}", self.key_prefix, run_id)
    }

    fn steps_key(&self, run_id: &str) -> String {
        format!("{}:run:{}:steps", self.key_prefix, run_id)
    }

    fn order_key(&self, run_id: &str) -> String {
        format!("{}:run:{}:order", self.key_prefix, run_id)
    }
}

#[async_trait]
impl StepJournal for RedisJournal {
    async fn create_run(
        &self,
        run_id: &str,
        document: &serde_json::Value,
    ) -> Result<Option<serde_json::Value>> {
        let serialized = serde_json::to_string(document)?;

        let mut conn = self.get_conn().await?;
        let created: Option<String> = redis::cmd("SET")
            .arg(self.run_key(run_id))
            .arg(&serialized)
            .arg("NX")
            .query_async(&mut conn)
            .await?;

        if created.is_some() {
            tracing::debug!(run_id = %run_id, "Run created");
            return Ok(None);
        }
        self.get_run(run_id).await
    }

    async fn put_run(&self, run_id: &str, document: &serde_json::Value) -> Result<()> {
        let serialized = serde_json::to_string(document)?;
        let mut conn = self.get_conn().await?;
        redis::cmd("SET")
            .arg(self.run_key(run_id))
            .arg(&serialized)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<serde_json::Value>> {
        let mut conn = self.get_conn().await?;
        let value: Option<String> = redis::cmd("GET")
            .arg(self.run_key(run_id))
            .query_async(&mut conn)
            .await?;
        value
            .map(|v| serde_json::from_str(&v).map_err(WardenError::from))
            .transpose()
    }

    async fn record_step(&self, run_id: &str, record: &StepRecord) -> Result<()> {
        let serialized = serde_json::to_string(record)?;
        let mut conn = self.get_conn().await?;
        let inserted: bool = redis::cmd("HSETNX")
            .arg(self.steps_key(run_id))
            .arg(&record.step)
            .arg(&serialized)
            .query_async(&mut conn)
            .await?;
        if inserted {
            redis::cmd("RPUSH")
                .arg(self.order_key(run_id))
                .arg(&record.step)
                .query_async::<_, i64>(&mut conn)
                .await?;
        }
        tracing::debug!(run_id = %run_id, step = %record.step, inserted, "Step recorded");
        Ok(())
    }

    async fn get_step(&self, run_id: &str, step: &str) -> Result<Option<StepRecord>> {
        let mut conn = self.get_conn().await?;
        let value: Option<String> = redis::cmd("HGET")
            .arg(self.steps_key(run_id))
            .arg(step)
            .query_async(&mut conn)
            .await?;
        value
            .map(|v| serde_json::from_str(&v).map_err(WardenError::from))
            .transpose()
    }

    async fn steps(&self, run_id: &str) -> Result<Vec<StepRecord>> {
        let mut conn = self.get_conn().await?;
        let order: Vec<String> = redis::cmd("LRANGE")
            .arg(self.order_key(run_id))
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;
        if order.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(self.steps_key(run_id))
            .arg(&order)
            .query_async(&mut conn)
            .await?;
        values
            .into_iter()
            .flatten()
            .map(|v| serde_json::from_str(&v).map_err(WardenError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_run_keeps_first_document() {
        let journal = InMemoryJournal::new();
        let first = serde_json::json!({"n": 1});
        assert!(journal.create_run("r1", &first).await.unwrap().is_none());

        let existing = journal
            .create_run("r1", &serde_json::json!({"n": 2}))
            .await
            .unwrap();
        assert_eq!(existing, Some(first));
    }

    #[tokio::test]
    async fn test_first_step_record_wins() {
        let journal = InMemoryJournal::new();
        journal
            .record_step("r1", &StepRecord::completed("a", serde_json::json!("u2"), 1))
            .await
            .unwrap();
        journal
            .record_step("r1", &StepRecord::completed("a", serde_json::json!("u3"), 2))
            .await
            .unwrap();

        let step = journal.get_step("r1", "a").await.unwrap().unwrap();
        assert_eq!(step.replay().unwrap(), serde_json::json!("u2"));
        assert_eq!(journal.steps("r1").await.unwrap().len(), 1);
    }

    #[test]
    fn test_failed_record_replays_error_code() {
        let record = StepRecord::failed("check_self_invite", &WardenError::self_invite(), 1);
        let err = record.replay().unwrap_err();
        assert_eq!(err.code(), ErrorCode::SelfInvite);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["code"], "SELF_INVITE");
    }
}
