//! Durable step scheduler.
//!
//! [`DurableScheduler::run_step`] gives "exactly-once step execution,
//! at-least-once step invocation": an action may be invoked several times
//! (retries, or a crash before its outcome was journaled), but once an
//! outcome is journaled every later call for the same `(run_id, step)`
//! returns it without invoking the action again.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info_span, warn, Instrument};

use super::journal::{StepJournal, StepRecord};
use super::retry::StepOptions;
use crate::error::{Result, WardenError};
use crate::observability::metrics;

/// A step body. Receives the 1-based attempt number.
pub type StepFn = Box<dyn Fn(u32) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync>;

/// Runs idempotency-keyed steps with retries and a journal.
#[async_trait]
pub trait DurableScheduler: Send + Sync {
    /// Run `action` as step `step` of run `run_id` under `options`.
    async fn run_step(
        &self,
        run_id: &str,
        step: &str,
        options: &StepOptions,
        action: StepFn,
    ) -> Result<serde_json::Value>;
}

/// Typed wrapper over [`DurableScheduler::run_step`]: outputs are journaled
/// as JSON and decoded on the way out.
pub async fn run_typed_step<T, F, Fut>(
    scheduler: &dyn DurableScheduler,
    run_id: &str,
    step: &str,
    options: &StepOptions,
    action: F,
) -> Result<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: Fn(u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let action: StepFn = Box::new(move |attempt| -> BoxFuture<'static, Result<serde_json::Value>> {
        let fut = action(attempt);
        Box::pin(async move {
            let output = fut.await?;
            Ok(serde_json::to_value(output)?)
        })
    });
    let value = scheduler.run_step(run_id, step, options, action).await?;
    Ok(serde_json::from_value(value)?)
}

/// The standard scheduler: retries in-process and journals outcomes.
#[derive(Clone)]
pub struct JournaledScheduler {
    journal: Arc<dyn StepJournal>,
}

impl JournaledScheduler {
    pub fn new(journal: Arc<dyn StepJournal>) -> Self {
        Self { journal }
    }

    pub fn journal(&self) -> &Arc<dyn StepJournal> {
        &self.journal
    }

    async fn attempt_loop(
        &self,
        run_id: &str,
        step: &str,
        options: &StepOptions,
        action: &StepFn,
    ) -> Result<serde_json::Value> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            metrics::record_step_attempt(step);

            let result = match tokio::time::timeout(options.start_to_close, action(attempt)).await {
                Ok(result) => result,
                Err(elapsed) => Err(WardenError::from(elapsed)
                    .with_context("step", step)
                    .with_context("attempt", attempt)),
            };

            match result {
                Ok(output) => {
                    self.journal
                        .record_step(run_id, &StepRecord::completed(step, output.clone(), attempt))
                        .await?;
                    metrics::record_step_duration(step, started.elapsed().as_secs_f64());
                    debug!(attempt, "Step completed");
                    return Ok(output);
                }
                Err(e) if e.is_retryable() && options.retry.allows_attempt(attempt + 1) => {
                    let delay = options.retry.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Step attempt failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.journal
                        .record_step(run_id, &StepRecord::failed(step, &e, attempt))
                        .await?;
                    metrics::record_step_duration(step, started.elapsed().as_secs_f64());
                    if e.is_retryable() {
                        warn!(attempt, error = %e, "Step failed after exhausting retries");
                    } else {
                        debug!(attempt, error = %e, "Step failed terminally");
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl DurableScheduler for JournaledScheduler {
    async fn run_step(
        &self,
        run_id: &str,
        step: &str,
        options: &StepOptions,
        action: StepFn,
    ) -> Result<serde_json::Value> {
        let span = info_span!("saga_step", run_id = %run_id, step = %step);
        async {
            if let Some(record) = self.journal.get_step(run_id, step).await? {
                debug!(attempts = record.attempts, "Replaying journaled step outcome");
                return record.replay();
            }
            self.attempt_loop(run_id, step, options, &action).await
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::saga::journal::InMemoryJournal;
    use crate::saga::retry::RetryPolicy;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast(attempts: u32) -> StepOptions {
        StepOptions::new(
            Duration::from_millis(200),
            RetryPolicy::with_attempts(attempts).initial_interval(Duration::from_millis(1)),
        )
    }

    fn scheduler() -> JournaledScheduler {
        JournaledScheduler::new(Arc::new(InMemoryJournal::new()))
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let s = scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let out: String = run_typed_step(&s, "r1", "lookup", &fast(3), move |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(WardenError::store_unavailable("flaky"))
                } else {
                    Ok("u2".to_string())
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(out, "u2");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_business_failure_is_not_retried() {
        let s = scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = run_typed_step::<bool, _, _>(&s, "r1", "grant", &fast(5), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(WardenError::already_invited("u2", "org42")) }
        })
        .await
        .unwrap_err();

        assert_eq!(err.code(), ErrorCode::AlreadyInvited);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_journaled_outcome_is_replayed() {
        let s = scheduler();
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let counter = calls.clone();
            let out: u32 = run_typed_step(&s, "r1", "count", &fast(1), move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok(n) }
            })
            .await
            .unwrap();
            assert_eq!(out, 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_retryable_attempt() {
        let s = scheduler();
        let options = StepOptions::new(
            Duration::from_millis(20),
            RetryPolicy::with_attempts(2).initial_interval(Duration::from_millis(1)),
        );

        let err = run_typed_step::<(), _, _>(&s, "r1", "slow", &options, |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();

        assert_eq!(err.code(), ErrorCode::StepTimeout);
        let record = s.journal().get_step("r1", "slow").await.unwrap().unwrap();
        assert_eq!(record.attempts, 2);
        assert!(!record.is_completed());
    }
}
