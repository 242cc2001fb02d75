//! Durable saga execution: retry policies, the step journal and the scheduler.

pub mod journal;
pub mod retry;
pub mod scheduler;

pub use journal::{InMemoryJournal, RedisJournal, StepJournal, StepOutcome, StepRecord};
pub use retry::{RetryPolicy, StepOptions};
pub use scheduler::{run_typed_step, DurableScheduler, JournaledScheduler, StepFn};
