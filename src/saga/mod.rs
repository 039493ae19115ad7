//! The saga core: retry policy, step activities, durable progress, the
//! pipeline executor, and the run registry.

pub mod activities;
pub mod executor;
pub mod progress;
pub mod registry;
pub mod retry;

pub use activities::Activities;
pub use executor::SagaExecutor;
pub use progress::{
    JsonProgressStore, MemoryProgressStore, ProgressStore, RunId, RunProgress, StepId, StepRecord,
};
pub use registry::{RunRegistry, RunStatus, Submission};
pub use retry::{retry_activity, Attempted, RetryConfig};
