//! Error taxonomy for the saga core
//!
//! Two layers of errors exist: [`ActivityError`] classifies a single step
//! activity's outcome (and decides whether a retry makes sense), while
//! [`SagaError`] is what the registry and executor surface to their caller.

use thiserror::Error;

use crate::model::ApplicationStatus;

/// Failure of a single step activity invocation.
///
/// The classification drives the retry policy: only `Transient` failures are
/// retried. Everything else reflects a decision the remote system (or the
/// store) has already made, and repeating the call cannot change it.
#[derive(Error, Debug)]
pub enum ActivityError {
    /// Transport-level failure (timeout, connection refused). Eligible for
    /// retry with backoff.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The collaborator completed its round trip and declined the operation.
    #[error("{0}")]
    Business(String),

    /// The referenced application does not exist.
    #[error("application not found: {0}")]
    NotFound(String),

    /// The application store could not serve the request.
    #[error("store unavailable: {0}")]
    Store(String),

    /// The run's cancellation token fired while waiting to retry.
    #[error("cancelled")]
    Cancelled,
}

impl ActivityError {
    /// Whether the retry policy may re-attempt the activity.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActivityError::Transient(_))
    }
}

/// Errors surfaced by the run registry and saga executor.
#[derive(Error, Debug)]
pub enum SagaError {
    #[error("application not found: {application_id}")]
    NotFound { application_id: String },

    #[error("application {application_id} already has an active run")]
    AlreadyRunning { application_id: String },

    #[error("application {application_id} is already {status}")]
    AlreadyTerminal {
        application_id: String,
        status: ApplicationStatus,
    },

    /// The application store failed underneath the run. The record may be
    /// left without a clean terminal status; an operator has to reconcile.
    #[error("application store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// The pipeline aborted and the application was marked failed.
    #[error("run for {application_id} failed: {reason}")]
    RunFailed {
        application_id: String,
        reason: String,
    },
}

/// Errors from the application store adapter.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("application not found: {0}")]
    NotFound(String),

    #[error("duplicate application id: {0}")]
    Duplicate(String),

    #[error("invalid status transition {from} -> {to} for {application_id}")]
    InvalidTransition {
        application_id: String,
        from: ApplicationStatus,
        to: ApplicationStatus,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for ActivityError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ActivityError::NotFound(id),
            StoreError::Unavailable(msg) => ActivityError::Store(msg),
            other => ActivityError::Store(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(ActivityError::Transient("timeout".into()).is_retryable());
        assert!(!ActivityError::Business("declined".into()).is_retryable());
        assert!(!ActivityError::NotFound("app-1".into()).is_retryable());
        assert!(!ActivityError::Store("down".into()).is_retryable());
        assert!(!ActivityError::Cancelled.is_retryable());
    }

    #[test]
    fn store_errors_map_to_activity_errors() {
        let err: ActivityError = StoreError::NotFound("app-1".into()).into();
        assert!(matches!(err, ActivityError::NotFound(_)));

        let err: ActivityError = StoreError::Unavailable("connection reset".into()).into();
        assert!(matches!(err, ActivityError::Store(_)));
    }
}
