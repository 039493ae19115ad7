//! Run registry
//!
//! The only shared mutable state in the core: a map from application id to
//! the currently executing run. It guarantees at most one active run per
//! application, validates submissions against the store, and reconstructs
//! in-flight runs from persisted checkpoints after a restart.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SagaConfig;
use crate::error::SagaError;
use crate::model::ApplicationStatus;
use crate::saga::activities::Activities;
use crate::saga::executor::SagaExecutor;
use crate::saga::progress::{ProgressStore, RunId};
use crate::store::ApplicationStore;

/// An accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub run_id: RunId,
}

/// Status snapshot read through from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStatus {
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

struct RunHandle {
    run_id: RunId,
    cancel: CancellationToken,
}

/// Tracks in-flight runs and enforces single-flight per application id.
pub struct RunRegistry {
    store: Arc<dyn ApplicationStore>,
    activities: Arc<Activities>,
    progress: Arc<dyn ProgressStore>,
    config: SagaConfig,
    active: Mutex<HashMap<String, RunHandle>>,
}

impl RunRegistry {
    pub fn new(
        store: Arc<dyn ApplicationStore>,
        activities: Arc<Activities>,
        progress: Arc<dyn ProgressStore>,
        config: SagaConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            activities,
            progress,
            config,
            active: Mutex::new(HashMap::new()),
        })
    }

    /// Accept an application for processing and spawn its run.
    ///
    /// Rejects when the application is unknown, already terminal, or
    /// already has an active run. Concurrent submissions for the same id
    /// yield exactly one acceptance: the check and the slot insertion
    /// happen under one lock.
    pub async fn submit_for_processing(
        self: &Arc<Self>,
        application_id: &str,
    ) -> Result<Submission, SagaError> {
        let record = self
            .store
            .get(application_id)
            .await
            .map_err(|err| SagaError::StoreUnavailable {
                message: err.to_string(),
            })?
            .ok_or_else(|| SagaError::NotFound {
                application_id: application_id.to_string(),
            })?;

        if record.status.is_terminal() {
            return Err(SagaError::AlreadyTerminal {
                application_id: application_id.to_string(),
                status: record.status,
            });
        }

        // A checkpoint left behind by a crashed run keeps its run id, so a
        // resubmission resumes that run rather than starting a second one.
        let run_id = self
            .progress
            .load(application_id)
            .await
            .map_err(|err| SagaError::StoreUnavailable {
                message: err.to_string(),
            })?
            .map(|progress| progress.run_id)
            .unwrap_or_default();

        let cancel = CancellationToken::new();
        {
            let mut active = self.active.lock().await;
            if active.contains_key(application_id) {
                return Err(SagaError::AlreadyRunning {
                    application_id: application_id.to_string(),
                });
            }
            active.insert(
                application_id.to_string(),
                RunHandle {
                    run_id,
                    cancel: cancel.clone(),
                },
            );
        }

        self.spawn_run(application_id.to_string(), run_id, cancel);
        Ok(Submission { run_id })
    }

    /// Status snapshot for polling callers. Reads through to the store; no
    /// registry state is consulted.
    pub async fn get_run_status(&self, application_id: &str) -> Result<RunStatus, SagaError> {
        let record = self
            .store
            .get(application_id)
            .await
            .map_err(|err| SagaError::StoreUnavailable {
                message: err.to_string(),
            })?
            .ok_or_else(|| SagaError::NotFound {
                application_id: application_id.to_string(),
            })?;
        Ok(RunStatus {
            status: record.status,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    /// Request cancellation of an active run. Returns false if no run is
    /// active for this id. The run stops before its next step; an in-flight
    /// activity call is left to finish or time out.
    pub async fn cancel(&self, application_id: &str) -> bool {
        let active = self.active.lock().await;
        match active.get(application_id) {
            Some(handle) => {
                info!(application_id, run_id = %handle.run_id, "cancellation requested");
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a run is currently executing for this application.
    pub async fn is_active(&self, application_id: &str) -> bool {
        self.active.lock().await.contains_key(application_id)
    }

    /// Startup recovery: scan persisted checkpoints and resume every run
    /// whose application is not yet terminal. Checkpoints for terminal
    /// applications are stale and get deleted. Returns the number of runs
    /// resumed.
    pub async fn recover(self: &Arc<Self>) -> Result<usize> {
        let entries = self
            .progress
            .list()
            .await
            .context("failed to scan persisted run progress")?;

        let mut resumed = 0;
        for progress in entries {
            let application_id = progress.application_id.clone();
            let record = self
                .store
                .get(&application_id)
                .await
                .with_context(|| format!("failed to read application {application_id}"))?;

            let Some(record) = record else {
                warn!(application_id, "checkpoint references unknown application, skipping");
                continue;
            };
            if record.status.is_terminal() {
                info!(application_id, status = %record.status, "deleting stale checkpoint");
                if let Err(err) = self.progress.delete(&application_id).await {
                    warn!(application_id, error = %err, "could not delete stale checkpoint");
                }
                continue;
            }

            let cancel = CancellationToken::new();
            {
                let mut active = self.active.lock().await;
                if active.contains_key(&application_id) {
                    continue;
                }
                active.insert(
                    application_id.clone(),
                    RunHandle {
                        run_id: progress.run_id,
                        cancel: cancel.clone(),
                    },
                );
            }

            info!(application_id, run_id = %progress.run_id, "resuming recovered run");
            self.spawn_run(application_id, progress.run_id, cancel);
            resumed += 1;
        }
        Ok(resumed)
    }

    fn spawn_run(self: &Arc<Self>, application_id: String, run_id: RunId, cancel: CancellationToken) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let executor = SagaExecutor::new(
                Arc::clone(&registry.activities),
                Arc::clone(&registry.progress),
                registry.config.retry.clone(),
                cancel,
            );
            match executor.run(&application_id, run_id).await {
                Ok(run_id) => {
                    info!(application_id = %application_id, %run_id, "run completed");
                }
                Err(err) => {
                    warn!(application_id = %application_id, %run_id, error = %err, "run ended in failure");
                }
            }
            registry.active.lock().await.remove(&application_id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{RecordingEmailSender, ScriptedDocumentGenerator, ScriptedGateway};
    use crate::model::{ApplicationRecord, Profile, RequestDetails, RequestType};
    use crate::saga::progress::MemoryProgressStore;
    use crate::saga::retry::RetryConfig;
    use crate::store::MemoryApplicationStore;
    use std::time::Duration;

    fn fast_config() -> SagaConfig {
        SagaConfig {
            retry: RetryConfig {
                attempts: 3,
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                ..RetryConfig::default()
            },
            activity_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(5),
        }
    }

    fn registry() -> (Arc<RunRegistry>, Arc<MemoryApplicationStore>) {
        let store = Arc::new(MemoryApplicationStore::new());
        let config = fast_config();
        let activities = Arc::new(Activities::new(
            store.clone(),
            Arc::new(ScriptedGateway::new()),
            Arc::new(ScriptedDocumentGenerator::new()),
            Arc::new(RecordingEmailSender::new()),
            config.activity_timeout,
        ));
        let registry = RunRegistry::new(
            store.clone(),
            activities,
            Arc::new(MemoryProgressStore::new()),
            config,
        );
        (registry, store)
    }

    fn record(id: &str) -> ApplicationRecord {
        ApplicationRecord::new(
            id,
            Profile {
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                email: "ada@example.com".into(),
            },
            RequestDetails {
                kind: RequestType::Loan,
                amount: 50_000,
                required_documents: vec![],
            },
        )
    }

    #[tokio::test]
    async fn unknown_application_is_rejected() {
        let (registry, _store) = registry();
        let err = registry.submit_for_processing("app-404").await.unwrap_err();
        assert!(matches!(err, SagaError::NotFound { .. }));
    }

    #[tokio::test]
    async fn terminal_application_is_rejected() {
        let (registry, store) = registry();
        let mut terminal = record("app-1");
        terminal.status = ApplicationStatus::Completed;
        store.create(terminal).await.unwrap();

        let err = registry.submit_for_processing("app-1").await.unwrap_err();
        assert!(matches!(
            err,
            SagaError::AlreadyTerminal {
                status: ApplicationStatus::Completed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn status_read_through_reports_store_state() {
        let (registry, store) = registry();
        let created = store.create(record("app-1")).await.unwrap();
        let status = registry.get_run_status("app-1").await.unwrap();
        assert_eq!(status.status, ApplicationStatus::Pending);
        assert_eq!(status.created_at, created.created_at);

        let err = registry.get_run_status("app-404").await.unwrap_err();
        assert!(matches!(err, SagaError::NotFound { .. }));
    }

    #[tokio::test]
    async fn cancel_without_active_run_is_noop() {
        let (registry, _store) = registry();
        assert!(!registry.cancel("app-1").await);
    }
}
