//! Application store adapter
//!
//! The store is an external collaborator: the core consumes this narrow
//! contract and never touches application records any other way. The
//! in-memory implementation backs the demo binary and the test suite.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StoreError;
use crate::model::{ApplicationRecord, ApplicationStatus};

/// Narrow contract over the application record store.
///
/// `set_status` is the only mutation the core performs after creation; it
/// must enforce the status state machine and refresh `updated_at`.
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn get(&self, application_id: &str) -> Result<Option<ApplicationRecord>, StoreError>;

    async fn create(&self, record: ApplicationRecord) -> Result<ApplicationRecord, StoreError>;

    async fn set_status(
        &self,
        application_id: &str,
        status: ApplicationStatus,
    ) -> Result<(), StoreError>;
}

/// In-memory application store.
///
/// Writes are atomic per record, which is all the contract requires.
/// `set_unavailable` lets tests simulate a store outage.
#[derive(Default)]
pub struct MemoryApplicationStore {
    records: RwLock<HashMap<String, ApplicationRecord>>,
    unavailable: AtomicBool,
}

impl MemoryApplicationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("simulated store outage".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ApplicationStore for MemoryApplicationStore {
    async fn get(&self, application_id: &str) -> Result<Option<ApplicationRecord>, StoreError> {
        self.check_available()?;
        Ok(self.records.read().await.get(application_id).cloned())
    }

    async fn create(&self, record: ApplicationRecord) -> Result<ApplicationRecord, StoreError> {
        self.check_available()?;
        let mut records = self.records.write().await;
        if records.contains_key(&record.application_id) {
            return Err(StoreError::Duplicate(record.application_id.clone()));
        }
        records.insert(record.application_id.clone(), record.clone());
        Ok(record)
    }

    async fn set_status(
        &self,
        application_id: &str,
        status: ApplicationStatus,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut records = self.records.write().await;
        let record = records
            .get_mut(application_id)
            .ok_or_else(|| StoreError::NotFound(application_id.to_string()))?;

        // A resumed run may re-issue a status write it already committed.
        if record.status == status {
            return Ok(());
        }
        if !record.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                application_id: application_id.to_string(),
                from: record.status,
                to: status,
            });
        }

        debug!(application_id, from = %record.status, to = %status, "status transition");
        record.status = status;
        record.updated_at = Utc::now();
        Ok(())
    }
}
