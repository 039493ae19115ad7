//! Durable run progress
//!
//! `RunProgress` is the crash-recovery cursor: a step appears in
//! `completed` only after its external effect has observably succeeded,
//! together with the outputs later steps need (transaction id, document
//! id, the fetched record). A resumed run skips completed steps and reuses
//! those outputs instead of re-invoking the activity.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clients::{ChargeOutcome, DocumentOutcome};
use crate::model::ApplicationRecord;

/// Progress file format version.
pub const PROGRESS_VERSION: u32 = 1;

/// Unique identifier of one pipeline run. Persisted in the checkpoint so
/// the payment idempotency key stays stable across crash and resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The pipeline's steps, in execution order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    MarkProcessing,
    FetchApplication,
    SendStartEmail,
    ChargePayment,
    GenerateDocuments,
    SendApprovalEmail,
    MarkCompleted,
}

impl StepId {
    /// Fixed pipeline order.
    pub const PIPELINE: [StepId; 7] = [
        StepId::MarkProcessing,
        StepId::FetchApplication,
        StepId::SendStartEmail,
        StepId::ChargePayment,
        StepId::GenerateDocuments,
        StepId::SendApprovalEmail,
        StepId::MarkCompleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StepId::MarkProcessing => "mark_processing",
            StepId::FetchApplication => "fetch_application",
            StepId::SendStartEmail => "send_start_email",
            StepId::ChargePayment => "charge_payment",
            StepId::GenerateDocuments => "generate_documents",
            StepId::SendApprovalEmail => "send_approval_email",
            StepId::MarkCompleted => "mark_completed",
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed step: when it finished, how many attempts it took, and the
/// typed output later steps consume, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub completed_at: DateTime<Utc>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<ApplicationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charge: Option<ChargeOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentOutcome>,
}

impl StepRecord {
    pub fn new(attempts: u32) -> Self {
        Self {
            completed_at: Utc::now(),
            attempts,
            application: None,
            charge: None,
            document: None,
        }
    }

    pub fn with_application(attempts: u32, application: ApplicationRecord) -> Self {
        Self {
            application: Some(application),
            ..Self::new(attempts)
        }
    }

    pub fn with_charge(attempts: u32, charge: ChargeOutcome) -> Self {
        Self {
            charge: Some(charge),
            ..Self::new(attempts)
        }
    }

    pub fn with_document(attempts: u32, document: DocumentOutcome) -> Self {
        Self {
            document: Some(document),
            ..Self::new(attempts)
        }
    }
}

/// Durable checkpoint for one run, keyed by application id. Created when
/// the run starts, rewritten after every committed step, deleted when the
/// run reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    pub application_id: String,
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Committed steps with their outputs. Keys serialize as step names.
    #[serde(default)]
    pub completed: BTreeMap<StepId, StepRecord>,
    /// Attempt counts, including steps that ultimately failed.
    #[serde(default)]
    pub attempts: BTreeMap<StepId, u32>,
    pub version: u32,
}

impl RunProgress {
    pub fn new(application_id: impl Into<String>, run_id: RunId) -> Self {
        let now = Utc::now();
        Self {
            application_id: application_id.into(),
            run_id,
            started_at: now,
            updated_at: now,
            completed: BTreeMap::new(),
            attempts: BTreeMap::new(),
            version: PROGRESS_VERSION,
        }
    }

    pub fn is_complete(&self, step: StepId) -> bool {
        self.completed.contains_key(&step)
    }

    /// First pipeline step without a committed record.
    pub fn first_incomplete(&self) -> Option<StepId> {
        StepId::PIPELINE
            .into_iter()
            .find(|step| !self.is_complete(*step))
    }

    pub fn record_step(&mut self, step: StepId, record: StepRecord) {
        self.attempts.insert(step, record.attempts);
        self.completed.insert(step, record);
        self.updated_at = Utc::now();
    }

    pub fn record_attempts(&mut self, step: StepId, attempts: u32) {
        self.attempts.insert(step, attempts);
        self.updated_at = Utc::now();
    }

    pub fn fetched_application(&self) -> Option<&ApplicationRecord> {
        self.completed
            .get(&StepId::FetchApplication)
            .and_then(|record| record.application.as_ref())
    }

    pub fn charge_outcome(&self) -> Option<&ChargeOutcome> {
        self.completed
            .get(&StepId::ChargePayment)
            .and_then(|record| record.charge.as_ref())
    }

    pub fn document_outcome(&self) -> Option<&DocumentOutcome> {
        self.completed
            .get(&StepId::GenerateDocuments)
            .and_then(|record| record.document.as_ref())
    }

    /// Deterministic idempotency key for this run's charge request. Stable
    /// across resume (the run id is persisted), unique across runs.
    pub fn idempotency_key(&self) -> String {
        format!("appsaga:{}:{}:charge", self.application_id, self.run_id)
    }
}

/// Persistence for run progress. One entry per in-flight run, keyed by
/// application id.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn save(&self, progress: &RunProgress) -> Result<()>;
    async fn load(&self, application_id: &str) -> Result<Option<RunProgress>>;
    async fn delete(&self, application_id: &str) -> Result<()>;
    /// All persisted entries, for the startup recovery scan.
    async fn list(&self) -> Result<Vec<RunProgress>>;
}

/// JSON-file-backed progress store: one `<application_id>.progress.json`
/// per run, written atomically via temp file and rename.
pub struct JsonProgressStore {
    root: PathBuf,
}

impl JsonProgressStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, application_id: &str) -> PathBuf {
        self.root.join(format!("{application_id}.progress.json"))
    }
}

#[async_trait]
impl ProgressStore for JsonProgressStore {
    async fn save(&self, progress: &RunProgress) -> Result<()> {
        let path = self.path_for(&progress.application_id);
        let temp = path.with_extension("tmp");

        fs::create_dir_all(&self.root)
            .await
            .context("failed to create progress directory")?;

        let json = serde_json::to_string_pretty(progress)?;
        fs::write(&temp, json)
            .await
            .context("failed to write progress temp file")?;
        fs::rename(&temp, &path)
            .await
            .context("failed to move progress file into place")?;

        debug!(
            application_id = %progress.application_id,
            completed = progress.completed.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    async fn load(&self, application_id: &str) -> Result<Option<RunProgress>> {
        let path = self.path_for(application_id);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .context("failed to read progress file")?;
        let progress: RunProgress =
            serde_json::from_str(&content).context("failed to parse progress file")?;

        if progress.version > PROGRESS_VERSION {
            return Err(anyhow!(
                "progress file version {} is newer than supported version {}",
                progress.version,
                PROGRESS_VERSION
            ));
        }
        Ok(Some(progress))
    }

    async fn delete(&self, application_id: &str) -> Result<()> {
        let path = self.path_for(application_id);
        if path.exists() {
            fs::remove_file(&path)
                .await
                .context("failed to delete progress file")?;
            info!(application_id, "checkpoint deleted");
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RunProgress>> {
        let mut entries = Vec::new();
        if !self.root.exists() {
            return Ok(entries);
        }

        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(application_id) = name.strip_suffix(".progress.json") else {
                continue;
            };
            if let Some(progress) = self.load(application_id).await? {
                entries.push(progress);
            }
        }
        Ok(entries)
    }
}

/// In-memory progress store for tests.
#[derive(Default)]
pub struct MemoryProgressStore {
    entries: RwLock<HashMap<String, RunProgress>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn save(&self, progress: &RunProgress) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(progress.application_id.clone(), progress.clone());
        Ok(())
    }

    async fn load(&self, application_id: &str) -> Result<Option<RunProgress>> {
        Ok(self.entries.read().await.get(application_id).cloned())
    }

    async fn delete(&self, application_id: &str) -> Result<()> {
        self.entries.write().await.remove(application_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RunProgress>> {
        Ok(self.entries.read().await.values().cloned().collect())
    }
}
