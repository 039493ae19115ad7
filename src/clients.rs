//! External service clients
//!
//! Trait seams for the three remote collaborators (payment gateway,
//! document generator, email sender) plus two families of in-repo
//! implementations: simulated clients with configurable latency and
//! success rate, mirroring the mock services the system integrates with,
//! and scripted doubles for deterministic tests.

use async_trait::async_trait;
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ActivityError;
use crate::model::RequestType;

/// A charge request against the payment gateway.
///
/// The idempotency key makes a retried charge recognizable as a duplicate:
/// the gateway must return the original outcome rather than charging again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub application_id: String,
    pub amount: u64,
    pub customer_email: String,
    pub idempotency_key: String,
}

/// Successful charge result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeOutcome {
    pub transaction_id: String,
}

/// Context handed to the document generator alongside the template type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentContext {
    pub applicant_name: String,
    pub applicant_email: String,
    pub amount: u64,
    pub transaction_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRequest {
    pub application_id: String,
    pub template_type: RequestType,
    pub context: DocumentContext,
}

/// Successful document generation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentOutcome {
    pub document_id: String,
    pub download_url: Option<String>,
}

/// One outgoing email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, ActivityError>;
}

#[async_trait]
pub trait DocumentGenerator: Send + Sync {
    async fn generate(&self, request: &DocumentRequest) -> Result<DocumentOutcome, ActivityError>;
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), ActivityError>;
}

/// Simulated payment gateway: sleeps for a configurable processing delay,
/// then succeeds at a configurable rate. Declines are business failures.
///
/// Charges are deduplicated by idempotency key, so a retried request for a
/// key that already settled returns the original transaction.
pub struct SimulatedGateway {
    success_rate: f64,
    processing_delay: Duration,
    settled: Mutex<HashMap<String, ChargeOutcome>>,
}

impl SimulatedGateway {
    pub fn new(success_rate: f64, processing_delay: Duration) -> Self {
        Self {
            success_rate,
            processing_delay,
            settled: Mutex::new(HashMap::new()),
        }
    }

    /// Number of charges actually effected (unique idempotency keys).
    pub async fn settled_count(&self) -> usize {
        self.settled.lock().await.len()
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, ActivityError> {
        if let Some(existing) = self.settled.lock().await.get(&request.idempotency_key) {
            debug!(
                application_id = %request.application_id,
                transaction_id = %existing.transaction_id,
                "duplicate charge request, returning settled transaction"
            );
            return Ok(existing.clone());
        }

        tokio::time::sleep(self.processing_delay).await;

        let roll: f64 = rand::rng().random();
        if roll >= self.success_rate {
            info!(application_id = %request.application_id, "payment declined");
            return Err(ActivityError::Business("Payment declined by gateway".into()));
        }

        let outcome = ChargeOutcome {
            transaction_id: format!("txn_{}", Uuid::new_v4()),
        };
        self.settled
            .lock()
            .await
            .insert(request.idempotency_key.clone(), outcome.clone());
        info!(
            application_id = %request.application_id,
            transaction_id = %outcome.transaction_id,
            amount = request.amount,
            "payment settled"
        );
        Ok(outcome)
    }
}

/// Simulated document generator with configurable delay and success rate.
pub struct SimulatedDocumentService {
    success_rate: f64,
    processing_delay: Duration,
    base_url: String,
}

impl SimulatedDocumentService {
    pub fn new(success_rate: f64, processing_delay: Duration) -> Self {
        Self {
            success_rate,
            processing_delay,
            base_url: "https://documents.example.com".into(),
        }
    }
}

#[async_trait]
impl DocumentGenerator for SimulatedDocumentService {
    async fn generate(&self, request: &DocumentRequest) -> Result<DocumentOutcome, ActivityError> {
        tokio::time::sleep(self.processing_delay).await;

        let roll: f64 = rand::rng().random();
        if roll >= self.success_rate {
            return Err(ActivityError::Business("Document generation failed".into()));
        }

        let document_id = format!("doc_{}", Uuid::new_v4());
        let file_name = format!(
            "{}_{}.pdf",
            request.application_id, request.template_type
        );
        let download_url = format!("{}/{}/{}", self.base_url, document_id, file_name);
        info!(
            application_id = %request.application_id,
            document_id = %document_id,
            template_type = %request.template_type,
            "document generated"
        );
        Ok(DocumentOutcome {
            document_id,
            download_url: Some(download_url),
        })
    }
}

/// Email sender that logs the message instead of delivering it.
pub struct LoggingEmailSender {
    processing_delay: Duration,
}

impl LoggingEmailSender {
    pub fn new(processing_delay: Duration) -> Self {
        Self { processing_delay }
    }
}

#[async_trait]
impl EmailSender for LoggingEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), ActivityError> {
        tokio::time::sleep(self.processing_delay).await;
        info!(to = %message.to, subject = %message.subject, "email sent");
        Ok(())
    }
}

// --- Scripted doubles -----------------------------------------------------
//
// Deterministic stand-ins for tests: each pops the next scripted outcome
// (defaulting to success when the script runs dry), records every call for
// later verification, and can impose artificial latency or hang until the
// caller's timeout fires.

/// Scripted payment gateway for tests.
#[derive(Default)]
pub struct ScriptedGateway {
    pub outcomes: Mutex<VecDeque<Result<ChargeOutcome, ActivityError>>>,
    pub calls: Mutex<Vec<ChargeRequest>>,
    pub latency: Mutex<Duration>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_outcome(&self, outcome: Result<ChargeOutcome, ActivityError>) {
        self.outcomes.lock().await.push_back(outcome);
    }

    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.lock().await = latency;
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, ActivityError> {
        self.calls.lock().await.push(request.clone());
        let latency = *self.latency.lock().await;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match self.outcomes.lock().await.pop_front() {
            Some(outcome) => outcome,
            None => Ok(ChargeOutcome {
                transaction_id: format!("txn_{}", Uuid::new_v4()),
            }),
        }
    }
}

/// Scripted document generator for tests. With `hang` set, every call
/// records itself and then never resolves, so the caller's activity
/// timeout decides its fate.
#[derive(Default)]
pub struct ScriptedDocumentGenerator {
    pub outcomes: Mutex<VecDeque<Result<DocumentOutcome, ActivityError>>>,
    pub calls: Mutex<Vec<DocumentRequest>>,
    pub hang: std::sync::atomic::AtomicBool,
}

impl ScriptedDocumentGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_outcome(&self, outcome: Result<DocumentOutcome, ActivityError>) {
        self.outcomes.lock().await.push_back(outcome);
    }

    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl DocumentGenerator for ScriptedDocumentGenerator {
    async fn generate(&self, request: &DocumentRequest) -> Result<DocumentOutcome, ActivityError> {
        self.calls.lock().await.push(request.clone());
        if self.hang.load(std::sync::atomic::Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        match self.outcomes.lock().await.pop_front() {
            Some(outcome) => outcome,
            None => Ok(DocumentOutcome {
                document_id: format!("doc_{}", Uuid::new_v4()),
                download_url: Some("https://documents.example.com/doc/test.pdf".into()),
            }),
        }
    }
}

/// Email sender double that records every message.
#[derive(Default)]
pub struct RecordingEmailSender {
    pub outcomes: Mutex<VecDeque<Result<(), ActivityError>>>,
    pub sent: Mutex<Vec<EmailMessage>>,
    pub latency: Mutex<Duration>,
}

impl RecordingEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_outcome(&self, outcome: Result<(), ActivityError>) {
        self.outcomes.lock().await.push_back(outcome);
    }

    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.lock().await = latency;
    }

    pub async fn sent_messages(&self) -> Vec<EmailMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), ActivityError> {
        let latency = *self.latency.lock().await;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let outcome = self.outcomes.lock().await.pop_front().unwrap_or(Ok(()));
        if outcome.is_ok() {
            self.sent.lock().await.push(message.clone());
        }
        outcome
    }
}
