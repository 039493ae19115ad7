//! Shared harness for integration tests: in-memory store, scripted
//! collaborators, and a registry configured with millisecond-scale retry
//! delays so failure scenarios finish quickly.

use std::sync::Arc;
use std::time::Duration;

use appsaga::clients::{RecordingEmailSender, ScriptedDocumentGenerator, ScriptedGateway};
use appsaga::saga::{Activities, MemoryProgressStore, RetryConfig, RunRegistry};
use appsaga::{
    ApplicationRecord, ApplicationStatus, MemoryApplicationStore, Profile, RequestDetails,
    RequestType, SagaConfig,
};

pub struct Harness {
    pub store: Arc<MemoryApplicationStore>,
    pub gateway: Arc<ScriptedGateway>,
    pub documents: Arc<ScriptedDocumentGenerator>,
    pub email: Arc<RecordingEmailSender>,
    pub progress: Arc<MemoryProgressStore>,
    pub registry: Arc<RunRegistry>,
}

pub fn fast_config() -> SagaConfig {
    SagaConfig {
        retry: RetryConfig {
            attempts: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            ..RetryConfig::default()
        },
        activity_timeout: Duration::from_millis(100),
        poll_interval: Duration::from_millis(5),
    }
}

pub fn harness() -> Harness {
    let config = fast_config();
    let store = Arc::new(MemoryApplicationStore::new());
    let gateway = Arc::new(ScriptedGateway::new());
    let documents = Arc::new(ScriptedDocumentGenerator::new());
    let email = Arc::new(RecordingEmailSender::new());
    let progress = Arc::new(MemoryProgressStore::new());

    let activities = Arc::new(Activities::new(
        store.clone(),
        gateway.clone(),
        documents.clone(),
        email.clone(),
        config.activity_timeout,
    ));
    let registry = RunRegistry::new(store.clone(), activities, progress.clone(), config);

    Harness {
        store,
        gateway,
        documents,
        email,
        progress,
        registry,
    }
}

pub fn sample_application(id: &str) -> ApplicationRecord {
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
            required_documents: vec!["identity".into(), "proof-of-income".into()],
        },
    )
}

/// Poll until the application reaches a terminal status and its registry
/// slot is released.
pub async fn wait_terminal(harness: &Harness, application_id: &str) -> ApplicationStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = harness
            .registry
            .get_run_status(application_id)
            .await
            .expect("status read");
        if status.status.is_terminal() && !harness.registry.is_active(application_id).await {
            return status.status;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "run for {application_id} did not reach a terminal status"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
