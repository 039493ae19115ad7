//! End-to-end pipeline scenarios against scripted collaborators.

mod common;

use appsaga::error::ActivityError;
use appsaga::saga::ProgressStore;
use appsaga::{ApplicationStatus, ApplicationStore};
use common::{harness, sample_application, wait_terminal};

#[tokio::test]
async fn happy_path_completes_with_one_charge_and_two_emails() {
    let h = harness();
    h.store.create(sample_application("app-001")).await.unwrap();

    let submission = h.registry.submit_for_processing("app-001").await.unwrap();
    assert_eq!(wait_terminal(&h, "app-001").await, ApplicationStatus::Completed);

    // Exactly one charge, for the full amount, keyed to this run.
    let charges = h.gateway.calls.lock().await.clone();
    assert_eq!(charges.len(), 1);
    assert_eq!(charges[0].amount, 50_000);
    assert_eq!(charges[0].customer_email, "ada@example.com");
    assert!(charges[0].idempotency_key.contains("app-001"));
    assert!(charges[0]
        .idempotency_key
        .contains(&submission.run_id.to_string()));

    // Exactly one document, templated from the request kind, fed the
    // transaction id.
    let documents = h.documents.calls.lock().await.clone();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].template_type, appsaga::RequestType::Loan);
    assert!(documents[0].context.transaction_id.starts_with("txn_"));

    // Start and approval notifications, in that order.
    let emails = h.email.sent_messages().await;
    assert_eq!(emails.len(), 2);
    assert_eq!(emails[0].subject, "Application Received - Processing Started");
    assert_eq!(emails[1].subject, "Application Approved - Documents Ready");
    assert!(emails[1].body.contains(&documents[0].context.transaction_id));

    // Checkpoint removed on terminal transition.
    assert!(h.progress.load("app-001").await.unwrap().is_none());
}

#[tokio::test]
async fn declined_payment_fails_run_without_touching_documents() {
    let h = harness();
    h.store.create(sample_application("app-001")).await.unwrap();
    h.gateway
        .push_outcome(Err(ActivityError::Business("card declined".into())))
        .await;

    h.registry.submit_for_processing("app-001").await.unwrap();
    assert_eq!(wait_terminal(&h, "app-001").await, ApplicationStatus::Failed);

    // A business decline is not retried.
    assert_eq!(h.gateway.call_count().await, 1);
    assert_eq!(h.documents.call_count().await, 0);

    let emails = h.email.sent_messages().await;
    assert_eq!(emails.len(), 2);
    assert_eq!(emails[0].subject, "Application Received - Processing Started");
    assert_eq!(emails[1].subject, "Application Processing Failed");
    assert!(emails[1].body.contains("payment failed: card declined"));

    assert!(h.progress.load("app-001").await.unwrap().is_none());
}

#[tokio::test]
async fn document_timeouts_exhaust_three_attempts_then_fail() {
    let h = harness();
    h.store.create(sample_application("app-001")).await.unwrap();
    h.documents.set_hang(true);

    h.registry.submit_for_processing("app-001").await.unwrap();
    assert_eq!(wait_terminal(&h, "app-001").await, ApplicationStatus::Failed);

    // The charge settled once and is not compensated by this pipeline.
    assert_eq!(h.gateway.call_count().await, 1);
    // Timeouts are transient: exactly maximum attempts.
    assert_eq!(h.documents.call_count().await, 3);

    let emails = h.email.sent_messages().await;
    assert_eq!(emails.len(), 2);
    assert_eq!(emails[1].subject, "Application Processing Failed");
    assert!(emails[1].body.contains("document generation failed:"));
}

#[tokio::test]
async fn transient_charge_failure_recovers_on_retry() {
    let h = harness();
    h.store.create(sample_application("app-001")).await.unwrap();
    h.gateway
        .push_outcome(Err(ActivityError::Transient("connection reset".into())))
        .await;

    h.registry.submit_for_processing("app-001").await.unwrap();
    assert_eq!(wait_terminal(&h, "app-001").await, ApplicationStatus::Completed);

    assert_eq!(h.gateway.call_count().await, 2);
    assert_eq!(h.email.sent_messages().await.len(), 2);
}

#[tokio::test]
async fn failed_start_email_aborts_run_before_any_charge() {
    let h = harness();
    h.store.create(sample_application("app-001")).await.unwrap();
    for _ in 0..3 {
        h.email
            .push_outcome(Err(ActivityError::Transient("smtp unreachable".into())))
            .await;
    }

    h.registry.submit_for_processing("app-001").await.unwrap();
    assert_eq!(wait_terminal(&h, "app-001").await, ApplicationStatus::Failed);

    // The confirmation email is fatal to the run, like every other step.
    assert_eq!(h.gateway.call_count().await, 0);
    assert_eq!(h.documents.call_count().await, 0);

    // The scripted failures were consumed by the start email, so the
    // failure notification itself went through.
    let emails = h.email.sent_messages().await;
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].subject, "Application Processing Failed");
    assert!(emails[0].body.contains("send_start_email failed"));
}
