//! Single-flight, rejection, and cancellation behavior of the run registry.

mod common;

use std::time::Duration;

use appsaga::{ApplicationStatus, ApplicationStore, SagaError};
use common::{harness, sample_application, wait_terminal};

#[tokio::test]
async fn concurrent_submissions_yield_exactly_one_acceptance() {
    let h = harness();
    h.store.create(sample_application("app-001")).await.unwrap();
    // Slow the run down (within the activity timeout) so all submissions
    // race against an active run.
    h.email.set_latency(Duration::from_millis(80)).await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let registry = h.registry.clone();
        tasks.push(tokio::spawn(async move {
            registry.submit_for_processing("app-001").await
        }));
    }

    let mut accepted = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(SagaError::AlreadyRunning { .. }) => rejected += 1,
            Err(other) => panic!("unexpected rejection: {other}"),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(rejected, 7);

    assert_eq!(wait_terminal(&h, "app-001").await, ApplicationStatus::Completed);
    assert_eq!(h.gateway.call_count().await, 1);
}

#[tokio::test]
async fn slot_is_released_and_terminal_resubmission_rejected() {
    let h = harness();
    h.store.create(sample_application("app-001")).await.unwrap();

    h.registry.submit_for_processing("app-001").await.unwrap();
    assert_eq!(wait_terminal(&h, "app-001").await, ApplicationStatus::Completed);
    assert!(!h.registry.is_active("app-001").await);

    let err = h.registry.submit_for_processing("app-001").await.unwrap_err();
    assert!(matches!(
        err,
        SagaError::AlreadyTerminal {
            status: ApplicationStatus::Completed,
            ..
        }
    ));
}

#[tokio::test]
async fn cancelled_run_fails_without_charging() {
    let h = harness();
    h.store.create(sample_application("app-001")).await.unwrap();
    // Keep the start email in flight long enough to cancel mid-run, while
    // staying under the activity timeout so it still completes.
    h.email.set_latency(Duration::from_millis(80)).await;

    h.registry.submit_for_processing("app-001").await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(h.registry.cancel("app-001").await);

    assert_eq!(wait_terminal(&h, "app-001").await, ApplicationStatus::Failed);

    // Cancellation stops new activity calls; the in-flight email finished
    // normally, and the charge never happened.
    assert_eq!(h.gateway.call_count().await, 0);
    let emails = h.email.sent_messages().await;
    assert_eq!(emails.len(), 2);
    assert_eq!(emails[1].subject, "Application Processing Failed");
    assert!(emails[1].body.contains("cancelled"));
}

#[tokio::test]
async fn store_outage_rejects_submission() {
    let h = harness();
    h.store.create(sample_application("app-001")).await.unwrap();
    h.store.set_unavailable(true);

    let err = h.registry.submit_for_processing("app-001").await.unwrap_err();
    assert!(matches!(err, SagaError::StoreUnavailable { .. }));
}
