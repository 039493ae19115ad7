//! Saga executor
//!
//! Drives one application through the fixed pipeline:
//! mark-processing -> fetch -> start email -> charge -> documents ->
//! approval email -> mark-completed. Every step is checkpointed after its
//! external effect commits, so a crashed run resumes from the first
//! incomplete step and reuses the persisted outputs of earlier ones. Any
//! step failure enters the failure path: mark the application failed, send
//! a best-effort failure notification, and drop the checkpoint.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clients::{
    ChargeOutcome, ChargeRequest, DocumentContext, DocumentOutcome, DocumentRequest, EmailMessage,
};
use crate::error::{ActivityError, SagaError};
use crate::model::{ApplicationRecord, ApplicationStatus};
use crate::saga::activities::Activities;
use crate::saga::progress::{ProgressStore, RunId, RunProgress, StepId, StepRecord};
use crate::saga::retry::{retry_activity, Attempted, RetryConfig};

/// Executes one run for one application id.
pub struct SagaExecutor {
    activities: Arc<Activities>,
    progress_store: Arc<dyn ProgressStore>,
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl SagaExecutor {
    pub fn new(
        activities: Arc<Activities>,
        progress_store: Arc<dyn ProgressStore>,
        retry: RetryConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            activities,
            progress_store,
            retry,
            cancel,
        }
    }

    /// Run the pipeline to a terminal status.
    ///
    /// If a checkpoint already exists for this application the run resumes
    /// from it (keeping the persisted run id, and with it the payment
    /// idempotency key); otherwise a fresh checkpoint is written before the
    /// first side-effecting step. Returns the effective run id on success,
    /// or the failure that terminated the run.
    pub async fn run(&self, application_id: &str, run_id: RunId) -> Result<RunId, SagaError> {
        let mut progress = match self.progress_store.load(application_id).await {
            Ok(Some(existing)) => {
                info!(
                    application_id,
                    run_id = %existing.run_id,
                    resume_from = ?existing.first_incomplete(),
                    "resuming run from checkpoint"
                );
                existing
            }
            Ok(None) => {
                let fresh = RunProgress::new(application_id, run_id);
                self.progress_store.save(&fresh).await.map_err(|err| {
                    SagaError::StoreUnavailable {
                        message: err.to_string(),
                    }
                })?;
                info!(application_id, %run_id, "starting run");
                fresh
            }
            Err(err) => {
                return Err(SagaError::StoreUnavailable {
                    message: err.to_string(),
                })
            }
        };
        let run_id = progress.run_id;

        // Outputs of steps committed before a crash.
        let mut application = progress.fetched_application().cloned();
        let mut charge = progress.charge_outcome().cloned();
        let mut document = progress.document_outcome().cloned();

        for step in StepId::PIPELINE {
            if progress.is_complete(step) {
                debug!(application_id, %step, "step already committed, skipping");
                continue;
            }
            if self.cancel.is_cancelled() {
                return self.fail(&progress, application.as_ref(), "cancelled").await;
            }

            let outcome: Result<StepRecord, (u32, ActivityError)> = match step {
                StepId::MarkProcessing => self
                    .activities
                    .update_status(application_id, ApplicationStatus::Processing)
                    .await
                    .map(|_| StepRecord::new(1))
                    .map_err(|err| (1, err)),

                StepId::FetchApplication => {
                    let Attempted { outcome, attempts } =
                        retry_activity(&self.retry, &self.cancel, step.as_str(), || {
                            self.activities.fetch_application(application_id)
                        })
                        .await;
                    match outcome {
                        Ok(record) => {
                            let step_record =
                                StepRecord::with_application(attempts, record.clone());
                            application = Some(record);
                            Ok(step_record)
                        }
                        Err(err) => Err((attempts, err)),
                    }
                }

                StepId::SendStartEmail => match application.as_ref() {
                    Some(app) => {
                        let message = start_email(app);
                        let Attempted { outcome, attempts } =
                            retry_activity(&self.retry, &self.cancel, step.as_str(), || {
                                self.activities.send_email(&message)
                            })
                            .await;
                        outcome
                            .map(|_| StepRecord::new(attempts))
                            .map_err(|err| (attempts, err))
                    }
                    None => Err((0, missing_checkpoint_output("fetched application"))),
                },

                StepId::ChargePayment => match application.as_ref() {
                    Some(app) => {
                        let request = ChargeRequest {
                            application_id: application_id.to_string(),
                            amount: app.request.amount,
                            customer_email: app.profile.email.clone(),
                            idempotency_key: progress.idempotency_key(),
                        };
                        let attempted =
                            retry_activity(&self.retry, &self.cancel, step.as_str(), || {
                                self.activities.charge_payment(&request)
                            })
                            .await;
                        match attempted.outcome {
                            Ok(outcome) => {
                                let step_record =
                                    StepRecord::with_charge(attempted.attempts, outcome.clone());
                                charge = Some(outcome);
                                Ok(step_record)
                            }
                            Err(err) => Err((attempted.attempts, err)),
                        }
                    }
                    None => Err((0, missing_checkpoint_output("fetched application"))),
                },

                StepId::GenerateDocuments => match (application.as_ref(), charge.as_ref()) {
                    (Some(app), Some(settled)) => {
                        let request = DocumentRequest {
                            application_id: application_id.to_string(),
                            template_type: app.request.kind,
                            context: DocumentContext {
                                applicant_name: app.profile.full_name(),
                                applicant_email: app.profile.email.clone(),
                                amount: app.request.amount,
                                transaction_id: settled.transaction_id.clone(),
                            },
                        };
                        let attempted =
                            retry_activity(&self.retry, &self.cancel, step.as_str(), || {
                                self.activities.generate_documents(&request)
                            })
                            .await;
                        match attempted.outcome {
                            Ok(outcome) => {
                                let step_record =
                                    StepRecord::with_document(attempted.attempts, outcome.clone());
                                document = Some(outcome);
                                Ok(step_record)
                            }
                            Err(err) => Err((attempted.attempts, err)),
                        }
                    }
                    (None, _) => Err((0, missing_checkpoint_output("fetched application"))),
                    (_, None) => Err((0, missing_checkpoint_output("settled charge"))),
                },

                StepId::SendApprovalEmail => {
                    match (application.as_ref(), charge.as_ref(), document.as_ref()) {
                        (Some(app), Some(settled), Some(generated)) => {
                            let message = approval_email(app, settled, generated);
                            let attempted =
                                retry_activity(&self.retry, &self.cancel, step.as_str(), || {
                                    self.activities.send_email(&message)
                                })
                                .await;
                            attempted
                                .outcome
                                .map(|_| StepRecord::new(attempted.attempts))
                                .map_err(|err| (attempted.attempts, err))
                        }
                        (None, _, _) => Err((0, missing_checkpoint_output("fetched application"))),
                        (_, None, _) => Err((0, missing_checkpoint_output("settled charge"))),
                        (_, _, None) => Err((0, missing_checkpoint_output("generated document"))),
                    }
                }

                StepId::MarkCompleted => self
                    .activities
                    .update_status(application_id, ApplicationStatus::Completed)
                    .await
                    .map(|_| StepRecord::new(1))
                    .map_err(|err| (1, err)),
            };

            match outcome {
                Ok(record) => {
                    progress.record_step(step, record);
                    if let Err(err) = self.progress_store.save(&progress).await {
                        // The step's effect happened but was not committed.
                        // Leave the checkpoint as it was: a later resume will
                        // re-issue the step, and the idempotency key keeps
                        // that safe for the charge.
                        error!(application_id, %step, error = %err, "checkpoint write failed");
                        return Err(SagaError::StoreUnavailable {
                            message: err.to_string(),
                        });
                    }
                    debug!(application_id, %step, "step committed");
                }
                Err((attempts, err)) => {
                    if attempts > 0 {
                        progress.record_attempts(step, attempts);
                        if let Err(save_err) = self.progress_store.save(&progress).await {
                            warn!(application_id, error = %save_err, "could not persist attempt count");
                        }
                    }
                    let reason = failure_reason(step, &err);
                    return self.fail(&progress, application.as_ref(), &reason).await;
                }
            }
        }

        info!(application_id, %run_id, "application processing completed");
        if let Err(err) = self.progress_store.delete(application_id).await {
            warn!(application_id, error = %err, "could not delete checkpoint for completed run");
        }
        Ok(run_id)
    }

    /// Failure path: record the terminal status, then best-effort notify the
    /// applicant. Notification problems are logged and swallowed; they never
    /// escalate or restart the pipeline.
    async fn fail(
        &self,
        progress: &RunProgress,
        application: Option<&ApplicationRecord>,
        reason: &str,
    ) -> Result<RunId, SagaError> {
        let application_id = progress.application_id.as_str();
        error!(application_id, reason, "pipeline aborted, entering failure path");

        if let Err(err) = self
            .activities
            .update_status(application_id, ApplicationStatus::Failed)
            .await
        {
            // No clean terminal status could be written. The checkpoint is
            // kept so an operator (or a later resume) can reconcile.
            error!(
                application_id,
                error = %err,
                "could not record failed status, application left inconsistent"
            );
            return Err(SagaError::StoreUnavailable {
                message: err.to_string(),
            });
        }

        self.notify_failure(application_id, application, reason).await;

        if let Err(err) = self.progress_store.delete(application_id).await {
            warn!(application_id, error = %err, "could not delete checkpoint for failed run");
        }

        Err(SagaError::RunFailed {
            application_id: application_id.to_string(),
            reason: reason.to_string(),
        })
    }

    async fn notify_failure(
        &self,
        application_id: &str,
        application: Option<&ApplicationRecord>,
        reason: &str,
    ) {
        let fetched;
        let application = match application {
            Some(app) => app,
            None => {
                let attempted =
                    retry_activity(&self.retry, &self.cancel, "fetch_application", || {
                        self.activities.fetch_application(application_id)
                    })
                    .await;
                match attempted.outcome {
                    Ok(app) => {
                        fetched = app;
                        &fetched
                    }
                    Err(err) => {
                        warn!(
                            application_id,
                            error = %err,
                            "skipping failure notification, could not fetch application"
                        );
                        return;
                    }
                }
            }
        };

        let message = failure_email(application, reason);
        let attempted = retry_activity(&self.retry, &self.cancel, "send_failure_email", || {
            self.activities.send_email(&message)
        })
        .await;
        if let Err(err) = attempted.outcome {
            warn!(application_id, error = %err, "failure notification email could not be sent");
        }
    }
}

fn missing_checkpoint_output(what: &str) -> ActivityError {
    ActivityError::Store(format!("checkpoint missing {what}"))
}

fn failure_reason(step: StepId, err: &ActivityError) -> String {
    match (step, err) {
        (_, ActivityError::Cancelled) => "cancelled".to_string(),
        (StepId::ChargePayment, err) => format!("payment failed: {err}"),
        (StepId::GenerateDocuments, err) => format!("document generation failed: {err}"),
        (step, err) => format!("{step} failed: {err}"),
    }
}

fn start_email(application: &ApplicationRecord) -> EmailMessage {
    EmailMessage {
        to: application.profile.email.clone(),
        subject: "Application Received - Processing Started".into(),
        body: format!(
            "<h2>Application Processing Started</h2>\n\
             <p>Dear {name},</p>\n\
             <p>We have received your {kind} application (ID: {id}) and processing has begun.</p>\n\
             <p>You will receive updates as we progress through the approval process.</p>\n\
             <p>Best regards,<br>Application Processing Team</p>",
            name = application.profile.full_name(),
            kind = application.request.kind,
            id = application.application_id,
        ),
    }
}

fn approval_email(
    application: &ApplicationRecord,
    charge: &ChargeOutcome,
    document: &DocumentOutcome,
) -> EmailMessage {
    let download = document
        .download_url
        .as_ref()
        .map(|url| format!("<p><a href=\"{url}\">Download Documents</a></p>\n"))
        .unwrap_or_default();
    EmailMessage {
        to: application.profile.email.clone(),
        subject: "Application Approved - Documents Ready".into(),
        body: format!(
            "<h2>Application Approved!</h2>\n\
             <p>Dear {name},</p>\n\
             <p>Great news! Your {kind} application (ID: {id}) has been approved.</p>\n\
             <p>Your documents have been generated and are ready for download.</p>\n\
             <p><strong>Transaction ID:</strong> {transaction_id}</p>\n\
             <p><strong>Document ID:</strong> {document_id}</p>\n\
             {download}\
             <p>Best regards,<br>Application Processing Team</p>",
            name = application.profile.full_name(),
            kind = application.request.kind,
            id = application.application_id,
            transaction_id = charge.transaction_id,
            document_id = document.document_id,
        ),
    }
}

fn failure_email(application: &ApplicationRecord, reason: &str) -> EmailMessage {
    EmailMessage {
        to: application.profile.email.clone(),
        subject: "Application Processing Failed".into(),
        body: format!(
            "<h2>Application Processing Failed</h2>\n\
             <p>Dear {name},</p>\n\
             <p>We encountered an issue while processing your application (ID: {id}).</p>\n\
             <p>Please contact our support team for assistance.</p>\n\
             <p>Error: {reason}</p>\n\
             <p>Best regards,<br>Application Processing Team</p>",
            name = application.profile.full_name(),
            id = application.application_id,
        ),
    }
}
