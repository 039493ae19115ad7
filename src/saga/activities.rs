//! Step activities
//!
//! The five units of work the pipeline is built from. Each call is bounded
//! by the configured activity timeout; an elapsed timeout is reported as a
//! transient failure so the retry policy can take another swing at it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::clients::{
    ChargeOutcome, ChargeRequest, DocumentGenerator, DocumentOutcome, DocumentRequest,
    EmailMessage, EmailSender, PaymentGateway,
};
use crate::error::ActivityError;
use crate::model::{ApplicationRecord, ApplicationStatus};
use crate::store::ApplicationStore;

/// Bundle of injected collaborators the activities run against.
pub struct Activities {
    store: Arc<dyn ApplicationStore>,
    payments: Arc<dyn PaymentGateway>,
    documents: Arc<dyn DocumentGenerator>,
    email: Arc<dyn EmailSender>,
    timeout: Duration,
}

impl Activities {
    pub fn new(
        store: Arc<dyn ApplicationStore>,
        payments: Arc<dyn PaymentGateway>,
        documents: Arc<dyn DocumentGenerator>,
        email: Arc<dyn EmailSender>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            payments,
            documents,
            email,
            timeout,
        }
    }

    async fn bounded<T>(
        &self,
        activity: &str,
        call: impl Future<Output = Result<T, ActivityError>>,
    ) -> Result<T, ActivityError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ActivityError::Transient(format!(
                "{activity} timed out after {:?}",
                self.timeout
            ))),
        }
    }

    /// Query the application record. Missing records are not retryable.
    pub async fn fetch_application(
        &self,
        application_id: &str,
    ) -> Result<ApplicationRecord, ActivityError> {
        debug!(application_id, "fetching application");
        let record = self
            .bounded("fetch_application", async {
                self.store.get(application_id).await.map_err(Into::into)
            })
            .await?;
        record.ok_or_else(|| ActivityError::NotFound(application_id.to_string()))
    }

    pub async fn send_email(&self, message: &EmailMessage) -> Result<(), ActivityError> {
        debug!(to = %message.to, subject = %message.subject, "sending email");
        self.bounded("send_email", self.email.send(message)).await
    }

    /// Charge the applicant. The request's idempotency key makes a retried
    /// call after a crash a recognizable duplicate at the gateway, so one
    /// run never charges twice.
    pub async fn charge_payment(
        &self,
        request: &ChargeRequest,
    ) -> Result<ChargeOutcome, ActivityError> {
        debug!(
            application_id = %request.application_id,
            amount = request.amount,
            "charging payment"
        );
        self.bounded("charge_payment", self.payments.charge(request))
            .await
    }

    pub async fn generate_documents(
        &self,
        request: &DocumentRequest,
    ) -> Result<DocumentOutcome, ActivityError> {
        debug!(
            application_id = %request.application_id,
            template_type = %request.template_type,
            "generating documents"
        );
        self.bounded("generate_documents", self.documents.generate(request))
            .await
    }

    /// Write a status transition. Not wrapped in the retry policy: a failed
    /// status write is fatal to the run.
    pub async fn update_status(
        &self,
        application_id: &str,
        status: ApplicationStatus,
    ) -> Result<(), ActivityError> {
        debug!(application_id, %status, "updating application status");
        self.bounded("update_status", async {
            self.store
                .set_status(application_id, status)
                .await
                .map_err(Into::into)
        })
        .await
    }
}
