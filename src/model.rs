//! Application record types
//!
//! The persisted shape of a business application and the status state
//! machine the executor drives it through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Processing status of an application.
///
/// `Pending` and `Processing` are the only non-terminal states. `Completed`
/// and `Failed` are terminal; once reached the record is never mutated
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ApplicationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ApplicationStatus::Completed | ApplicationStatus::Failed
        )
    }

    /// Whether moving to `next` is a legal transition.
    ///
    /// Legal moves: pending -> processing, processing -> completed,
    /// processing -> failed, and pending -> failed (a run cancelled before
    /// its first status write). Terminal states accept nothing.
    pub fn can_transition_to(self, next: ApplicationStatus) -> bool {
        use ApplicationStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Failed) | (Processing, Completed) | (Processing, Failed)
        )
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Processing => "processing",
            ApplicationStatus::Completed => "completed",
            ApplicationStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The kind of application being processed. Doubles as the document
/// template type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Loan,
    Mortgage,
    Business,
    Auto,
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestType::Loan => "loan",
            RequestType::Mortgage => "mortgage",
            RequestType::Business => "business",
            RequestType::Auto => "auto",
        };
        f.write_str(s)
    }
}

/// Applicant identity. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl Profile {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// What the applicant asked for. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDetails {
    pub kind: RequestType,
    /// Amount to charge, in minor units. Must be positive.
    pub amount: u64,
    /// Documents the applicant must eventually provide, in order.
    #[serde(default)]
    pub required_documents: Vec<String>,
}

/// One persisted application, keyed by `application_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub application_id: String,
    pub profile: Profile,
    pub request: RequestDetails,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApplicationRecord {
    /// Create a fresh pending record.
    pub fn new(application_id: impl Into<String>, profile: Profile, request: RequestDetails) -> Self {
        let now = Utc::now();
        Self {
            application_id: application_id.into(),
            profile,
            request,
            status: ApplicationStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!ApplicationStatus::Pending.is_terminal());
        assert!(!ApplicationStatus::Processing.is_terminal());
        assert!(ApplicationStatus::Completed.is_terminal());
        assert!(ApplicationStatus::Failed.is_terminal());
    }

    #[test]
    fn transition_matrix() {
        use ApplicationStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Pending));
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&ApplicationStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        let back: ApplicationStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(back, ApplicationStatus::Failed);
    }

    #[test]
    fn new_record_starts_pending() {
        let record = ApplicationRecord::new(
            "app-001",
            Profile {
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                email: "ada@example.com".into(),
            },
            RequestDetails {
                kind: RequestType::Loan,
                amount: 50_000,
                required_documents: vec!["id".into(), "income".into()],
            },
        );
        assert_eq!(record.status, ApplicationStatus::Pending);
        assert_eq!(record.created_at, record.updated_at);
        assert_eq!(record.profile.full_name(), "Ada Lovelace");
        assert_eq!(record.request.kind.to_string(), "loan");
    }
}
