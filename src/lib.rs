//! # appsaga
//!
//! A durable multi-step saga executor for processing business applications
//! (loans, mortgages, business and auto requests) through a fixed pipeline:
//! mark-processing, fetch application data, notify the applicant, charge
//! payment, generate documents, notify completion, mark terminal status.
//!
//! Each step calls an unreliable external collaborator. The core tolerates
//! partial failure without corrupting application state or double-charging:
//! transient failures are retried with bounded exponential backoff, every
//! committed step is checkpointed so a crashed run resumes without
//! repeating side effects, at most one run is active per application id,
//! and unrecoverable failures go through a compensating notification path
//! before the application is marked failed.
//!
//! ## Modules
//!
//! - `model` - application records and the status state machine
//! - `error` - error taxonomy for activities, store, and the saga surface
//! - `store` - the application store adapter seam
//! - `clients` - payment / document / email collaborator seams, simulated
//!   implementations, and scripted test doubles
//! - `saga` - retry policy, step activities, durable run progress, the
//!   pipeline executor, and the run registry
//! - `config` - runtime configuration with production defaults

pub mod clients;
pub mod config;
pub mod error;
pub mod model;
pub mod saga;
pub mod store;

pub use config::SagaConfig;
pub use error::{ActivityError, SagaError, StoreError};
pub use model::{ApplicationRecord, ApplicationStatus, Profile, RequestDetails, RequestType};
pub use saga::{RunId, RunRegistry, RunStatus, Submission};
pub use store::{ApplicationStore, MemoryApplicationStore};
