//! The hub's three processing engines, the worker loop that drives
//! them, and the manager boundary the HTTP dispatcher calls into
//!.

pub mod content_hash;
pub mod delivery;
pub mod error;
pub mod fetch;
pub mod manager;
pub mod verification;
pub mod worker;

pub use delivery::DeliveryEngine;
pub use error::Error;
pub use fetch::FetchEngine;
pub use manager::{IssueSeverity, Manager, PublishOutcome, SubscribeRequest, SubscriptionOutcome, ValidationIssue};
pub use verification::VerificationEngine;
pub use worker::{Worker, WorkerSettings};
