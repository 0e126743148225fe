//! Shared types for the WebSub hub work-queue engine: domain entities,
//! configuration, the database error taxonomy and the retry backoff
//! schedule, split into their own crate so both `hub-sql-common` backends
//! and `hub-engine` depend on one small crate instead of on each other.

pub mod backoff;
pub mod cache;
pub mod config;
pub mod database;
pub mod entities;

pub use backoff::Backoff;
pub use entities::{
    Authentication, HashAlgorithm, Subscription, SubscriptionDeliveryClaim, SubscriptionId, Topic,
    TopicContentHistoryEntry, TopicFetchClaim, TopicId, TopicLeaseDefaults, Verification,
    VerificationClaim, VerificationId, VerificationMode,
};
