//! Backend-agnostic SQL plumbing and the `Store` implementation shared by
//! `hub-sqlite` and `hub-postgres`.
//!
//! A concrete backend only needs to implement [`database::DatabaseExecutor`]
//! / [`database::DatabaseConnector`] over its own connection type; every
//! WebSub-specific query lives once, in [`store`], written against those
//! traits.

#[macro_use]
pub mod macros;

pub mod database;
pub mod pool;
pub mod stmt;
pub mod store;
pub mod value;

pub use database::{DatabaseConnector, DatabaseExecutor, DatabaseTransaction};
pub use hub_common::database::{ConversionError, Error};
pub use pool::{DatabaseConfig, DatabasePool, Pool, PooledResource};
pub use stmt::{query, Column, ExpectedSqlResponse, Statement};
pub use store::migrations::SchemaVersion;
pub use store::subscription::SubscriptionUpsert;
pub use store::topic::TopicContentUpdate;
pub use store::verification::VerificationInsert;
pub use store::{Queue, Store};
pub use value::Value;
