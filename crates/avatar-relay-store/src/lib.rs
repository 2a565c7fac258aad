//! Read access to the conversation message log kept in the document store.
//!
//! The log is owned and appended to by another service; this crate only
//! signs and issues SQL queries against the store's REST API.

pub mod auth;
pub mod config;
pub mod cosmos;
pub mod error;
pub mod messages;

pub use config::StoreConfig;
pub use cosmos::CosmosClient;
pub use error::StoreError;
pub use messages::{LogMessage, MessageLogReader};
