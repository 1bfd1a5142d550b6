//! # sqlx-sqlite-conn-mgr
//!
//! Opens and owns the one SQLite connection a gateway serializes all work onto.
//!
//! ## Core Types
//!
//! - **[`OwnedConnection`]**: The single live handle to a database file in app-private storage
//! - **[`ConnectionConfig`]**: Connection policy (foreign keys, busy timeout, creation)
//! - **[`Error`]**: Error type for connection operations
//!
//! ## Policy
//!
//! - **Confined paths**: Database names are plain file names resolved inside a storage directory
//! - **Existing files only**: Missing databases are reported instead of silently created
//! - **Side files hidden**: Journal, WAL and shared-memory files are never listed as databases

mod config;
mod database;
mod error;

// Re-export public types
pub use config::ConnectionConfig;
pub use database::{OwnedConnection, list_databases, resolve_database_path};
pub use error::{Error, Result};
