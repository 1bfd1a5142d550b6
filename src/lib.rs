//! # sqlite-gateway
//!
//! Token-gated access to one SQLite database at a time, with every
//! operation serialized onto a single worker thread that owns the
//! connection.
//!
//! ```ignore
//! use std::sync::Arc;
//! use sqlite_gateway::{
//!    FileSecretStore, GatewayConfig, OperationKind, OperationRequest, SqliteGateway,
//! };
//!
//! let secrets = Arc::new(FileSecretStore::new("/data/app/secret.json"));
//! let gateway = SqliteGateway::new(GatewayConfig::new("/data/app/databases"), secrets);
//!
//! gateway.open_connection(&token, "notes.db").await;
//! let response = gateway
//!    .execute(&token, OperationRequest::raw(OperationKind::Query, "SELECT * FROM notes"))
//!    .await;
//! for line in response.into_lines() {
//!    println!("{line}");
//! }
//! ```

mod access;
mod config;
mod error;
mod gateway;
mod settings;
mod worker;

pub use access::AccessGate;
pub use config::{DEFAULT_WORKER_THREAD_NAME, GatewayConfig};
pub use error::{Error, Result};
pub use gateway::{CloseOutcome, ConnectionStatus, PendingOperation, SqliteGateway};
pub use settings::{FileSecretStore, MemorySecretStore, SUPPORTED_KEY_LENGTHS, Secret, SecretStore};

// Request and response types, so hosts need a single dependency
pub use sqlx_sqlite_toolkit::{
   BatchFailure, CancelFlag, ConnectionConfig, OperationKind, OperationRequest, OperationResponse,
   OperationResult, RowWindow, TransactionAction, Values,
};
