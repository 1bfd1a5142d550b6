//! # sqlx-sqlite-toolkit
//!
//! Dispatches tagged operation requests against a single owned SQLite
//! connection and marshals the results into flat text lines.
//!
//! ## Core Types
//!
//! - **[`Session`]**: Owned connection plus transaction state; runs one request at a time
//! - **[`OperationRequest`]** / **[`OperationResponse`]**: The request/response contract
//! - **[`RowSetMarshaler`]**: Header-first `name:tag` / comma-joined row rendering
//! - **[`TransactionState`]**: Explicit transaction tracking across requests
//! - **[`CancelFlag`]**: Cooperative cancellation for running queries

mod cancel;
mod decode;
mod error;
mod marshal;
mod request;
mod response;
mod session;
mod statement;
mod transaction;

pub use cancel::CancelFlag;
pub use decode::{Cell, CellType};
pub use error::{Error, Result};
pub use marshal::RowSetMarshaler;
pub use request::{OperationKind, OperationRequest, RowWindow, TransactionAction, Values};
pub use response::{BatchFailure, OperationResponse, OperationResult};
pub use session::{CloseOutcome, Session};
pub use transaction::TransactionState;

// Re-export the connection manager so callers need a single dependency
pub use sqlx_sqlite_conn_mgr::{ConnectionConfig, OwnedConnection, list_databases};
