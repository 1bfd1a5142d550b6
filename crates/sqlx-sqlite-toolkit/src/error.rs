use crate::request::OperationKind;

/// Result type alias for toolkit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for operations dispatched against the owned connection.
///
/// None of these cross the response boundary as typed values; the dispatcher
/// renders them to `Exception: <message>` (or `canceled`).
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from SQLx operations.
   #[error(transparent)]
   Sqlx(#[from] sqlx::Error),

   /// Error from the connection manager.
   #[error(transparent)]
   ConnectionManager(#[from] sqlx_sqlite_conn_mgr::Error),

   /// SQLite type that cannot be marshaled to text.
   #[error("unsupported datatype: {0}")]
   UnsupportedDatatype(String),

   /// Begin requested while a transaction is already open.
   #[error("already in transaction on database: {0}")]
   TransactionAlreadyActive(String),

   /// Commit or rollback requested with no open transaction.
   #[error("no active transaction on database: {0}")]
   NoActiveTransaction(String),

   /// The engine rolled back the open transaction while running a request.
   #[error("{source}; transaction on database {database} was rolled back")]
   TransactionRolledBack {
      database: String,
      #[source]
      source: Box<Error>,
   },

   /// Transaction request did not name begin, commit or rollback.
   #[error("invalid transaction action: {0:?}")]
   InvalidTransactionAction(String),

   /// The operation needs a raw statement and none was supplied.
   #[error("{0} requires sql")]
   MissingSql(OperationKind),

   /// The operation needs a target table and none was supplied.
   #[error("{0} requires a target table")]
   MissingTarget(OperationKind),

   /// The operation needs values (or a foreign key flag) and none were supplied.
   #[error("{0} requires values")]
   MissingValues(OperationKind),

   /// Table or column name contains invalid characters.
   ///
   /// Names must match `[a-zA-Z_][a-zA-Z0-9_.]*` (letters, digits,
   /// underscores, and dots for qualified names like `main.table`).
   #[error("invalid identifier '{name}': must match [a-zA-Z_][a-zA-Z0-9_.]*")]
   InvalidColumnName { name: String },

   /// Row window end lies before its start.
   #[error("invalid row window: end {end} is before start {start}")]
   InvalidRowWindow { start: u64, end: u64 },

   /// Kind that must be handled by the connection owner, not the dispatcher.
   #[error("{0} cannot be dispatched")]
   UnsupportedKind(OperationKind),

   /// Query abandoned because the caller canceled it.
   #[error("canceled")]
   Canceled,

   /// Generic error for operations that don't fit other categories.
   #[error("{0}")]
   Other(String),
}

impl Error {
   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for logging and for hosts
   /// that want more than the rendered message.
   pub fn error_code(&self) -> String {
      match self {
         Error::Sqlx(e) => {
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("SQLITE_{}", code);
            }
            "SQLX_ERROR".to_string()
         }
         Error::ConnectionManager(_) => "CONNECTION_ERROR".to_string(),
         Error::UnsupportedDatatype(_) => "UNSUPPORTED_DATATYPE".to_string(),
         Error::TransactionAlreadyActive(_) => "TRANSACTION_ALREADY_ACTIVE".to_string(),
         Error::NoActiveTransaction(_) => "NO_ACTIVE_TRANSACTION".to_string(),
         Error::TransactionRolledBack { .. } => "TRANSACTION_ROLLED_BACK".to_string(),
         Error::InvalidTransactionAction(_) => "INVALID_TRANSACTION_ACTION".to_string(),
         Error::MissingSql(_) => "MISSING_SQL".to_string(),
         Error::MissingTarget(_) => "MISSING_TARGET".to_string(),
         Error::MissingValues(_) => "MISSING_VALUES".to_string(),
         Error::InvalidColumnName { .. } => "INVALID_COLUMN_NAME".to_string(),
         Error::InvalidRowWindow { .. } => "INVALID_ROW_WINDOW".to_string(),
         Error::UnsupportedKind(_) => "UNSUPPORTED_KIND".to_string(),
         Error::Canceled => "CANCELED".to_string(),
         Error::Other(_) => "ERROR".to_string(),
      }
   }
}
