/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the gateway's lifecycle calls and settings store.
///
/// Operation requests never surface these; a request that cannot run is
/// answered with an `Exception: <message>` response instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Access token failed the gate.
   #[error("unauthorized")]
   Unauthorized,

   /// The persisted secret record is missing or unreadable.
   #[error("settings error: {0}")]
   Settings(String),

   /// A secret record already exists and is never overwritten.
   #[error("secret record already written")]
   SecretAlreadyWritten,

   /// Key length selects no supported cipher.
   #[error("invalid secret: key must be 16 or 32 bytes, got {0}")]
   InvalidSecret(usize),

   /// The worker thread could not be started.
   #[error("failed to spawn worker: {0}")]
   WorkerSpawn(#[source] std::io::Error),

   /// The worker stopped before answering.
   #[error("worker is gone")]
   WorkerGone,

   /// No database connection is open.
   #[error("no open connection")]
   NotConnected,

   /// Error from the toolkit.
   #[error(transparent)]
   Toolkit(#[from] sqlx_sqlite_toolkit::Error),

   /// Error from the connection manager.
   #[error(transparent)]
   ConnectionManager(#[from] sqlx_sqlite_conn_mgr::Error),

   /// IO error from the settings store or configuration file.
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   /// Malformed settings record or configuration file.
   #[error("JSON error: {0}")]
   Json(#[from] serde_json::Error),
}

impl Error {
   /// Extract a structured error code from the error type.
   pub fn error_code(&self) -> String {
      match self {
         Error::Unauthorized => "UNAUTHORIZED".to_string(),
         Error::Settings(_) => "SETTINGS_ERROR".to_string(),
         Error::SecretAlreadyWritten => "SECRET_ALREADY_WRITTEN".to_string(),
         Error::InvalidSecret(_) => "INVALID_SECRET".to_string(),
         Error::WorkerSpawn(_) => "WORKER_SPAWN_FAILED".to_string(),
         Error::WorkerGone => "WORKER_GONE".to_string(),
         Error::NotConnected => "NOT_CONNECTED".to_string(),
         Error::Toolkit(e) => e.error_code(),
         Error::ConnectionManager(_) => "CONNECTION_ERROR".to_string(),
         Error::Io(_) => "IO_ERROR".to_string(),
         Error::Json(_) => "JSON_ERROR".to_string(),
      }
   }
}
