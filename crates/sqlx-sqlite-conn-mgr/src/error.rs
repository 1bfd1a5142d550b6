//! Error types for sqlx-sqlite-conn-mgr

use thiserror::Error;

/// Errors that may occur when resolving or opening the owned connection
#[derive(Error, Debug)]
pub enum Error {
   /// IO error when accessing database files. Standard library IO errors
   /// are converted to this variant.
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   /// Error from the sqlx library. Standard sqlx errors are converted to this variant
   #[error("Sqlx error: {0}")]
   Sqlx(#[from] sqlx::Error),

   /// Database name is empty, contains a path separator, or escapes the storage directory
   #[error("invalid database name: {0:?}")]
   InvalidDatabaseName(String),

   /// Database file does not exist and creation was not requested
   #[error("database not found: {0}")]
   DatabaseNotFound(String),
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
