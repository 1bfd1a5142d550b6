//! Transaction state carried across operations on the owned connection

use libsqlite3_sys::{sqlite3, sqlite3_get_autocommit};
use sqlx::SqliteConnection;

use crate::request::TransactionAction;
use crate::{Error, Result};

/// Whether the owned connection is inside an explicit transaction.
///
/// ```text
/// NoTransaction --begin--> InTransaction --commit|rollback--> NoTransaction
/// ```
///
/// Anything else is rejected before a statement reaches SQLite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
   #[default]
   NoTransaction,
   InTransaction,
}

impl TransactionState {
   pub fn is_active(self) -> bool {
      self == TransactionState::InTransaction
   }

   /// State after `action`, or the error explaining why it is not allowed.
   pub fn transition(self, action: TransactionAction, database: &str) -> Result<Self> {
      match (self, action) {
         (TransactionState::NoTransaction, TransactionAction::Begin) => {
            Ok(TransactionState::InTransaction)
         }
         (TransactionState::InTransaction, TransactionAction::Begin) => {
            Err(Error::TransactionAlreadyActive(database.to_string()))
         }
         (TransactionState::InTransaction, _) => Ok(TransactionState::NoTransaction),
         (TransactionState::NoTransaction, _) => {
            Err(Error::NoActiveTransaction(database.to_string()))
         }
      }
   }
}

/// SQL issued for each transaction action.
pub(crate) fn statement_for(action: TransactionAction) -> &'static str {
   match action {
      // Write lock is held from begin onward
      TransactionAction::Begin => "BEGIN IMMEDIATE",
      TransactionAction::Commit => "COMMIT",
      TransactionAction::Rollback => "ROLLBACK",
   }
}

/// Whether SQLite itself has a transaction open on `conn`.
///
/// The engine ends a transaction on its own after an `OR ROLLBACK` conflict
/// or a full disk, and raw `BEGIN`/`COMMIT` can arrive through any statement
/// kind. [`TransactionState`] is reconciled against this after every request.
pub(crate) async fn engine_in_transaction(conn: &mut SqliteConnection) -> Result<bool> {
   let mut handle = conn.lock_handle().await?;
   let db: *mut sqlite3 = handle.as_raw_handle().as_ptr();

   // SAFETY: db comes from the locked handle, which keeps the connection
   // alive and unused by anything else until it is dropped below.
   let autocommit = unsafe { sqlite3_get_autocommit(db) };
   drop(handle);

   Ok(autocommit == 0)
}
