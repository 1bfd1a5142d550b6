//! Operation dispatch against the owned connection.
//!
//! A [`Session`] is the owned connection together with its transaction
//! state. It must live on exactly one execution context; every request for
//! the database goes through [`Session::dispatch`], one at a time.
//!
//! Dispatch never fails as a Rust error. Engine, validation and state
//! faults are rendered into the response as `Exception: <detail>`, and a
//! canceled query answers `canceled`.

use std::path::Path;

use futures::TryStreamExt;
use sqlx::{Executor, Statement};
use sqlx_sqlite_conn_mgr::{ConnectionConfig, OwnedConnection};
use tracing::{debug, trace, warn};

use crate::cancel::CancelFlag;
use crate::decode::{column_names, declared_columns, decode_row};
use crate::marshal::RowSetMarshaler;
use crate::request::{OperationKind, OperationRequest, TransactionAction, Values};
use crate::response::{BatchFailure, OperationResponse, OperationResult};
use crate::statement::{Prepared, build_delete, build_insert, build_query, build_update};
use crate::transaction::{TransactionState, engine_in_transaction, statement_for};
use crate::{Error, Result};

/// Result line plus any marshaled row lines.
type Outcome = (OperationResult, Vec<String>);

/// What closing the session did to an open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CloseOutcome {
   /// An open transaction was rolled back because the session closed
   pub rolled_back: bool,
}

/// The owned connection and the transaction state that spans requests.
#[derive(Debug)]
pub struct Session {
   conn: OwnedConnection,
   transaction: TransactionState,
   close_requested: bool,
}

impl Session {
   /// Open the named database inside `storage_dir`.
   pub async fn open(storage_dir: &Path, name: &str, config: &ConnectionConfig) -> Result<Self> {
      let conn = OwnedConnection::open(storage_dir, name, config).await?;
      Ok(Self::new(conn))
   }

   pub fn new(conn: OwnedConnection) -> Self {
      Self {
         conn,
         transaction: TransactionState::NoTransaction,
         close_requested: false,
      }
   }

   pub fn database(&self) -> &str {
      self.conn.name()
   }

   pub fn transaction_state(&self) -> TransactionState {
      self.transaction
   }

   /// A `closeConnection` request has been dispatched; the owner should
   /// close the session and stop taking requests.
   pub fn close_requested(&self) -> bool {
      self.close_requested
   }

   /// Execute one request and build its response.
   pub async fn dispatch(
      &mut self,
      request: &OperationRequest,
      cancel: &CancelFlag,
   ) -> OperationResponse {
      trace!(database = %self.database(), kind = %request.kind, "Dispatching operation");

      let outcome = self.run(request, cancel).await;
      match self.reconcile_transaction(outcome).await {
         Ok((result, rows)) => OperationResponse::new(request, result).with_rows(rows),
         Err(e) => {
            debug!(
               database = %self.database(),
               kind = %request.kind,
               code = %e.error_code(),
               "Operation failed: {}",
               e
            );
            OperationResponse::new(request, OperationResult::from_error(&e))
         }
      }
   }

   async fn run(&mut self, request: &OperationRequest, cancel: &CancelFlag) -> Result<Outcome> {
      match request.kind {
         OperationKind::Query | OperationKind::Pragma => self.query(request, cancel).await,
         OperationKind::Insert | OperationKind::Update | OperationKind::Delete => {
            match request.raw_sql() {
               Some(sql) => self.raw_write(sql, request).await,
               None => self.structured_write(request).await,
            }
         }
         kind if kind.is_ddl() => {
            let sql = request.require_sql()?;
            sqlx::raw_sql(sql).execute(&mut *self.conn).await?;
            Ok((OperationResult::Bool(true), Vec::new()))
         }
         OperationKind::Batch => self.batch_insert(request).await,
         OperationKind::Transaction => {
            let action: TransactionAction = request.require_sql()?.parse()?;
            self.apply_transaction(action).await?;
            Ok((OperationResult::Bool(true), Vec::new()))
         }
         OperationKind::ForeignKeys => {
            let enable = request.enable.ok_or(Error::MissingValues(request.kind))?;
            let applied = self.set_foreign_keys(enable).await?;
            Ok((OperationResult::Bool(applied), Vec::new()))
         }
         OperationKind::InTransaction => {
            Ok((OperationResult::Bool(self.transaction.is_active()), Vec::new()))
         }
         OperationKind::CloseConnection => {
            let rolled_back = self.end_transaction_for_close().await;
            self.close_requested = true;
            Ok((
               OperationResult::Bool(true),
               vec![format!("rolledBack:{rolled_back}")],
            ))
         }
         kind => Err(Error::UnsupportedKind(kind)),
      }
   }

   /// Stream rows through the marshaler, checking for cancellation per row.
   async fn query(&mut self, request: &OperationRequest, cancel: &CancelFlag) -> Result<Outcome> {
      let prepared = build_query(request)?;
      cancel.check()?;

      let mut marshaler = RowSetMarshaler::new();
      {
         let mut rows = prepared.query().fetch(&mut *self.conn);
         let mut columns: Option<Vec<String>> = None;

         // Returning early drops the stream, which resets the statement
         while let Some(row) = rows.try_next().await? {
            cancel.check()?;
            let names = columns.get_or_insert_with(|| column_names(&row));
            marshaler.push_row(names, &decode_row(&row)?);
         }
      }

      if !marshaler.has_header() {
         let statement = (&mut *self.conn).prepare(prepared.sql.as_str()).await?;
         marshaler.declare_columns(&declared_columns(statement.columns()));
      }

      let count = marshaler.row_count() as u64;
      Ok((OperationResult::Count(count), marshaler.into_lines()))
   }

   /// Raw write; the changed-row count comes from SQLite's `changes()`.
   async fn raw_write(&mut self, sql: &str, request: &OperationRequest) -> Result<Outcome> {
      let prepared = Prepared {
         sql: sql.to_string(),
         args: request.selection_args.clone(),
      };
      prepared.query().execute(&mut *self.conn).await?;

      let (changes,): (i64,) = sqlx::query_as("SELECT changes()")
         .fetch_one(&mut *self.conn)
         .await?;

      Ok((OperationResult::Count(changes.max(0) as u64), Vec::new()))
   }

   async fn structured_write(&mut self, request: &OperationRequest) -> Result<Outcome> {
      let result = match request.kind {
         OperationKind::Insert => {
            let target = request.require_target()?;
            let values = request.values.as_ref().ok_or(Error::MissingValues(request.kind))?;
            OperationResult::RowId(self.insert_one(target, values).await?)
         }
         OperationKind::Update => {
            let prepared = build_update(request)?;
            let done = prepared.query().execute(&mut *self.conn).await?;
            OperationResult::Count(done.rows_affected())
         }
         _ => {
            let prepared = build_delete(request)?;
            let done = prepared.query().execute(&mut *self.conn).await?;
            OperationResult::Count(done.rows_affected())
         }
      };

      Ok((result, Vec::new()))
   }

   async fn insert_one(&mut self, target: &str, values: &Values) -> Result<i64> {
      let prepared = build_insert(target, values)?;
      let done = prepared.query().execute(&mut *self.conn).await?;
      Ok(done.last_insert_rowid())
   }

   /// Insert value sets in order, stopping at the first failure.
   ///
   /// Outside a transaction each insert commits on its own, so rows before
   /// the failure stay written.
   async fn batch_insert(&mut self, request: &OperationRequest) -> Result<Outcome> {
      let target = request.require_target()?;
      if request.batch_values.is_empty() {
         return Err(Error::MissingValues(request.kind));
      }

      let mut succeeded = 0;
      for (index, values) in request.batch_values.iter().enumerate() {
         if let Err(e) = self.insert_one(target, values).await {
            debug!(database = %self.database(), index, "Batch insert stopped: {}", e);
            let failed_at = Some(BatchFailure {
               index,
               detail: e.to_string(),
            });
            return Ok((OperationResult::Batch { succeeded, failed_at }, Vec::new()));
         }
         succeeded += 1;
      }

      Ok((
         OperationResult::Batch {
            succeeded,
            failed_at: None,
         },
         Vec::new(),
      ))
   }

   async fn apply_transaction(&mut self, action: TransactionAction) -> Result<()> {
      let next = self.transaction.transition(action, self.conn.name())?;

      sqlx::query(statement_for(action))
         .execute(&mut *self.conn)
         .await?;

      debug!(database = %self.database(), ?action, "Transaction state changed");
      self.transaction = next;
      Ok(())
   }

   /// Bring the tracked state in line with the engine after a request.
   ///
   /// A transaction the engine ended on its own drops to `NoTransaction`, and
   /// a failure that caused it says so. One opened by raw `BEGIN` is tracked.
   async fn reconcile_transaction(&mut self, outcome: Result<Outcome>) -> Result<Outcome> {
      if self.close_requested {
         return outcome;
      }

      let engine_active = match engine_in_transaction(&mut *self.conn).await {
         Ok(active) => active,
         Err(e) => {
            warn!(database = %self.database(), "Failed to read transaction state: {}", e);
            return outcome;
         }
      };

      match (self.transaction, engine_active) {
         (TransactionState::InTransaction, false) => {
            warn!(database = %self.database(), "Transaction ended by the engine");
            self.transaction = TransactionState::NoTransaction;
            outcome.map_err(|e| Error::TransactionRolledBack {
               database: self.database().to_string(),
               source: Box::new(e),
            })
         }
         (TransactionState::NoTransaction, true) => {
            debug!(database = %self.database(), "Transaction opened by statement");
            self.transaction = TransactionState::InTransaction;
            outcome
         }
         _ => outcome,
      }
   }

   /// Toggle foreign key enforcement; true when the setting took effect.
   ///
   /// SQLite ignores the pragma inside a transaction, which reports false.
   async fn set_foreign_keys(&mut self, enable: bool) -> Result<bool> {
      let pragma = if enable {
         "PRAGMA foreign_keys = ON"
      } else {
         "PRAGMA foreign_keys = OFF"
      };
      sqlx::query(pragma).execute(&mut *self.conn).await?;

      let (current,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
         .fetch_one(&mut *self.conn)
         .await?;

      Ok((current != 0) == enable)
   }

   /// Roll back an open transaction before the connection goes away.
   async fn end_transaction_for_close(&mut self) -> bool {
      if !self.transaction.is_active() {
         return false;
      }

      warn!(
         database = %self.database(),
         "Closing with an open transaction, rolling back uncommitted work"
      );
      if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *self.conn).await {
         // Closing the connection discards the transaction regardless
         warn!(database = %self.database(), "Rollback before close failed: {}", e);
      }
      self.transaction = TransactionState::NoTransaction;
      true
   }

   /// Roll back any open transaction and close the connection.
   pub async fn close(mut self) -> Result<CloseOutcome> {
      let rolled_back = self.end_transaction_for_close().await;
      self.conn.close().await?;
      Ok(CloseOutcome { rolled_back })
   }
}
