//! Operation requests as a caller describes them

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{Error, Result};

/// Column name to bind value, in caller order.
pub type Values = IndexMap<String, JsonValue>;

/// Dispatch key of an operation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
   Query,
   Insert,
   Update,
   Delete,
   Pragma,
   Ddl,
   Table,
   View,
   Trigger,
   Index,
   Batch,
   Transaction,
   ForeignKeys,
   CloseConnection,
   InTransaction,
}

impl OperationKind {
   /// Wire name of the kind, echoed back in every response.
   pub fn as_str(self) -> &'static str {
      match self {
         OperationKind::Query => "query",
         OperationKind::Insert => "insert",
         OperationKind::Update => "update",
         OperationKind::Delete => "delete",
         OperationKind::Pragma => "pragma",
         OperationKind::Ddl => "ddl",
         OperationKind::Table => "table",
         OperationKind::View => "view",
         OperationKind::Trigger => "trigger",
         OperationKind::Index => "index",
         OperationKind::Batch => "batch",
         OperationKind::Transaction => "transaction",
         OperationKind::ForeignKeys => "foreignKeys",
         OperationKind::CloseConnection => "closeConnection",
         OperationKind::InTransaction => "inTransaction",
      }
   }

   /// Kinds whose raw statement is a schema script with a boolean result.
   pub fn is_ddl(self) -> bool {
      matches!(
         self,
         OperationKind::Ddl
            | OperationKind::Table
            | OperationKind::View
            | OperationKind::Trigger
            | OperationKind::Index
      )
   }
}

impl fmt::Display for OperationKind {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}

/// Half-open window `[start, end)` of result rows to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowWindow {
   pub start: u64,
   pub end: u64,
}

impl RowWindow {
   pub fn new(start: u64, end: u64) -> Result<Self> {
      if end < start {
         return Err(Error::InvalidRowWindow { start, end });
      }
      Ok(Self { start, end })
   }

   /// Number of rows the window admits.
   pub fn len(&self) -> u64 {
      self.end.saturating_sub(self.start)
   }

   pub fn is_empty(&self) -> bool {
      self.len() == 0
   }
}

/// Transaction control carried by a `transaction` request's `sql` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionAction {
   Begin,
   Commit,
   Rollback,
}

impl FromStr for TransactionAction {
   type Err = Error;

   /// Accepts `begin`, `commit` (or `end`) and `rollback`, in any case, with
   /// an optional trailing `transaction` and semicolon.
   fn from_str(s: &str) -> Result<Self> {
      let normalized = s.trim().trim_end_matches(';').to_ascii_lowercase();
      let mut words = normalized.split_whitespace();

      let action = match words.next() {
         Some("begin") => TransactionAction::Begin,
         Some("commit") | Some("end") => TransactionAction::Commit,
         Some("rollback") => TransactionAction::Rollback,
         _ => return Err(Error::InvalidTransactionAction(s.to_string())),
      };

      match (words.next(), words.next()) {
         (None, None) | (Some("transaction"), None) => Ok(action),
         _ => Err(Error::InvalidTransactionAction(s.to_string())),
      }
   }
}

/// One caller-issued database action.
///
/// A raw `sql` statement takes precedence over the structured fields
/// (`target`, `projection`, `selection`, `values`) wherever both are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
   pub kind: OperationKind,
   #[serde(default)]
   pub sql: Option<String>,
   /// Table name for structured operations
   #[serde(default)]
   pub target: Option<String>,
   #[serde(default)]
   pub projection: Option<Vec<String>>,
   /// WHERE clause body, without the keyword
   #[serde(default)]
   pub selection: Option<String>,
   #[serde(default)]
   pub selection_args: Vec<JsonValue>,
   /// ORDER BY clause body, without the keyword
   #[serde(default)]
   pub sort_order: Option<String>,
   #[serde(default)]
   pub row_window: Option<RowWindow>,
   #[serde(default)]
   pub values: Option<Values>,
   #[serde(default)]
   pub batch_values: Vec<Values>,
   /// Foreign key toggle for `foreignKeys` requests
   #[serde(default)]
   pub enable: Option<bool>,
   /// Opaque caller value echoed back in the response
   #[serde(default)]
   pub display_flag: String,
}

impl OperationRequest {
   /// Request with nothing but a kind.
   pub fn new(kind: OperationKind) -> Self {
      Self {
         kind,
         sql: None,
         target: None,
         projection: None,
         selection: None,
         selection_args: Vec::new(),
         sort_order: None,
         row_window: None,
         values: None,
         batch_values: Vec::new(),
         enable: None,
         display_flag: String::new(),
      }
   }

   /// Request carrying a raw statement.
   pub fn raw(kind: OperationKind, sql: impl Into<String>) -> Self {
      Self {
         sql: Some(sql.into()),
         ..Self::new(kind)
      }
   }

   /// Structured request against a table.
   pub fn structured(kind: OperationKind, target: impl Into<String>) -> Self {
      Self {
         target: Some(target.into()),
         ..Self::new(kind)
      }
   }

   /// Transaction control request.
   pub fn transaction(action: TransactionAction) -> Self {
      let sql = match action {
         TransactionAction::Begin => "begin",
         TransactionAction::Commit => "commit",
         TransactionAction::Rollback => "rollback",
      };
      Self::raw(OperationKind::Transaction, sql)
   }

   pub fn with_projection<I, S>(mut self, columns: I) -> Self
   where
      I: IntoIterator<Item = S>,
      S: Into<String>,
   {
      self.projection = Some(columns.into_iter().map(Into::into).collect());
      self
   }

   pub fn with_selection(mut self, selection: impl Into<String>, args: Vec<JsonValue>) -> Self {
      self.selection = Some(selection.into());
      self.selection_args = args;
      self
   }

   /// Values for the `?` placeholders of a raw statement.
   pub fn with_selection_args(mut self, args: Vec<JsonValue>) -> Self {
      self.selection_args = args;
      self
   }

   pub fn with_sort_order(mut self, sort_order: impl Into<String>) -> Self {
      self.sort_order = Some(sort_order.into());
      self
   }

   pub fn with_row_window(mut self, window: RowWindow) -> Self {
      self.row_window = Some(window);
      self
   }

   pub fn with_values(mut self, values: Values) -> Self {
      self.values = Some(values);
      self
   }

   pub fn with_batch_values(mut self, batch: Vec<Values>) -> Self {
      self.batch_values = batch;
      self
   }

   pub fn with_display_flag(mut self, flag: impl Into<String>) -> Self {
      self.display_flag = flag.into();
      self
   }

   /// Non-empty raw statement, if any.
   pub(crate) fn raw_sql(&self) -> Option<&str> {
      self
         .sql
         .as_deref()
         .map(str::trim)
         .filter(|sql| !sql.is_empty())
   }

   pub(crate) fn require_sql(&self) -> Result<&str> {
      self.raw_sql().ok_or(Error::MissingSql(self.kind))
   }

   pub(crate) fn require_target(&self) -> Result<&str> {
      self
         .target
         .as_deref()
         .map(str::trim)
         .filter(|target| !target.is_empty())
         .ok_or(Error::MissingTarget(self.kind))
   }
}
