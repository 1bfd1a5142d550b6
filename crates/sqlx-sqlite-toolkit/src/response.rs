//! Operation responses as flat string sequences

use std::fmt;

use serde::{Serialize, Serializer};

use crate::Error;
use crate::request::{OperationKind, OperationRequest};

/// First failure of a batch insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
   /// 0-based index of the value set that failed
   pub index: usize,
   pub detail: String,
}

/// Outcome of one operation, rendered as the first response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
   /// Rows returned by a query, or rows changed by a write
   Count(u64),
   /// Row id assigned by a structured insert
   RowId(i64),
   Bool(bool),
   Batch {
      succeeded: usize,
      failed_at: Option<BatchFailure>,
   },
   Exception(String),
   Canceled,
}

impl OperationResult {
   /// Render a dispatch error the way the response boundary carries it.
   pub fn from_error(error: &Error) -> Self {
      match error {
         Error::Canceled => OperationResult::Canceled,
         other => OperationResult::Exception(other.to_string()),
      }
   }

   pub fn is_exception(&self) -> bool {
      match self {
         OperationResult::Exception(_) => true,
         OperationResult::Batch { failed_at, .. } => failed_at.is_some(),
         _ => false,
      }
   }
}

impl fmt::Display for OperationResult {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         OperationResult::Count(n) => write!(f, "{n}"),
         OperationResult::RowId(id) => write!(f, "{id}"),
         OperationResult::Bool(b) => write!(f, "{b}"),
         OperationResult::Batch {
            succeeded,
            failed_at: None,
         } => write!(f, "{succeeded}"),
         OperationResult::Batch {
            succeeded,
            failed_at: Some(failure),
         } => write!(
            f,
            "Exception: batch insert failed at index {} after {} successful inserts: {}",
            failure.index, succeeded, failure.detail
         ),
         OperationResult::Exception(detail) => write!(f, "Exception: {detail}"),
         OperationResult::Canceled => f.write_str("canceled"),
      }
   }
}

/// Everything delivered back for one request.
///
/// On the wire this is the sequence `[result, sql, kind, target,
/// displayFlag]` followed by any marshaled row lines.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResponse {
   pub result: OperationResult,
   pub sql: String,
   pub kind: OperationKind,
   pub target: String,
   pub display_flag: String,
   pub rows: Vec<String>,
}

impl OperationResponse {
   /// Response echoing the request's identifying fields.
   pub fn new(request: &OperationRequest, result: OperationResult) -> Self {
      Self {
         result,
         sql: request.sql.clone().unwrap_or_default(),
         kind: request.kind,
         target: request.target.clone().unwrap_or_default(),
         display_flag: request.display_flag.clone(),
         rows: Vec::new(),
      }
   }

   pub fn exception(request: &OperationRequest, detail: impl Into<String>) -> Self {
      Self::new(request, OperationResult::Exception(detail.into()))
   }

   pub fn with_rows(mut self, rows: Vec<String>) -> Self {
      self.rows = rows;
      self
   }

   pub fn lines(&self) -> Vec<String> {
      self.clone().into_lines()
   }

   pub fn into_lines(self) -> Vec<String> {
      let mut lines = Vec::with_capacity(5 + self.rows.len());
      lines.push(self.result.to_string());
      lines.push(self.sql);
      lines.push(self.kind.as_str().to_string());
      lines.push(self.target);
      lines.push(self.display_flag);
      lines.extend(self.rows);
      lines
   }
}

impl Serialize for OperationResponse {
   fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
      serializer.collect_seq(self.lines())
   }
}
