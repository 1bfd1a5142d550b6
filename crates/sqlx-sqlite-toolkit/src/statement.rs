//! SQL shaping for dispatched operations.
//!
//! Builds the final statement text for structured requests and decides
//! whether a caller's row window may be appended to a statement. The row
//! window is only applied when the statement has no LIMIT of its own at the
//! top level; a LIMIT inside a subquery, a comment or a string literal does
//! not count.

use serde_json::Value as JsonValue;
use sqlx::Sqlite;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;

use crate::request::{OperationKind, OperationRequest, RowWindow, Values};
use crate::{Error, Result};

pub(crate) type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Statement text plus the values to bind to its placeholders, in order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Prepared {
   pub sql: String,
   pub args: Vec<JsonValue>,
}

impl Prepared {
   /// Build the sqlx query with every argument bound.
   pub fn query(&self) -> SqliteQuery<'_> {
      let mut q = sqlx::query(&self.sql);
      for value in &self.args {
         q = bind_value(q, value.clone());
      }
      q
   }
}

/// Helper function to bind a JSON value to a SQLx query
pub(crate) fn bind_value(query: SqliteQuery<'_>, value: JsonValue) -> SqliteQuery<'_> {
   match value {
      JsonValue::Null => query.bind(None::<String>),
      JsonValue::String(s) => query.bind(s),
      JsonValue::Bool(b) => query.bind(b),
      JsonValue::Number(number) => {
         // Preserve integer precision by binding as i64 when possible
         if let Some(int_val) = number.as_i64() {
            query.bind(int_val)
         } else if let Some(uint_val) = number.as_u64() {
            // Too large for SQLite's INTEGER, fall back to REAL
            query.bind(uint_val as f64)
         } else {
            query.bind(number.as_f64().unwrap_or_default())
         }
      }
      // Arrays and objects are stored as their JSON text
      other => query.bind(other.to_string()),
   }
}

/// Validate that a table or column name is safe for SQL interpolation.
///
/// Accepts names matching `[a-zA-Z_][a-zA-Z0-9_.]*`, which covers plain
/// names, schema-qualified names (e.g., `main.notes`), and underscored
/// identifiers.
pub(crate) fn validate_column_name(name: &str) -> Result<()> {
   let mut chars = name.chars();
   let valid_first = chars
      .next()
      .is_some_and(|first| first.is_ascii_alphabetic() || first == '_');

   if !valid_first || !chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '.') {
      return Err(Error::InvalidColumnName {
         name: name.to_string(),
      });
   }

   Ok(())
}

/// Quote an identifier with double quotes, one part per dot.
///
/// Any embedded double quotes are doubled per SQL standard (`"` → `""`).
pub(crate) fn quote_identifier(name: &str) -> String {
   name
      .split('.')
      .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
      .collect::<Vec<_>>()
      .join(".")
}

/// Cursor over an uppercased statement that steps over quoted text and
/// comments while tracking parenthesis depth.
struct TopLevelScanner {
   bytes: Vec<u8>,
   pos: usize,
   depth: i32,
}

impl TopLevelScanner {
   fn new(sql: &str) -> Self {
      Self {
         bytes: sql.to_ascii_uppercase().into_bytes(),
         pos: 0,
         depth: 0,
      }
   }

   /// Offset of the next byte at depth 0 that is outside quotes and comments.
   fn next_top_level(&mut self) -> Option<usize> {
      while self.pos < self.bytes.len() {
         let at = self.pos;
         self.pos += 1;

         match self.bytes[at] {
            b'(' => self.depth += 1,
            b')' => self.depth -= 1,
            quote @ (b'\'' | b'"' | b'`') => self.skip_quoted(quote),
            b'[' => self.skip_past(b"]"),
            b'-' if self.peek() == Some(b'-') => self.skip_past(b"\n"),
            b'/' if self.peek() == Some(b'*') => {
               self.pos += 1;
               self.skip_past(b"*/");
            }
            _ if self.depth == 0 => return Some(at),
            _ => {}
         }
      }

      None
   }

   fn peek(&self) -> Option<u8> {
      self.bytes.get(self.pos).copied()
   }

   /// Move past the next occurrence of `end`, or to the end of input.
   fn skip_past(&mut self, end: &[u8]) {
      match self.bytes[self.pos..].windows(end.len()).position(|w| w == end) {
         Some(offset) => self.pos += offset + end.len(),
         None => self.pos = self.bytes.len(),
      }
   }

   /// Move past a quoted run; a doubled quote is an escaped one.
   fn skip_quoted(&mut self, quote: u8) {
      loop {
         self.skip_past(&[quote]);
         if self.peek() != Some(quote) {
            return;
         }
         self.pos += 1;
      }
   }

   /// `keyword` starts at `at` as a whole word.
   fn keyword_at(&self, at: usize, keyword: &[u8]) -> bool {
      let end = at + keyword.len();
      let is_word = |b: &u8| b.is_ascii_alphanumeric() || *b == b'_';

      self.bytes.get(at..end) == Some(keyword)
         && (at == 0 || !is_word(&self.bytes[at - 1]))
         && !self.bytes.get(end).is_some_and(is_word)
   }

   /// First byte after any whitespace starting at `from`.
   fn skip_whitespace(&self, from: usize) -> usize {
      from
         + self.bytes[from.min(self.bytes.len())..]
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count()
   }
}

/// Detect whether a statement carries its own top-level LIMIT.
pub(crate) fn has_top_level_limit(sql: &str) -> bool {
   let mut scanner = TopLevelScanner::new(sql);
   while let Some(at) = scanner.next_top_level() {
      if scanner.keyword_at(at, b"LIMIT") {
         return true;
      }
   }
   false
}

/// Detect whether a statement already orders its result at the top level.
pub(crate) fn has_top_level_order_by(sql: &str) -> bool {
   let mut scanner = TopLevelScanner::new(sql);
   while let Some(at) = scanner.next_top_level() {
      if !scanner.keyword_at(at, b"ORDER") {
         continue;
      }
      let after = at + b"ORDER".len();
      let by = scanner.skip_whitespace(after);
      if by > after && scanner.keyword_at(by, b"BY") {
         return true;
      }
   }
   false
}

/// Strip trailing whitespace and semicolons so clauses can be appended.
fn strip_terminator(sql: &str) -> &str {
   sql.trim().trim_end_matches(';').trim_end()
}

/// Appended clauses start on their own line so a trailing `--` comment in
/// raw SQL cannot swallow them.
fn append_row_window(sql: &mut String, window: RowWindow) -> Result<()> {
   let window = RowWindow::new(window.start, window.end)?;
   sql.push_str(&format!("\nLIMIT {} OFFSET {}", window.len(), window.start));
   Ok(())
}

/// Build the statement for a `query` or `pragma` request.
///
/// Raw statements get the caller's sort order appended when they do not
/// order or limit themselves. Structured requests are assembled from
/// target, projection, selection and sort order. The row window is added
/// last, and never to pragmas or statements with their own LIMIT.
pub(crate) fn build_query(request: &OperationRequest) -> Result<Prepared> {
   let mut sql = match request.raw_sql() {
      Some(raw) => {
         let mut sql = strip_terminator(raw).to_string();
         if let Some(order) = non_empty(&request.sort_order)
            && request.kind != OperationKind::Pragma
            && !has_top_level_order_by(&sql)
            && !has_top_level_limit(&sql)
         {
            sql.push_str(&format!("\nORDER BY {order}"));
         }
         sql
      }
      None if request.kind == OperationKind::Pragma => {
         return Err(Error::MissingSql(request.kind));
      }
      None => build_select(request)?,
   };

   if request.kind != OperationKind::Pragma
      && let Some(window) = request.row_window
      && !has_top_level_limit(&sql)
   {
      append_row_window(&mut sql, window)?;
   }

   Ok(Prepared {
      sql,
      args: request.selection_args.clone(),
   })
}

fn build_select(request: &OperationRequest) -> Result<String> {
   let target = request.require_target()?;
   validate_column_name(target)?;

   let columns = match &request.projection {
      Some(projection) if !projection.is_empty() => projection.join(", "),
      _ => "*".to_string(),
   };

   let mut sql = format!("SELECT {} FROM {}", columns, quote_identifier(target));
   if let Some(selection) = non_empty(&request.selection) {
      sql.push_str(&format!(" WHERE {selection}"));
   }
   if let Some(order) = non_empty(&request.sort_order) {
      sql.push_str(&format!(" ORDER BY {order}"));
   }

   Ok(sql)
}

/// Build a structured INSERT of one value set into `target`.
pub(crate) fn build_insert(target: &str, values: &Values) -> Result<Prepared> {
   validate_column_name(target)?;

   if values.is_empty() {
      return Ok(Prepared {
         sql: format!("INSERT INTO {} DEFAULT VALUES", quote_identifier(target)),
         args: Vec::new(),
      });
   }

   let mut columns = Vec::with_capacity(values.len());
   for column in values.keys() {
      validate_column_name(column)?;
      columns.push(quote_identifier(column));
   }
   let placeholders = vec!["?"; values.len()].join(", ");

   Ok(Prepared {
      sql: format!(
         "INSERT INTO {} ({}) VALUES ({})",
         quote_identifier(target),
         columns.join(", "),
         placeholders
      ),
      args: values.values().cloned().collect(),
   })
}

/// Build a structured UPDATE of `target`; value placeholders precede selection args.
pub(crate) fn build_update(request: &OperationRequest) -> Result<Prepared> {
   let target = request.require_target()?;
   validate_column_name(target)?;

   let values = request
      .values
      .as_ref()
      .filter(|values| !values.is_empty())
      .ok_or(Error::MissingValues(request.kind))?;

   let mut assignments = Vec::with_capacity(values.len());
   for column in values.keys() {
      validate_column_name(column)?;
      assignments.push(format!("{} = ?", quote_identifier(column)));
   }

   let mut sql = format!(
      "UPDATE {} SET {}",
      quote_identifier(target),
      assignments.join(", ")
   );
   if let Some(selection) = non_empty(&request.selection) {
      sql.push_str(&format!(" WHERE {selection}"));
   }

   let mut args: Vec<JsonValue> = values.values().cloned().collect();
   args.extend(request.selection_args.iter().cloned());

   Ok(Prepared { sql, args })
}

/// Build a structured DELETE from `target`.
pub(crate) fn build_delete(request: &OperationRequest) -> Result<Prepared> {
   let target = request.require_target()?;
   validate_column_name(target)?;

   let mut sql = format!("DELETE FROM {}", quote_identifier(target));
   if let Some(selection) = non_empty(&request.selection) {
      sql.push_str(&format!(" WHERE {selection}"));
   }

   Ok(Prepared {
      sql,
      args: request.selection_args.clone(),
   })
}

fn non_empty(value: &Option<String>) -> Option<&str> {
   value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
