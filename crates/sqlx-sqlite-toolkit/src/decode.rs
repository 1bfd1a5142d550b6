//! Decoding of SQLite values into tagged cells

use sqlx::sqlite::{SqliteColumn, SqliteRow, SqliteValueRef};
use sqlx::{Column, Decode, Row, Sqlite, TypeInfo, ValueRef};

use crate::{Error, Result};

/// Storage class of a cell, as tagged in the marshaled header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellType {
   Null,
   Integer,
   Float,
   Text,
   Blob,
}

impl CellType {
   pub fn tag(self) -> &'static str {
      match self {
         CellType::Null => "null",
         CellType::Integer => "integer",
         CellType::Float => "float",
         CellType::Text => "text",
         CellType::Blob => "blob",
      }
   }

   /// Map a declared column type name (as sqlx reports it) to a cell type.
   ///
   /// Used for the header of an empty result, where no runtime value exists.
   /// Unknown and affinity-only declarations map to [`CellType::Null`].
   pub fn from_declared(type_name: &str) -> Self {
      match type_name.to_ascii_uppercase().as_str() {
         "INTEGER" | "BOOLEAN" => CellType::Integer,
         "REAL" => CellType::Float,
         "TEXT" | "DATE" | "TIME" | "DATETIME" => CellType::Text,
         "BLOB" => CellType::Blob,
         _ => CellType::Null,
      }
   }
}

/// One decoded value of a result row.
///
/// Blob payloads are never carried, only their presence.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
   Null,
   Integer(i64),
   Float(f64),
   Text(String),
   Blob,
}

impl Cell {
   pub fn cell_type(&self) -> CellType {
      match self {
         Cell::Null => CellType::Null,
         Cell::Integer(_) => CellType::Integer,
         Cell::Float(_) => CellType::Float,
         Cell::Text(_) => CellType::Text,
         Cell::Blob => CellType::Blob,
      }
   }

   /// Locale-invariant text form of the value.
   pub fn render(&self) -> String {
      match self {
         Cell::Null => String::new(),
         Cell::Integer(v) => v.to_string(),
         Cell::Float(v) => format!("{v:.4}"),
         Cell::Text(v) => v.clone(),
         Cell::Blob => "blob".to_string(),
      }
   }
}

fn decode_err(e: sqlx::error::BoxDynError) -> Error {
   Error::Sqlx(sqlx::Error::Decode(e))
}

/// Decode a raw SQLite value by its runtime storage class.
pub(crate) fn decode_value(value: SqliteValueRef<'_>) -> Result<Cell> {
   if value.is_null() {
      return Ok(Cell::Null);
   }

   let type_name = value.type_info().name().to_string();
   let cell = match type_name.as_str() {
      "INTEGER" | "BOOLEAN" => {
         Cell::Integer(<i64 as Decode<'_, Sqlite>>::decode(value).map_err(decode_err)?)
      }
      "REAL" | "NUMERIC" => {
         Cell::Float(<f64 as Decode<'_, Sqlite>>::decode(value).map_err(decode_err)?)
      }
      "TEXT" | "DATE" | "TIME" | "DATETIME" => {
         Cell::Text(<String as Decode<'_, Sqlite>>::decode(value).map_err(decode_err)?)
      }
      "BLOB" => Cell::Blob,
      _ => return Err(Error::UnsupportedDatatype(type_name)),
   };

   Ok(cell)
}

/// Decode every cell of a row, in column order.
pub(crate) fn decode_row(row: &SqliteRow) -> Result<Vec<Cell>> {
   let mut cells = Vec::with_capacity(row.len());
   for i in 0..row.len() {
      cells.push(decode_value(row.try_get_raw(i)?)?);
   }
   Ok(cells)
}

/// Column names of a row, in order.
pub(crate) fn column_names(row: &SqliteRow) -> Vec<String> {
   row.columns().iter().map(|c| c.name().to_string()).collect()
}

/// Column names and declared types of a prepared statement.
pub(crate) fn declared_columns(columns: &[SqliteColumn]) -> Vec<(String, CellType)> {
   columns
      .iter()
      .map(|c| (c.name().to_string(), CellType::from_declared(c.type_info().name())))
      .collect()
}
