//! Flattening of result rows into comma-joined text lines.
//!
//! The first line is always the header, `name:tag` pairs for every column;
//! each following line is one row with cells rendered by [`Cell::render`].
//! Header tags come from the first row's runtime storage classes. When a
//! result has no rows, the header is built from the statement's declared
//! column types so an empty result still names its columns.

use crate::decode::{Cell, CellType};

/// Accumulates marshaled lines for one result set.
#[derive(Debug, Default)]
pub struct RowSetMarshaler {
   header: Option<String>,
   rows: Vec<String>,
}

impl RowSetMarshaler {
   pub fn new() -> Self {
      Self::default()
   }

   /// Append one row; the first row also fixes the header.
   pub fn push_row(&mut self, columns: &[String], cells: &[Cell]) {
      if self.header.is_none() {
         self.header = Some(header_line(
            columns
               .iter()
               .zip(cells)
               .map(|(name, cell)| (name.as_str(), cell.cell_type())),
         ));
      }

      let line = cells.iter().map(Cell::render).collect::<Vec<_>>().join(",");
      self.rows.push(line);
   }

   /// Set the header from declared column types if no row has set it.
   pub fn declare_columns(&mut self, columns: &[(String, CellType)]) {
      if self.header.is_none() {
         self.header = Some(header_line(
            columns.iter().map(|(name, kind)| (name.as_str(), *kind)),
         ));
      }
   }

   pub fn has_header(&self) -> bool {
      self.header.is_some()
   }

   pub fn row_count(&self) -> usize {
      self.rows.len()
   }

   /// Header first, then one line per row.
   pub fn into_lines(self) -> Vec<String> {
      let mut lines = Vec::with_capacity(self.rows.len() + 1);
      lines.push(self.header.unwrap_or_default());
      lines.extend(self.rows);
      lines
   }
}

fn header_line<'a>(columns: impl Iterator<Item = (&'a str, CellType)>) -> String {
   columns
      .map(|(name, kind)| format!("{}:{}", name, kind.tag()))
      .collect::<Vec<_>>()
      .join(",")
}

#[cfg(test)]
mod tests {
   use super::*;

   fn names(columns: &[&str]) -> Vec<String> {
      columns.iter().map(|c| c.to_string()).collect()
   }

   #[test]
   fn mixed_row_marshals_with_tags() {
      let mut marshaler = RowSetMarshaler::new();
      marshaler.push_row(
         &names(&["id", "name", "score", "note"]),
         &[
            Cell::Integer(1),
            Cell::Text("a".into()),
            Cell::Float(3.14159),
            Cell::Null,
         ],
      );

      assert_eq!(
         marshaler.into_lines(),
         vec!["id:integer,name:text,score:float,note:null", "1,a,3.1416,"]
      );
   }

   #[test]
   fn header_comes_from_first_row_only() {
      let columns = names(&["v"]);
      let mut marshaler = RowSetMarshaler::new();
      marshaler.push_row(&columns, &[Cell::Null]);
      marshaler.push_row(&columns, &[Cell::Blob]);
      marshaler.declare_columns(&[("v".into(), CellType::Integer)]);

      assert_eq!(marshaler.row_count(), 2);
      assert_eq!(marshaler.into_lines(), vec!["v:null", "", "blob"]);
   }

   #[test]
   fn empty_result_uses_declared_header() {
      let mut marshaler = RowSetMarshaler::new();
      marshaler.declare_columns(&[
         ("id".into(), CellType::Integer),
         ("body".into(), CellType::Text),
      ]);

      assert_eq!(marshaler.into_lines(), vec!["id:integer,body:text"]);
   }

   #[test]
   fn zero_columns_still_emit_a_header() {
      let marshaler = RowSetMarshaler::new();
      assert!(!marshaler.has_header());
      assert_eq!(marshaler.into_lines(), vec![String::new()]);
   }
}
