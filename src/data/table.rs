// In-memory tabular values shared by all operations.
//
// A Table is an ordered list of named columns over rows of JSON values.
// Feature records come back from the API as opaque JSON maps, so the cells
// use the same value type.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("row has {got} cells, table has {expected} columns")]
    RowLength { expected: usize, got: usize },
}

/// An ordered sequence of rows with named columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Create an empty table with the given column names.
    pub fn new<S: Into<String>>(columns: Vec<S>) -> Self {
        Table {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Build a table from parallel columns of equal length.
    pub fn from_columns(columns: Vec<(&str, Vec<Value>)>) -> Self {
        let names: Vec<String> = columns.iter().map(|(name, _)| name.to_string()).collect();
        let row_count = columns.first().map(|(_, values)| values.len()).unwrap_or(0);
        let mut values: Vec<Vec<Value>> = columns.into_iter().map(|(_, v)| v).collect();

        let mut rows = Vec::with_capacity(row_count);
        for _ in 0..row_count {
            let row: Vec<Value> = values.iter_mut().map(|col| col.remove(0)).collect();
            rows.push(row);
        }

        Table {
            columns: names,
            rows,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row. The cell count must match the column count.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowLength {
                expected: self.columns.len(),
                got: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Position of a column by name.
    pub fn column_index(&self, name: &str) -> Result<usize, TableError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| TableError::UnknownColumn(name.to_string()))
    }

    /// A single cell, if both indices are in range.
    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column).ok()?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Extract a column as text. String cells are taken verbatim; other
    /// values are rendered through their JSON representation.
    pub fn text_column(&self, name: &str) -> Result<Vec<String>, TableError> {
        let idx = self.column_index(name)?;
        Ok(self
            .rows
            .iter()
            .map(|row| match &row[idx] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_columns_builds_rows() {
        let table = Table::from_columns(vec![
            ("id", vec![json!("a"), json!("b")]),
            ("name", vec![json!("Alpha"), json!("Beta")]),
        ]);

        assert_eq!(table.columns(), &["id".to_string(), "name".to_string()]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.cell(1, "name"), Some(&json!("Beta")));
    }

    #[test]
    fn test_push_row_rejects_wrong_length() {
        let mut table = Table::new(vec!["a", "b"]);
        let err = table.push_row(vec![json!(1)]).unwrap_err();
        assert!(matches!(err, TableError::RowLength { expected: 2, got: 1 }));
    }

    #[test]
    fn test_text_column_stringifies_non_strings() {
        let table = Table::from_columns(vec![("q", vec![json!("hello"), json!(42)])]);
        let texts = table.text_column("q").unwrap();
        assert_eq!(texts, vec!["hello".to_string(), "42".to_string()]);
    }

    #[test]
    fn test_unknown_column_is_an_error() {
        let table = Table::new(vec!["a"]);
        assert!(matches!(
            table.text_column("missing"),
            Err(TableError::UnknownColumn(_))
        ));
    }
}
