/// Row Model Module
///
/// Every query result, whatever backend produced it, is exchanged as a
/// `DataTable`: uniquely named text columns and ordered rows of strings.
/// Native driver types never cross this boundary.
use crate::core::{DbError, Result};
use std::collections::BTreeMap;

/// Declared type of every row model column.
pub const TEXT_TYPE: &str = "text";

/// Strips the NUL padding some drivers leave in column labels.
///
/// The label is cut at the first NUL character; labels without one are
/// returned unchanged, so the function is idempotent.
pub fn sanitize_column_name(raw: &str) -> String {
    match raw.find('\0') {
        Some(end) => raw[..end].to_string(),
        None => raw.to_string(),
    }
}

/// Column metadata reported by a backend for one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Sanitized column label
    pub name: String,
    /// Native type name as reported by the driver (may be empty)
    pub type_name: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        ColumnInfo {
            name: name.into(),
            type_name: type_name.into(),
        }
    }

    /// Returns a copy with the label run through [`sanitize_column_name`].
    pub fn sanitized(&self) -> Self {
        ColumnInfo {
            name: sanitize_column_name(&self.name),
            type_name: self.type_name.clone(),
        }
    }
}

/// A column of a [`DataTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataColumn {
    pub name: String,
    pub data_type: &'static str,
}

/// Backend-agnostic tabular result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataTable {
    name: String,
    columns: Vec<DataColumn>,
    rows: Vec<Vec<String>>,
}

impl DataTable {
    /// Creates an empty table with no columns.
    pub fn new(name: impl Into<String>) -> Self {
        DataTable {
            name: name.into(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Creates a table with the given result columns.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Schema` if two columns share a name (compared
    /// case-insensitively).
    pub fn with_columns(name: impl Into<String>, columns: &[ColumnInfo]) -> Result<Self> {
        let mut table = DataTable::new(name);
        for column in columns {
            table.add_column(&column.name)?;
        }
        Ok(table)
    }

    /// Adds a text column.
    pub fn add_column(&mut self, name: &str) -> Result<()> {
        if !self.rows.is_empty() {
            return Err(DbError::Schema(format!(
                "cannot add column '{}' to table '{}' after rows were added",
                name, self.name
            )));
        }
        if self.column_index(name).is_some() {
            return Err(DbError::Schema(format!(
                "column '{}' already belongs to table '{}'",
                name, self.name
            )));
        }
        self.columns.push(DataColumn {
            name: name.to_string(),
            data_type: TEXT_TYPE,
        });
        Ok(())
    }

    /// Appends a row. Its arity must match the column count.
    pub fn push_row(&mut self, row: Vec<String>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(DbError::Schema(format!(
                "row has {} values but table '{}' has {} columns",
                row.len(),
                self.name,
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[DataColumn] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Position of a column, matched case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&[String]> {
        self.rows.get(index).map(|r| r.as_slice())
    }

    /// Value at `row` for the named column.
    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.column_index(column)?;
        self.rows.get(row).map(|r| r[col].as_str())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<Vec<String>> {
        self.rows
    }

    /// Exports the table to a specified format.
    /// Supported formats: CSV, JSON, Markdown.
    pub fn export(&self, format: &str) -> Result<String> {
        match format.to_lowercase().as_str() {
            "csv" => Ok(self.to_csv()),
            "json" => self.to_json(),
            "markdown" => Ok(self.to_markdown()),
            _ => Err(DbError::Config(format!(
                "Unsupported export format: '{}'. Supported formats: csv, json, markdown",
                format
            ))),
        }
    }

    pub fn to_csv(&self) -> String {
        let mut output = String::new();
        if !self.columns.is_empty() {
            let header: Vec<String> = self.columns.iter().map(|c| csv_field(&c.name)).collect();
            output.push_str(&header.join(","));
            output.push('\n');
        }
        for row in &self.rows {
            let fields: Vec<String> = row.iter().map(|v| csv_field(v)).collect();
            output.push_str(&fields.join(","));
            output.push('\n');
        }
        output
    }

    pub fn to_json(&self) -> Result<String> {
        let mut rows = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let mut row_map = BTreeMap::new();
            for (column, value) in self.columns.iter().zip(row) {
                row_map.insert(column.name.as_str(), value.as_str());
            }
            rows.push(row_map);
        }
        Ok(serde_json::to_string(&rows)?)
    }

    pub fn to_markdown(&self) -> String {
        let mut output = String::new();
        if !self.columns.is_empty() {
            output.push_str(&self.column_names().join(" | "));
            output.push('\n');
            let underline: Vec<String> = self
                .columns
                .iter()
                .map(|c| "-".repeat(c.name.len().max(1)))
                .collect();
            output.push_str(&underline.join(" | "));
            output.push('\n');
        }
        for row in &self.rows {
            output.push_str(&row.join(" | "));
            output.push('\n');
        }
        output
    }

    /// Renders the table as an HTML `<table>` with the given `id`.
    ///
    /// `options` is spliced verbatim into the opening tag (e.g.
    /// `class='grid'`). Cell text is HTML-escaped.
    pub fn to_html(&self, id: &str, options: &str) -> String {
        let mut output = format!("<table id='{}' {}><thead><tr>", id, options);
        for column in &self.columns {
            output.push_str(&format!("<th>{}</th>", html_escape(&column.name)));
        }
        output.push_str("</tr></thead><tbody>");
        for row in &self.rows {
            output.push_str("<tr>");
            for value in row {
                output.push_str(&format!("<td>{}</td>", html_escape(value)));
            }
            output.push_str("</tr>");
        }
        output.push_str("</tbody></table>");
        output
    }
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
