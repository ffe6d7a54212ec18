//! Table schemas and storage configuration
//!
//! **SoC:** This module ONLY describes tables, no business logic

use crate::error::{Result, StoreError};
use std::path::Path;

/// Storage configuration (declarative)
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Path to SQLite database (`:memory:` for in-memory)
    pub path: String,
    /// Rows fetched per cursor page
    pub page_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            page_size: 1_000,
        }
    }
}

impl StorageConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_string_lossy().to_string(),
            ..Default::default()
        }
    }
}

/// SQL column affinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    fn sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }
}

/// A table column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub primary_key: bool,
    pub not_null: bool,
    /// SQL literal used as column default.
    pub default: Option<String>,
}

impl Column {
    fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            primary_key: false,
            not_null: false,
            default: None,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Real)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Text)
    }

    /// `INTEGER PRIMARY KEY` columns alias SQLite's rowid.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.not_null = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn default_text(mut self, literal: &str) -> Self {
        self.default = Some(format!("'{}'", literal.replace('\'', "''")));
        self
    }

    fn definition(&self) -> String {
        let mut def = format!("{} {}", self.name, self.ty.sql());
        if self.primary_key {
            def.push_str(" PRIMARY KEY");
        } else if self.not_null {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            def.push_str(" DEFAULT ");
            def.push_str(default);
        }
        def
    }
}

/// Declarative description of a table and its secondary indexes.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub table: String,
    pub columns: Vec<Column>,
    pub indexes: Vec<Vec<String>>,
}

impl Schema {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Add a secondary index over the given columns.
    pub fn index(mut self, columns: &[&str]) -> Self {
        self.indexes
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Check every identifier in the schema.
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.table)?;
        for column in &self.columns {
            validate_identifier(&column.name)?;
        }
        for index in &self.indexes {
            for column in index {
                validate_identifier(column)?;
            }
        }
        Ok(())
    }

    pub(crate) fn create_sql(&self) -> String {
        let columns: Vec<String> = self.columns.iter().map(Column::definition).collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table,
            columns.join(", ")
        )
    }

    pub(crate) fn index_sql(&self) -> Vec<String> {
        self.indexes
            .iter()
            .map(|cols| {
                format!(
                    "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {}({})",
                    self.table,
                    cols.join("_"),
                    self.table,
                    cols.join(", ")
                )
            })
            .collect()
    }
}

/// Table and column names are interpolated into SQL, so only plain
/// identifiers (`[A-Za-z_][A-Za-z0-9_]*`) are accepted.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}
