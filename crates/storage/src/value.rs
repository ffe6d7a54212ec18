//! Column values and records.
//!
//! A [`Record`] is an ordered list of `(column, value)` pairs. Numeric
//! accessors map SQL `NULL` to `NaN`, which is how non-finite values round
//! trip through SQLite.

use crate::error::{Result, StoreError};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::ToSql;

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
        }
    }

    pub(crate) fn from_sql(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Text(String::from_utf8_lossy(b).into_owned()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            // SQLite has no NaN; non-finite values are stored as NULL
            Value::Real(f) if !f.is_finite() => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// An ordered set of column values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`Record::set`].
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Set a column, replacing an existing value in place.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let position = self.fields.iter().position(|(c, _)| c == column)?;
        Some(self.fields.remove(position).1)
    }

    fn require(&self, column: &str) -> Result<&Value> {
        self.get(column).ok_or_else(|| StoreError::MissingColumn {
            column: column.to_string(),
        })
    }

    fn mismatch(column: &str, expected: &'static str, found: &Value) -> StoreError {
        StoreError::TypeMismatch {
            column: column.to_string(),
            expected,
            found: found.type_name(),
        }
    }

    pub fn integer(&self, column: &str) -> Result<i64> {
        match self.require(column)? {
            Value::Integer(i) => Ok(*i),
            other => Err(Self::mismatch(column, "integer", other)),
        }
    }

    /// Real value; `NULL` reads as `NaN`.
    pub fn real(&self, column: &str) -> Result<f64> {
        match self.require(column)? {
            Value::Real(f) => Ok(*f),
            Value::Integer(i) => Ok(*i as f64),
            Value::Null => Ok(f64::NAN),
            other => Err(Self::mismatch(column, "real", other)),
        }
    }

    pub fn text(&self, column: &str) -> Result<&str> {
        match self.require(column)? {
            Value::Text(s) => Ok(s),
            other => Err(Self::mismatch(column, "text", other)),
        }
    }

    pub fn boolean(&self, column: &str) -> Result<bool> {
        self.integer(column).map(|i| i != 0)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields.iter().map(|(c, _)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.fields.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
