//! Selection criteria and ordering.
//!
//! Criteria are a conjunction of `column <op> value` conditions. Column names
//! are validated when the SQL is built; values are always bound as parameters.

use crate::error::Result;
use crate::schema::validate_identifier;
use crate::value::Value;

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Operator {
    fn sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
        }
    }
}

/// Logical AND of conditions. An empty criteria matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    conditions: Vec<(String, Operator, Value)>,
}

impl Criteria {
    /// Criteria matching every row.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn and(mut self, column: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), op, value.into()));
        self
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and(column, Operator::Eq, value)
    }

    pub fn gt(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and(column, Operator::Gt, value)
    }

    pub fn ge(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and(column, Operator::Ge, value)
    }

    pub fn lt(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and(column, Operator::Lt, value)
    }

    pub fn le(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and(column, Operator::Le, value)
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// SQL predicate (without `WHERE`) and its parameters.
    ///
    /// Returns `"1"` for empty criteria so callers can always append `AND ...`.
    pub(crate) fn to_sql(&self) -> Result<(String, Vec<Value>)> {
        if self.conditions.is_empty() {
            return Ok(("1".to_string(), Vec::new()));
        }
        let mut parts = Vec::with_capacity(self.conditions.len());
        let mut params = Vec::with_capacity(self.conditions.len());
        for (column, op, value) in &self.conditions {
            validate_identifier(column)?;
            parts.push(format!("{} {} ?", column, op.sql()));
            params.push(value.clone());
        }
        Ok((parts.join(" AND "), params))
    }
}

/// Ordered list of `(column, ascending)` pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Order {
    fields: Vec<(String, bool)>,
}

impl Order {
    /// No explicit order (rowid order).
    pub fn none() -> Self {
        Self::default()
    }

    pub fn asc(column: impl Into<String>) -> Self {
        Self::none().then_asc(column)
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self::none().then_desc(column)
    }

    pub fn then_asc(mut self, column: impl Into<String>) -> Self {
        self.fields.push((column.into(), true));
        self
    }

    pub fn then_desc(mut self, column: impl Into<String>) -> Self {
        self.fields.push((column.into(), false));
        self
    }

    pub fn fields(&self) -> &[(String, bool)] {
        &self.fields
    }

    /// Whether every field sorts ascending (keyset paging is possible).
    pub(crate) fn is_ascending(&self) -> bool {
        self.fields.iter().all(|(_, asc)| *asc)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for (column, _) in &self.fields {
            validate_identifier(column)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_criteria() {
        let (sql, params) = Criteria::all().to_sql().unwrap();
        assert_eq!(sql, "1");
        assert!(params.is_empty());
    }

    #[test]
    fn test_conjunction() {
        let criteria = Criteria::all().eq("key", "A").gt("idx", 3i64).le("idx", 9i64);
        let (sql, params) = criteria.to_sql().unwrap();
        assert_eq!(sql, "key = ? AND idx > ? AND idx <= ?");
        assert_eq!(
            params,
            vec![Value::from("A"), Value::from(3i64), Value::from(9i64)]
        );
    }

    #[test]
    fn test_rejects_bad_column() {
        assert!(Criteria::all().eq("idx or 1=1", 1i64).to_sql().is_err());
        assert!(Order::asc("idx desc").validate().is_err());
    }

    #[test]
    fn test_order_direction() {
        assert!(Order::asc("a").then_asc("b").is_ascending());
        assert!(!Order::asc("a").then_desc("b").is_ascending());
        assert!(Order::none().is_ascending());
    }
}
