//! Record store trait and its SQLite implementation.
//!
//! Uses interior mutability (Mutex) so stages can share the store by `&self`.
//! Cursors fetch one page per lock acquisition; no statement is kept open
//! between pages.

use parking_lot::Mutex;
use rusqlite::{Connection, params_from_iter};
use std::sync::Arc;
use tracing::debug;

use crate::criteria::{Criteria, Order};
use crate::error::{Result, StoreError};
use crate::schema::{Schema, StorageConfig, validate_identifier};
use crate::value::{Record, Value};

/// Streaming result of [`RecordStore::select`].
pub type RecordCursor<'a> = Box<dyn Iterator<Item = Result<Record>> + 'a>;

/// Table-oriented persistence used by every pipeline stage.
pub trait RecordStore: Send + Sync {
    fn exists(&self, table: &str) -> Result<bool>;

    /// Create the table and its indexes if missing.
    fn create(&self, schema: &Schema) -> Result<()>;

    /// Drop the table if present.
    fn drop_table(&self, table: &str) -> Result<()>;

    /// Drop and recreate the table, discarding every row.
    fn rebuild(&self, schema: &Schema) -> Result<()> {
        self.drop_table(&schema.table)?;
        self.create(schema)
    }

    fn insert(&self, table: &str, record: &Record) -> Result<()>;

    /// Insert all records in one transaction.
    fn insert_all(&self, table: &str, records: &[Record]) -> Result<usize>;

    /// Set the record's columns on every row matching `criteria`.
    fn update(&self, table: &str, record: &Record, criteria: &Criteria) -> Result<usize>;

    fn delete(&self, table: &str, criteria: &Criteria) -> Result<usize>;

    /// Rows matching `criteria` in the given order.
    ///
    /// Ascending orders are paged by keyset, so rows updated behind the
    /// cursor (even out of the criteria) never shift the remaining pages.
    /// Order columns must not hold NULL.
    fn select(&self, table: &str, criteria: &Criteria, order: &Order) -> Result<RecordCursor<'_>>;

    fn count(&self, table: &str, criteria: &Criteria) -> Result<i64>;

    fn count_distinct(&self, table: &str, column: &str, criteria: &Criteria) -> Result<i64>;

    /// Distinct values of `column` among matching rows, ascending.
    /// Each record holds the single column.
    fn select_distinct(
        &self,
        table: &str,
        column: &str,
        criteria: &Criteria,
    ) -> Result<RecordCursor<'_>>;
}

/// Column alias carrying the rowid tiebreaker through keyset pages.
const ROWID_ALIAS: &str = "_cursor_rowid";

/// SQLite-backed [`RecordStore`] sharing one connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    page_size: usize,
}

impl SqliteStore {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let conn = if config.path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(&config.path)?
        };
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        debug!(path = %config.path, page_size = config.page_size, "Opened record store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            page_size: config.page_size.max(1),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(&StorageConfig::default())
    }

    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::new(&StorageConfig::from_path(path))
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Same connection, different page size.
    pub fn with_page_size(&self, page_size: usize) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            page_size: page_size.max(1),
        }
    }

    fn ensure_table(&self, table: &str) -> Result<()> {
        if self.exists(table)? {
            Ok(())
        } else {
            Err(StoreError::TableNotFound(table.to_string()))
        }
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Record>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            let mut record = Record::new();
            for (i, name) in names.iter().enumerate() {
                record.set(name.as_str(), Value::from_sql(row.get_ref(i)?));
            }
            Ok(record)
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn query_count(&self, sql: &str, params: &[Value]) -> Result<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row(sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(count)
    }
}

fn insert_sql<'r>(table: &str, record: &'r Record) -> Result<(String, Vec<&'r Value>)> {
    validate_identifier(table)?;
    if record.is_empty() {
        return Err(StoreError::EmptyRecord(table.to_string()));
    }
    let mut columns = Vec::with_capacity(record.len());
    let mut values = Vec::with_capacity(record.len());
    for (column, value) in record.iter() {
        validate_identifier(column)?;
        columns.push(column);
        values.push(value);
    }
    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders
    );
    Ok((sql, values))
}

impl RecordStore for SqliteStore {
    fn exists(&self, table: &str) -> Result<bool> {
        validate_identifier(table)?;
        let count = self.query_count(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[Value::from(table)],
        )?;
        Ok(count > 0)
    }

    fn create(&self, schema: &Schema) -> Result<()> {
        schema.validate()?;
        let conn = self.conn.lock();
        conn.execute(&schema.create_sql(), [])?;
        for sql in schema.index_sql() {
            conn.execute(&sql, [])?;
        }
        debug!(table = %schema.table, columns = schema.columns.len(), "Created table");
        Ok(())
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        validate_identifier(table)?;
        let conn = self.conn.lock();
        conn.execute(&format!("DROP TABLE IF EXISTS {}", table), [])?;
        Ok(())
    }

    fn insert(&self, table: &str, record: &Record) -> Result<()> {
        let (sql, values) = insert_sql(table, record)?;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&sql)?;
        stmt.execute(params_from_iter(values))?;
        Ok(())
    }

    fn insert_all(&self, table: &str, records: &[Record]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for record in records {
            let (sql, values) = insert_sql(table, record)?;
            let mut stmt = tx.prepare_cached(&sql)?;
            stmt.execute(params_from_iter(values))?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    fn update(&self, table: &str, record: &Record, criteria: &Criteria) -> Result<usize> {
        validate_identifier(table)?;
        if record.is_empty() {
            return Err(StoreError::EmptyRecord(table.to_string()));
        }
        let mut assignments = Vec::with_capacity(record.len());
        let mut params: Vec<Value> = Vec::with_capacity(record.len());
        for (column, value) in record.iter() {
            validate_identifier(column)?;
            assignments.push(format!("{} = ?", column));
            params.push(value.clone());
        }
        let (predicate, criteria_params) = criteria.to_sql()?;
        params.extend(criteria_params);
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            table,
            assignments.join(", "),
            predicate
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&sql)?;
        Ok(stmt.execute(params_from_iter(params.iter()))?)
    }

    fn delete(&self, table: &str, criteria: &Criteria) -> Result<usize> {
        validate_identifier(table)?;
        let (predicate, params) = criteria.to_sql()?;
        let sql = format!("DELETE FROM {} WHERE {}", table, predicate);
        let conn = self.conn.lock();
        Ok(conn.execute(&sql, params_from_iter(params.iter()))?)
    }

    fn select(&self, table: &str, criteria: &Criteria, order: &Order) -> Result<RecordCursor<'_>> {
        self.ensure_table(table)?;
        order.validate()?;
        let (predicate, params) = criteria.to_sql()?;
        let projection = if order.is_ascending() {
            Projection::Keyset
        } else {
            Projection::Offset
        };
        Ok(Box::new(PagedCursor {
            store: self,
            table: table.to_string(),
            predicate,
            params,
            order: order.fields().to_vec(),
            projection,
            last_key: None,
            offset: 0,
            page: Vec::new().into_iter(),
            exhausted: false,
        }))
    }

    fn count(&self, table: &str, criteria: &Criteria) -> Result<i64> {
        self.ensure_table(table)?;
        let (predicate, params) = criteria.to_sql()?;
        self.query_count(
            &format!("SELECT COUNT(*) FROM {} WHERE {}", table, predicate),
            &params,
        )
    }

    fn count_distinct(&self, table: &str, column: &str, criteria: &Criteria) -> Result<i64> {
        self.ensure_table(table)?;
        validate_identifier(column)?;
        let (predicate, params) = criteria.to_sql()?;
        self.query_count(
            &format!(
                "SELECT COUNT(DISTINCT {}) FROM {} WHERE {}",
                column, table, predicate
            ),
            &params,
        )
    }

    fn select_distinct(
        &self,
        table: &str,
        column: &str,
        criteria: &Criteria,
    ) -> Result<RecordCursor<'_>> {
        self.ensure_table(table)?;
        validate_identifier(column)?;
        let (predicate, params) = criteria.to_sql()?;
        Ok(Box::new(PagedCursor {
            store: self,
            table: table.to_string(),
            predicate,
            params,
            order: vec![(column.to_string(), true)],
            projection: Projection::Distinct(column.to_string()),
            last_key: None,
            offset: 0,
            page: Vec::new().into_iter(),
            exhausted: false,
        }))
    }
}

/// How a cursor pages through its rows.
enum Projection {
    /// Whole rows, seeking past `(order columns..., rowid)` of the last row.
    Keyset,
    /// Whole rows with LIMIT/OFFSET (descending orders).
    Offset,
    /// One column's distinct values, seeking past the last value.
    Distinct(String),
}

struct PagedCursor<'a> {
    store: &'a SqliteStore,
    table: String,
    predicate: String,
    params: Vec<Value>,
    order: Vec<(String, bool)>,
    projection: Projection,
    last_key: Option<Vec<Value>>,
    offset: usize,
    page: std::vec::IntoIter<Record>,
    exhausted: bool,
}

impl PagedCursor<'_> {
    fn page_sql(&self) -> (String, Vec<Value>) {
        let limit = self.store.page_size;
        let mut params = self.params.clone();
        match &self.projection {
            Projection::Keyset => {
                let mut keys: Vec<&str> = self.order.iter().map(|(c, _)| c.as_str()).collect();
                keys.push("rowid");
                let mut predicate = self.predicate.clone();
                if let Some(last) = &self.last_key {
                    predicate.push_str(&format!(
                        " AND ({}) > ({})",
                        keys.join(", "),
                        vec!["?"; keys.len()].join(", ")
                    ));
                    params.extend(last.iter().cloned());
                }
                let sql = format!(
                    "SELECT *, rowid AS {} FROM {} WHERE {} ORDER BY {} LIMIT {}",
                    ROWID_ALIAS,
                    self.table,
                    predicate,
                    keys.join(", "),
                    limit
                );
                (sql, params)
            }
            Projection::Offset => {
                let mut keys: Vec<String> = self
                    .order
                    .iter()
                    .map(|(c, asc)| format!("{} {}", c, if *asc { "ASC" } else { "DESC" }))
                    .collect();
                keys.push("rowid ASC".to_string());
                let sql = format!(
                    "SELECT * FROM {} WHERE {} ORDER BY {} LIMIT {} OFFSET {}",
                    self.table,
                    self.predicate,
                    keys.join(", "),
                    limit,
                    self.offset
                );
                (sql, params)
            }
            Projection::Distinct(column) => {
                let mut predicate = self.predicate.clone();
                if let Some(last) = &self.last_key {
                    predicate.push_str(&format!(" AND {} > ?", column));
                    params.extend(last.iter().cloned());
                }
                let sql = format!(
                    "SELECT DISTINCT {} FROM {} WHERE {} AND {} IS NOT NULL ORDER BY {} LIMIT {}",
                    column, self.table, predicate, column, column, limit
                );
                (sql, params)
            }
        }
    }

    fn fetch(&mut self) -> Result<Vec<Record>> {
        let (sql, params) = self.page_sql();
        let mut records = self.store.query(&sql, &params)?;
        self.offset += records.len();
        if let Some(last) = records.last() {
            let mut key: Vec<Value> = self
                .order
                .iter()
                .map(|(c, _)| last.get(c).cloned().unwrap_or(Value::Null))
                .collect();
            if matches!(self.projection, Projection::Keyset) {
                key.push(last.get(ROWID_ALIAS).cloned().unwrap_or(Value::Null));
            }
            self.last_key = Some(key);
        }
        if matches!(self.projection, Projection::Keyset) {
            for record in &mut records {
                record.remove(ROWID_ALIAS);
            }
        }
        Ok(records)
    }
}

impl Iterator for PagedCursor<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(record) = self.page.next() {
            return Some(Ok(record));
        }
        if self.exhausted {
            return None;
        }
        match self.fetch() {
            Ok(records) => {
                if records.len() < self.store.page_size {
                    self.exhausted = true;
                }
                self.page = records.into_iter();
                self.page.next().map(Ok)
            }
            Err(e) => {
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;

    fn schema() -> Schema {
        Schema::new("items")
            .column(Column::integer("idx").primary_key())
            .column(Column::text("key").not_null().default_text(""))
            .column(Column::real("value"))
            .index(&["key", "idx"])
    }

    fn store_with(n: i64, page_size: usize) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap().with_page_size(page_size);
        store.rebuild(&schema()).unwrap();
        let records: Vec<Record> = (0..n)
            .map(|i| {
                Record::new()
                    .with("idx", i)
                    .with("key", if i % 2 == 0 { "even" } else { "odd" })
                    .with("value", i as f64 * 0.5)
            })
            .collect();
        store.insert_all("items", &records).unwrap();
        store
    }

    fn indices(cursor: RecordCursor<'_>) -> Vec<i64> {
        cursor.map(|r| r.unwrap().integer("idx").unwrap()).collect()
    }

    #[test]
    fn test_select_pages_in_order() {
        let store = store_with(25, 4);
        let all = indices(
            store
                .select("items", &Criteria::all(), &Order::asc("idx"))
                .unwrap(),
        );
        assert_eq!(all, (0..25).collect::<Vec<_>>());

        let odd = indices(
            store
                .select("items", &Criteria::all().eq("key", "odd"), &Order::asc("idx"))
                .unwrap(),
        );
        assert_eq!(odd, (0..25).filter(|i| i % 2 == 1).collect::<Vec<_>>());
    }

    #[test]
    fn test_descending_order() {
        let store = store_with(7, 3);
        let all = indices(
            store
                .select("items", &Criteria::all(), &Order::desc("idx"))
                .unwrap(),
        );
        assert_eq!(all, vec![6, 5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_update_behind_cursor_does_not_skip_rows() {
        let store = store_with(10, 3);
        let criteria = Criteria::all().eq("key", "even");
        let mut seen = Vec::new();
        for record in store.select("items", &criteria, &Order::asc("idx")).unwrap() {
            let idx = record.unwrap().integer("idx").unwrap();
            let changed = store
                .update(
                    "items",
                    &Record::new().with("key", "done"),
                    &Criteria::all().eq("idx", idx),
                )
                .unwrap();
            assert_eq!(changed, 1);
            seen.push(idx);
        }
        assert_eq!(seen, vec![0, 2, 4, 6, 8]);
        assert_eq!(store.count("items", &criteria).unwrap(), 0);
    }

    #[test]
    fn test_nan_round_trips_as_null() {
        let store = store_with(0, 10);
        store
            .insert("items", &Record::new().with("idx", 0i64).with("value", f64::NAN))
            .unwrap();
        let record = store
            .select("items", &Criteria::all(), &Order::none())
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(record.get("value"), Some(&Value::Null));
        assert!(record.real("value").unwrap().is_nan());
        assert_eq!(record.text("key").unwrap(), "");
        assert!(record.get(ROWID_ALIAS).is_none());
    }

    #[test]
    fn test_counts_and_distinct() {
        let store = store_with(9, 2);
        assert_eq!(store.count("items", &Criteria::all()).unwrap(), 9);
        assert_eq!(
            store
                .count("items", &Criteria::all().ge("idx", 3i64).lt("idx", 6i64))
                .unwrap(),
            3
        );
        assert_eq!(
            store.count_distinct("items", "key", &Criteria::all()).unwrap(),
            2
        );
        let keys: Vec<String> = store
            .select_distinct("items", "key", &Criteria::all())
            .unwrap()
            .map(|r| r.unwrap().text("key").unwrap().to_string())
            .collect();
        assert_eq!(keys, vec!["even", "odd"]);
    }

    #[test]
    fn test_delete_and_rebuild() {
        let store = store_with(6, 10);
        assert_eq!(
            store
                .delete("items", &Criteria::all().eq("key", "odd"))
                .unwrap(),
            3
        );
        assert_eq!(store.count("items", &Criteria::all()).unwrap(), 3);
        store.rebuild(&schema()).unwrap();
        assert_eq!(store.count("items", &Criteria::all()).unwrap(), 0);
    }

    #[test]
    fn test_missing_table() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(!store.exists("items").unwrap());
        assert!(matches!(
            store.count("items", &Criteria::all()),
            Err(StoreError::TableNotFound(_))
        ));
        assert!(matches!(
            store.insert("items", &Record::new()),
            Err(StoreError::EmptyRecord(_))
        ));
    }
}
