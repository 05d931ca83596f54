//! SQLite-backed implementation of [`Store`].

use std::marker::PhantomData;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params_from_iter};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::record::{Filter, Record};

/// A generic, single-collection SQLite table for records of type `T`.
///
/// Each row stores the record's id, its full JSON body, and an
/// `updated_at` column for staleness queries. [`Filter`]s and ordering
/// are queried through `json_extract` directly against the body rather
/// than materialized into their own columns — the core's query volume is
/// small enough that this trades a little CPU for a lot less
/// schema-migration ceremony. A field used for ordering must therefore
/// already be stored in an orderable form (an integer, not a string whose
/// lexicographic order diverges from the order it should carry).
///
/// `Store` is not `Sync`-safe for concurrent writers on its own; callers
/// that need multi-task concurrent access (the task queue) serialize
/// access to one `Store` behind an actor task rather than sharing a
/// `Connection` across threads.
pub struct Store<T: Record> {
    conn: Connection,
    table: &'static str,
    _marker: PhantomData<T>,
}

impl<T: Record> Store<T> {
    /// Open (or create) a store backed by the file at `path`.
    ///
    /// The parent directory is created if missing. The connection uses
    /// WAL journalling and NORMAL synchronous durability, matching a
    /// crash-safe-but-not-paranoid profile appropriate for a local task
    /// queue that tolerates losing the last few milliseconds of writes
    /// on a hard power cut but never tolerates a corrupt file.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::configure_and_init(conn)
    }

    /// Open an in-memory store. Used by tests and by callers that only
    /// need ephemeral state for a single process lifetime.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure_and_init(conn)
    }

    fn configure_and_init(conn: Connection) -> StoreResult<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let table = T::collection_name();
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    body TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                )"
            ),
            [],
        )?;
        conn.execute(
            &format!("CREATE INDEX IF NOT EXISTS idx_{table}_updated_at ON {table} (updated_at)"),
            [],
        )?;

        debug!(table, "Store::configure_and_init: schema ready");
        Ok(Self {
            conn,
            table,
            _marker: PhantomData,
        })
    }

    /// Insert a brand-new record. Fails if the id already exists.
    pub fn insert(&self, record: &T) -> StoreResult<()> {
        let body = serde_json::to_string(record)?;
        self.conn.execute(
            &format!("INSERT INTO {} (id, body, updated_at) VALUES (?1, ?2, ?3)", self.table),
            rusqlite::params![record.id(), body, record.updated_at()],
        )?;
        Ok(())
    }

    /// Insert or overwrite a record by id.
    pub fn upsert(&self, record: &T) -> StoreResult<()> {
        let body = serde_json::to_string(record)?;
        self.conn.execute(
            &format!(
                "INSERT INTO {table} (id, body, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
                table = self.table
            ),
            rusqlite::params![record.id(), body, record.updated_at()],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> StoreResult<Option<T>> {
        let body: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT body FROM {} WHERE id = ?1", self.table),
                [id],
                |row| row.get(0),
            )
            .optional()?;
        match body {
            Some(b) => Ok(Some(serde_json::from_str(&b)?)),
            None => Ok(None),
        }
    }

    pub fn delete(&self, id: &str) -> StoreResult<bool> {
        let changed = self
            .conn
            .execute(&format!("DELETE FROM {} WHERE id = ?1", self.table), [id])?;
        Ok(changed > 0)
    }

    /// List every record matching `filters` (AND-combined), unordered.
    pub fn list(&self, filters: &[Filter]) -> StoreResult<Vec<T>> {
        self.list_ordered(filters, &[])
    }

    /// List records matching `filters`, ordered by the given
    /// `(json field, descending)` pairs, applied left to right.
    pub fn list_ordered(&self, filters: &[Filter], order_by: &[(String, bool)]) -> StoreResult<Vec<T>> {
        let (where_clause, values) = Self::build_where(filters);
        let order_clause = Self::build_order(order_by);

        let sql = format!("SELECT body FROM {} {} {}", self.table, where_clause, order_clause);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            let body: String = row.get(0)?;
            Ok(body)
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    pub fn count(&self, filters: &[Filter]) -> StoreResult<usize> {
        let (where_clause, values) = Self::build_where(filters);
        let sql = format!("SELECT COUNT(*) FROM {} {}", self.table, where_clause);
        let count: i64 = self.conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn delete_where(&self, filters: &[Filter]) -> StoreResult<usize> {
        let (where_clause, values) = Self::build_where(filters);
        let sql = format!("DELETE FROM {} {}", self.table, where_clause);
        let changed = self.conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(changed)
    }

    /// Run `f` inside a single SQLite transaction against the raw
    /// connection. Used by callers (the task queue's `claim_next`) that
    /// need a select-then-update to be atomic with respect to other
    /// callers of the same `Store`.
    pub fn with_transaction<F, R>(&mut self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&rusqlite::Transaction, &'static str) -> StoreResult<R>,
    {
        let tx = self.conn.transaction()?;
        let result = f(&tx, self.table)?;
        tx.commit()?;
        Ok(result)
    }

    pub fn table_name(&self) -> &'static str {
        self.table
    }

    fn build_where(filters: &[Filter]) -> (String, Vec<rusqlite::types::Value>) {
        if filters.is_empty() {
            return (String::new(), Vec::new());
        }
        let mut clauses = Vec::with_capacity(filters.len());
        let mut values = Vec::with_capacity(filters.len());
        for (i, filter) in filters.iter().enumerate() {
            clauses.push(filter.to_sql_fragment(i + 1));
            values.push(filter.value.as_sql());
        }
        (format!("WHERE {}", clauses.join(" AND ")), values)
    }

    fn build_order(order_by: &[(String, bool)]) -> String {
        if order_by.is_empty() {
            return String::new();
        }
        let parts: Vec<String> = order_by
            .iter()
            .map(|(field, desc)| {
                format!(
                    "json_extract(body, '$.{}') {}",
                    field,
                    if *desc { "DESC" } else { "ASC" }
                )
            })
            .collect();
        format!("ORDER BY {}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::IndexValue;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Widget {
        id: String,
        name: String,
        weight: i64,
        updated_at: i64,
    }

    impl Record for Widget {
        fn id(&self) -> &str {
            &self.id
        }
        fn updated_at(&self) -> i64 {
            self.updated_at
        }
        fn collection_name() -> &'static str {
            "widgets"
        }
    }

    fn widget(id: &str, weight: i64) -> Widget {
        Widget {
            id: id.to_string(),
            name: format!("widget-{id}"),
            weight,
            updated_at: weight,
        }
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let store: Store<Widget> = Store::open_in_memory().unwrap();
        store.insert(&widget("a", 1)).unwrap();

        let fetched = store.get("a").unwrap().unwrap();
        assert_eq!(fetched.name, "widget-a");
    }

    #[test]
    fn get_missing_returns_none() {
        let store: Store<Widget> = Store::open_in_memory().unwrap();
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn upsert_overwrites() {
        let store: Store<Widget> = Store::open_in_memory().unwrap();
        store.upsert(&widget("a", 1)).unwrap();
        store.upsert(&widget("a", 99)).unwrap();

        let fetched = store.get("a").unwrap().unwrap();
        assert_eq!(fetched.weight, 99);
    }

    #[test]
    fn filter_by_indexed_field() {
        let store: Store<Widget> = Store::open_in_memory().unwrap();
        store.insert(&widget("a", 1)).unwrap();
        store.insert(&widget("b", 2)).unwrap();
        store.insert(&widget("c", 2)).unwrap();

        let matches = store
            .list(&[Filter::eq("weight", IndexValue::Int(2))])
            .unwrap();
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn ordering_is_applied() {
        let store: Store<Widget> = Store::open_in_memory().unwrap();
        store.insert(&widget("a", 3)).unwrap();
        store.insert(&widget("b", 1)).unwrap();
        store.insert(&widget("c", 2)).unwrap();

        let ordered = store.list_ordered(&[], &[("weight".to_string(), false)]).unwrap();
        let ids: Vec<_> = ordered.iter().map(|w| w.id.clone()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn delete_removes_row() {
        let store: Store<Widget> = Store::open_in_memory().unwrap();
        store.insert(&widget("a", 1)).unwrap();
        assert!(store.delete("a").unwrap());
        assert!(store.get("a").unwrap().is_none());
        assert!(!store.delete("a").unwrap());
    }

    #[test]
    fn count_respects_filters() {
        let store: Store<Widget> = Store::open_in_memory().unwrap();
        store.insert(&widget("a", 1)).unwrap();
        store.insert(&widget("b", 1)).unwrap();
        store.insert(&widget("c", 2)).unwrap();

        assert_eq!(store.count(&[Filter::eq("weight", IndexValue::Int(1))]).unwrap(), 2);
        assert_eq!(store.count(&[]).unwrap(), 3);
    }
}
