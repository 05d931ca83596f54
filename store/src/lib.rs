//! Generic persistent record storage backed by SQLite.
//!
//! This crate provides the [`Store`] type used by every durable
//! collection in bmlibrarian (today: the task queue). A `Store<T>`
//! persists any type implementing [`Record`] as a JSON blob keyed by
//! id, with filtered, ordered queries driven by SQLite's `json_extract`
//! so callers never hand-write SQL for their domain types.

mod error;
mod record;
mod sqlite;

pub use error::{StoreError, StoreResult};
pub use record::{Filter, FilterOp, IndexValue, Record, now_ms};
pub use sqlite::Store;
