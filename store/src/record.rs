//! The generic record contract every stored entity implements.

/// A value indexed alongside a record's JSON blob so it can be used in a
/// [`Filter`] without deserializing every row.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl IndexValue {
    /// SQLite storage class this value is written into.
    pub(crate) fn as_sql(&self) -> rusqlite::types::Value {
        match self {
            IndexValue::String(s) => rusqlite::types::Value::Text(s.clone()),
            IndexValue::Int(i) => rusqlite::types::Value::Integer(*i),
            IndexValue::Float(f) => rusqlite::types::Value::Real(*f),
            IndexValue::Bool(b) => rusqlite::types::Value::Integer(if *b { 1 } else { 0 }),
        }
    }
}

/// Comparison operator for a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    fn as_sql(self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
        }
    }
}

/// A single predicate over an indexed field, e.g. `status = "pending"`.
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: IndexValue,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: IndexValue) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value,
        }
    }

    pub fn new(field: impl Into<String>, op: FilterOp, value: IndexValue) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    pub(crate) fn to_sql_fragment(&self, param_index: usize) -> String {
        format!("json_extract(body, '$.{}') {} ?{}", self.field, self.op.as_sql(), param_index)
    }
}

/// Contract implemented by every entity persisted through a [`crate::Store`].
///
/// A `Record` owns its own identity (`id`) and its own notion of "when was
/// this last touched" (`updated_at`), which the store uses for staleness
/// sweeps and ordering. [`Filter`]/ordering predicates run against the
/// serialized body via `json_extract`, so a `Record` does not need to
/// declare its queryable fields up front — any field present in its own
/// `Serialize` output is reachable by name.
pub trait Record: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + Clone {
    fn id(&self) -> &str;
    fn updated_at(&self) -> i64;
    fn collection_name() -> &'static str;
}

/// Current time in Unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
