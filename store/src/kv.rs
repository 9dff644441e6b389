use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

/// Table holding the durable counters; always created by `init_schema`.
pub const COUNTER_TABLE: &str = "counter";
pub const COUNTER_TABLE_IOPS: i64 = 20;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{context}: {message}")]
    Backend { context: String, message: String },

    #[error("failed to encode a stored record: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl StoreError {
    pub fn backend(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Backend {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One row bound for a table: the primary key plus the encoded record.
#[derive(Debug, Clone)]
pub struct KvItem {
    pub key: String,
    pub body: Vec<u8>,
}

/// The remote (or in-memory) key-value backend.
///
/// Counters returned by `get_counter` are strictly monotonically increasing
/// per name, start at 1 and survive process restarts on durable
/// implementations; gaps are permitted after a restart.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Idempotent batched upsert. On success the returned set contains the
    /// keys the backend confirmed written.
    async fn store_values(&self, table: &str, items: Vec<KvItem>) -> StoreResult<HashSet<String>>;

    /// Point delete; a missing key is not an error.
    async fn delete_value(&self, table: &str, key: &str) -> StoreResult<()>;

    /// Full scan of a table into encoded rows.
    async fn load_table(&self, table: &str) -> StoreResult<Vec<Vec<u8>>>;

    /// Next value of the strictly monotonic sequence `name`.
    async fn get_counter(&self, name: &str) -> StoreResult<i64>;

    /// Create any missing tables; the map gives expected operations per
    /// second per table. The counter table is always included.
    async fn init_schema(&self, tables: &HashMap<&'static str, i64>) -> StoreResult<()>;
}
