use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::kv::{KvBackend, KvItem, StoreResult, COUNTER_TABLE};

/// In-memory backend for tests and the `mem` database mode. Counters start
/// at 1 and increment by 1; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    tables: HashMap<String, BTreeMap<String, Vec<u8>>>,
    counters: HashMap<String, i64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn store_values(&self, table: &str, items: Vec<KvItem>) -> StoreResult<HashSet<String>> {
        let mut inner = self.inner.lock().await;
        let rows = inner.tables.entry(table.to_string()).or_default();

        let mut accepted = HashSet::with_capacity(items.len());
        for item in items {
            rows.insert(item.key.clone(), item.body);
            accepted.insert(item.key);
        }
        Ok(accepted)
    }

    async fn delete_value(&self, table: &str, key: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(rows) = inner.tables.get_mut(table) {
            rows.remove(key);
        }
        Ok(())
    }

    async fn load_table(&self, table: &str) -> StoreResult<Vec<Vec<u8>>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_counter(&self, name: &str) -> StoreResult<i64> {
        let mut inner = self.inner.lock().await;
        let value = inner.counters.entry(name.to_string()).or_insert(1);
        let result = *value;
        *value += 1;
        Ok(result)
    }

    async fn init_schema(&self, tables: &HashMap<&'static str, i64>) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        for table in tables.keys() {
            inner.tables.entry(table.to_string()).or_default();
        }
        inner.tables.entry(COUNTER_TABLE.to_string()).or_default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_load_delete() {
        let store = MemoryBackend::new();
        store
            .init_schema(&HashMap::from([("table1", 100), ("table2", 200)]))
            .await
            .unwrap();

        let num_items = 1000;
        let items = (0..num_items)
            .map(|i| KvItem {
                key: format!("key{i}"),
                body: format!("{{\"key\":\"key{i}\"}}").into_bytes(),
            })
            .collect();
        let accepted = store.store_values("table1", items).await.unwrap();
        assert_eq!(accepted.len(), num_items);
        assert!(accepted.contains("key0"));

        let rows = store.load_table("table1").await.unwrap();
        assert_eq!(rows.len(), num_items);

        store.delete_value("table1", "key1").await.unwrap();
        // Deleting a missing key is a no-op.
        store.delete_value("table1", "key1").await.unwrap();
        let rows = store.load_table("table1").await.unwrap();
        assert_eq!(rows.len(), num_items - 1);
    }

    #[tokio::test]
    async fn counters_are_monotonic_from_one() {
        let store = MemoryBackend::new();
        store.init_schema(&HashMap::new()).await.unwrap();

        for expected in 1..=1001 {
            assert_eq!(store.get_counter("tasks").await.unwrap(), expected);
        }

        // Independent sequences per counter name.
        assert_eq!(store.get_counter("other").await.unwrap(), 1);
        assert_eq!(store.get_counter("tasks").await.unwrap(), 1002);
    }
}
