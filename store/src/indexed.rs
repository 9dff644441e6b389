use std::{collections::HashMap, sync::Arc};

use apollo_lib::{AbsoluteTime, NEVER_EXPIRES};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

use crate::{
    entity::Entity,
    kv::{KvBackend, StoreError, StoreResult},
    model::{AuthToken, StoredNode, StoredQueue, StoredTask},
};

/// An in-memory primary index over one KV table, with write-through
/// persistence.
///
/// Lock contract: the shared lock allows concurrent point lookups and
/// in-place value replacement (the KV backend serialises each write);
/// the exclusive lock is required for structural changes — inserting a new
/// key, deleting, or a full reload.
///
/// Multi-store operations must acquire locks in the order
/// QueueStore → NodeStore → TaskStore → TokenStore and release in reverse.
pub struct IndexedStore<E: Entity> {
    backend: Arc<dyn KvBackend>,
    index: RwLock<HashMap<String, E>>,
}

pub type TokenStore = IndexedStore<AuthToken>;
pub type QueueStore = IndexedStore<StoredQueue>;
pub type NodeStore = IndexedStore<StoredNode>;
pub type TaskStore = IndexedStore<StoredTask>;

impl<E: Entity> IndexedStore<E> {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            index: RwLock::new(HashMap::new()),
        }
    }

    pub async fn shared(&self) -> RwLockReadGuard<'_, HashMap<String, E>> {
        self.index.read().await
    }

    pub async fn exclusive(&self) -> RwLockWriteGuard<'_, HashMap<String, E>> {
        self.index.write().await
    }

    /// Load the entire table into the index. Run once at boot.
    pub async fn hydrate(&self) -> StoreResult<()> {
        let rows = self.backend.load_table(E::TABLE).await.map_err(|e| {
            StoreError::backend(format!("failed to hydrate the {} store", E::TABLE), e)
        })?;

        let mut index = self.index.write().await;
        for row in rows {
            let entity = E::decode_from_bytes(&row)?;
            index.insert(entity.primary_key().to_string(), entity);
        }
        info!("hydrated {} rows into the {} store", index.len(), E::TABLE);
        Ok(())
    }

    /// KV upsert, then insert/replace in the index.
    pub async fn store(&self, entity: E) -> StoreResult<()> {
        self.backend
            .store_values(E::TABLE, vec![entity.to_kv_item()?])
            .await
            .map_err(|e| {
                StoreError::backend(
                    format!("failed to store {} in {}", entity.primary_key(), E::TABLE),
                    e,
                )
            })?;

        let mut index = self.index.write().await;
        index.insert(entity.primary_key().to_string(), entity);
        Ok(())
    }

    /// Like [`store`](Self::store) for callers already holding the
    /// exclusive lock.
    pub async fn store_unlocked(
        &self,
        index: &mut HashMap<String, E>,
        entity: E,
    ) -> StoreResult<()> {
        self.backend
            .store_values(E::TABLE, vec![entity.to_kv_item()?])
            .await
            .map_err(|e| {
                StoreError::backend(
                    format!("failed to store {} in {}", entity.primary_key(), E::TABLE),
                    e,
                )
            })?;
        index.insert(entity.primary_key().to_string(), entity);
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Option<E> {
        self.index.read().await.get(key).cloned()
    }

    /// If `ids` is non-empty, return their intersection with the index
    /// (missing keys are skipped); otherwise iterate everything. The
    /// predicate applies in both cases.
    pub async fn list(&self, ids: &[String], filter: impl Fn(&E) -> bool) -> Vec<E> {
        let index = self.index.read().await;
        Self::filter_entries(&index, ids, filter)
    }

    /// The [`list`](Self::list) logic for callers already holding a guard.
    pub fn filter_entries(
        index: &HashMap<String, E>,
        ids: &[String],
        filter: impl Fn(&E) -> bool,
    ) -> Vec<E> {
        if !ids.is_empty() {
            ids.iter()
                .filter_map(|id| index.get(id))
                .filter(|entity| filter(entity))
                .cloned()
                .collect()
        } else {
            index.values().filter(|entity| filter(entity)).cloned().collect()
        }
    }

    /// KV delete then index erase; the caller holds the exclusive lock.
    pub async fn delete_unlocked(
        &self,
        index: &mut HashMap<String, E>,
        key: &str,
    ) -> StoreResult<()> {
        self.backend.delete_value(E::TABLE, key).await?;
        index.remove(key);
        Ok(())
    }
}

impl IndexedStore<AuthToken> {
    pub async fn token_by_key(&self, key: &str) -> Option<AuthToken> {
        self.get(key).await
    }

    /// Delete every token that expires before `cutoff`. The shared lock is
    /// only held while gathering candidates, and the exclusive lock is
    /// re-taken per key so KV round trips never run under a held lock.
    pub async fn reap_expired(&self, cutoff: AbsoluteTime) -> StoreResult<usize> {
        let tokens_to_kill: Vec<String> = {
            let index = self.shared().await;
            index
                .values()
                .filter(|token| token.expires != NEVER_EXPIRES && token.expires < cutoff)
                .map(|token| token.key.clone())
                .collect()
        };

        let reaped = tokens_to_kill.len();
        for key in tokens_to_kill {
            self.backend
                .delete_value(AuthToken::TABLE, &key)
                .await
                .map_err(|e| StoreError::backend(format!("failed to delete token {key}"), e))?;

            let mut index = self.exclusive().await;
            index.remove(&key);
        }

        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{memory::MemoryBackend, model::TokenType};
    use apollo_lib::AbsoluteTime;

    fn token(key: &str, entity: &str, expires: AbsoluteTime) -> AuthToken {
        AuthToken {
            key: key.to_string(),
            expires,
            token_type: TokenType::Node,
            entity_key: entity.to_string(),
            requested_by: format!("node/{entity}"),
            requested_on: AbsoluteTime(0),
        }
    }

    #[tokio::test]
    async fn store_get_and_hydrate() {
        let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
        let store = TokenStore::new(backend.clone());

        let expire = AbsoluteTime::now();
        let at1 = token("key1", "node-1", expire);
        let at2 = token("key2", "node-2", AbsoluteTime(expire.0 + 100_000));
        store.store(at1.clone()).await.unwrap();
        store.store(at2.clone()).await.unwrap();

        assert_eq!(store.token_by_key("key1").await, Some(at1.clone()));

        // A fresh store over the same backend sees the rows after hydration.
        let store2 = TokenStore::new(backend);
        store2.hydrate().await.unwrap();
        assert_eq!(store2.token_by_key("key1").await, Some(at1));

        // Reap the first key only.
        store2
            .reap_expired(AbsoluteTime(expire.0 + 1_000))
            .await
            .unwrap();
        assert_eq!(store2.token_by_key("key1").await, None);
        assert_eq!(store2.token_by_key("key2").await, Some(at2));
    }

    #[tokio::test]
    async fn reap_spares_never_expiring_tokens() {
        let store = TokenStore::new(Arc::new(MemoryBackend::new()));
        store
            .store(token("node-token", "i-123", NEVER_EXPIRES))
            .await
            .unwrap();
        store
            .store(token("stale", "node-2", AbsoluteTime(1)))
            .await
            .unwrap();

        let reaped = store.reap_expired(AbsoluteTime::now()).await.unwrap();
        assert_eq!(reaped, 1);
        assert!(store.token_by_key("node-token").await.is_some());
        assert!(store.token_by_key("stale").await.is_none());
    }

    #[tokio::test]
    async fn list_intersects_ids_and_applies_filter() {
        let store = TokenStore::new(Arc::new(MemoryBackend::new()));
        for i in 0..5 {
            store
                .store(token(&format!("key{i}"), &format!("node-{i}"), NEVER_EXPIRES))
                .await
                .unwrap();
        }

        let ids = vec!["key1".to_string(), "key3".to_string(), "missing".to_string()];
        let listed = store.list(&ids, |_| true).await;
        assert_eq!(listed.len(), 2);

        let filtered = store.list(&[], |t| t.entity_key == "node-4").await;
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].key, "key4");
    }

    #[tokio::test]
    async fn delete_unlocked_removes_row_and_index_entry() {
        let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
        let store = TokenStore::new(backend.clone());
        store.store(token("key1", "node-1", NEVER_EXPIRES)).await.unwrap();

        let mut index = store.exclusive().await;
        store.delete_unlocked(&mut index, "key1").await.unwrap();
        assert!(index.is_empty());
        drop(index);

        let store2 = TokenStore::new(backend);
        store2.hydrate().await.unwrap();
        assert!(store2.token_by_key("key1").await.is_none());
    }
}
