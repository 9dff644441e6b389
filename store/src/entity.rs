use serde::{de::DeserializeOwned, Serialize};

use crate::kv::{KvItem, StoreResult};

/// A record that can live in a [`crate::KvBackend`] table. Every entity
/// names its table and exposes the primary key; encoding is serde JSON.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const TABLE: &'static str;

    fn primary_key(&self) -> &str;

    fn encode_to_bytes(&self) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn decode_from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn to_kv_item(&self) -> StoreResult<KvItem> {
        Ok(KvItem {
            key: self.primary_key().to_string(),
            body: self.encode_to_bytes()?,
        })
    }
}
