//! Persistence for the Apollo control plane: a key-value backend (DynamoDB
//! or in-memory) with durable monotonic counters, and the in-memory indexed
//! stores layered on top of it with write-through persistence.

pub mod dynamo;
pub mod entity;
pub mod indexed;
pub mod kv;
pub mod memory;
pub mod model;

pub use dynamo::DynamoBackend;
pub use entity::Entity;
pub use indexed::{IndexedStore, NodeStore, QueueStore, TaskStore, TokenStore};
pub use kv::{KvBackend, KvItem, StoreError, StoreResult};
pub use memory::MemoryBackend;
