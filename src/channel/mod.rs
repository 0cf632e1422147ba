//! Storage channel abstraction: the only communication medium between the
//! controller and the executor.
//!
//! Any durable, listable key/blob store with eventual read-after-write
//! visibility satisfies this contract. There is no atomic create-if-absent:
//! two writes under the same logical name may both land, so readers always
//! prefer the most recently modified object and ignore stale duplicates.
//! Idempotent by recency, not by uniqueness.

pub mod fs;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;

use crate::error::Result;

pub use fs::FsChannel;
pub use memory::MemoryChannel;

/// Opaque handle to one stored object. Backends interpret it their own way
/// (a file path, a provider file id, an in-memory slot).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectId(pub String);

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata for one stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub id: ObjectId,
    /// Logical name, hierarchical with `/` separators.
    pub name: String,
    pub modified: DateTime<Utc>,
}

#[async_trait]
pub trait StorageChannel: Send + Sync + 'static {
    /// Stores `data` under the logical `name`. A second put under the same
    /// name does not replace the first at the contract level; it creates a
    /// newer object that wins by recency.
    async fn put(&self, name: &str, data: Bytes) -> Result<ObjectId>;

    /// Reads an object. Returns `Error::ObjectNotFound` if absent.
    async fn get(&self, id: &ObjectId) -> Result<Bytes>;

    /// Lists objects under `prefix`, most recently modified first, capped at
    /// `limit` entries when given.
    async fn list(&self, prefix: &str, limit: Option<usize>) -> Result<Vec<ObjectMeta>>;

    /// Deletes an object. Succeeds even if it no longer exists.
    async fn delete(&self, id: &ObjectId) -> Result<()>;
}

/// Collapses a most-recent-first listing to one entry per logical name,
/// dropping stale duplicates.
pub fn latest_by_name(entries: Vec<ObjectMeta>) -> Vec<ObjectMeta> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|m| seen.insert(m.name.clone()))
        .collect()
}

/// Reads the newest object with exactly the given name, or `None` if no such
/// object exists.
pub async fn read_latest(
    channel: &dyn StorageChannel,
    name: &str,
) -> Result<Option<(ObjectMeta, Bytes)>> {
    let entries = channel.list(name, None).await?;
    let Some(meta) = entries.into_iter().find(|m| m.name == name) else {
        return Ok(None);
    };
    let data = channel.get(&meta.id).await?;
    Ok(Some((meta, data)))
}

/// Reads and parses the newest JSON object under the given name.
/// A present-but-corrupt object surfaces as a serialization error; callers
/// decide whether that is fatal.
pub async fn read_latest_json<T: DeserializeOwned>(
    channel: &dyn StorageChannel,
    name: &str,
) -> Result<Option<T>> {
    match read_latest(channel, name).await? {
        Some((_, data)) => Ok(Some(serde_json::from_slice(&data)?)),
        None => Ok(None),
    }
}

/// Writes a value as pretty-printed JSON so persisted objects stay
/// human-inspectable.
pub async fn write_json<T: Serialize>(
    channel: &dyn StorageChannel,
    name: &str,
    value: &T,
) -> Result<ObjectId> {
    let data = serde_json::to_vec_pretty(value)?;
    channel.put(name, Bytes::from(data)).await
}
