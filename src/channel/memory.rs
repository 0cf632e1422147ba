use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::{ObjectId, ObjectMeta, StorageChannel};
use crate::error::{Error, Result};

/// In-memory channel for tests. Thread-safe, keeps duplicate writes under the
/// same logical name as distinct objects so recency handling is exercised the
/// way a real object store would.
#[derive(Debug, Default, Clone)]
pub struct MemoryChannel {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: RwLock<Vec<StoredObject>>,
    seq: AtomicU64,
    offline: AtomicBool,
}

#[derive(Debug, Clone)]
struct StoredObject {
    id: ObjectId,
    name: String,
    data: Bytes,
    modified: DateTime<Utc>,
    /// Tie-breaker for objects written within the same timestamp tick.
    seq: u64,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an unreachable storage medium: every operation fails with
    /// `ChannelUnavailable` until cleared.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(Error::ChannelUnavailable(
                "memory channel is offline".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of stored objects, duplicates included.
    pub fn object_count(&self) -> usize {
        self.inner.objects.read().map(|o| o.len()).unwrap_or(0)
    }
}

#[async_trait]
impl StorageChannel for MemoryChannel {
    async fn put(&self, name: &str, data: Bytes) -> Result<ObjectId> {
        self.check_online()?;
        let seq = self.inner.seq.fetch_add(1, Ordering::SeqCst);
        let id = ObjectId(format!("mem-{seq}"));
        let mut objects = self
            .inner
            .objects
            .write()
            .map_err(|_| Error::ChannelUnavailable("lock poisoned".to_string()))?;
        objects.push(StoredObject {
            id: id.clone(),
            name: name.to_string(),
            data,
            modified: Utc::now(),
            seq,
        });
        Ok(id)
    }

    async fn get(&self, id: &ObjectId) -> Result<Bytes> {
        self.check_online()?;
        let objects = self
            .inner
            .objects
            .read()
            .map_err(|_| Error::ChannelUnavailable("lock poisoned".to_string()))?;
        objects
            .iter()
            .find(|o| &o.id == id)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::ObjectNotFound(id.to_string()))
    }

    async fn list(&self, prefix: &str, limit: Option<usize>) -> Result<Vec<ObjectMeta>> {
        self.check_online()?;
        let objects = self
            .inner
            .objects
            .read()
            .map_err(|_| Error::ChannelUnavailable("lock poisoned".to_string()))?;
        let mut matches: Vec<&StoredObject> = objects
            .iter()
            .filter(|o| o.name.starts_with(prefix))
            .collect();
        // Most recent first; seq breaks same-timestamp ties.
        matches.sort_by(|a, b| (b.modified, b.seq).cmp(&(a.modified, a.seq)));
        if let Some(limit) = limit {
            matches.truncate(limit);
        }
        Ok(matches
            .into_iter()
            .map(|o| ObjectMeta {
                id: o.id.clone(),
                name: o.name.clone(),
                modified: o.modified,
            })
            .collect())
    }

    async fn delete(&self, id: &ObjectId) -> Result<()> {
        self.check_online()?;
        let mut objects = self
            .inner
            .objects
            .write()
            .map_err(|_| Error::ChannelUnavailable("lock poisoned".to_string()))?;
        objects.retain(|o| &o.id != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_roundtrip() {
        let channel = MemoryChannel::new();
        let id = channel
            .put("tasks/a.json", Bytes::from("hello"))
            .await
            .unwrap();
        let data = channel.get(&id).await.unwrap();
        assert_eq!(data, Bytes::from("hello"));
    }

    #[tokio::test]
    async fn get_missing_object_is_not_found() {
        let channel = MemoryChannel::new();
        let err = channel.get(&ObjectId("mem-999".to_string())).await;
        assert!(matches!(err, Err(Error::ObjectNotFound(_))));
    }

    #[tokio::test]
    async fn duplicate_names_both_stored_newest_listed_first() {
        let channel = MemoryChannel::new();
        channel.put("status.json", Bytes::from("old")).await.unwrap();
        let newer = channel.put("status.json", Bytes::from("new")).await.unwrap();

        assert_eq!(channel.object_count(), 2);
        let listed = channel.list("status.json", None).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer);
    }

    #[tokio::test]
    async fn list_respects_prefix_and_limit() {
        let channel = MemoryChannel::new();
        channel.put("tasks/a.json", Bytes::from("a")).await.unwrap();
        channel.put("tasks/b.json", Bytes::from("b")).await.unwrap();
        channel.put("results/c.json", Bytes::from("c")).await.unwrap();

        let tasks = channel.list("tasks/", None).await.unwrap();
        assert_eq!(tasks.len(), 2);

        let capped = channel.list("tasks/", Some(1)).await.unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].name, "tasks/b.json");
    }

    #[tokio::test]
    async fn offline_channel_fails_every_operation() {
        let channel = MemoryChannel::new();
        channel.set_offline(true);

        let put = channel.put("x", Bytes::from("y")).await;
        assert!(matches!(put, Err(Error::ChannelUnavailable(_))));
        let list = channel.list("", None).await;
        assert!(matches!(list, Err(Error::ChannelUnavailable(_))));

        channel.set_offline(false);
        assert!(channel.put("x", Bytes::from("y")).await.is_ok());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let channel = MemoryChannel::new();
        let id = channel.put("x", Bytes::from("y")).await.unwrap();
        channel.delete(&id).await.unwrap();
        channel.delete(&id).await.unwrap();
        assert_eq!(channel.object_count(), 0);
    }
}
