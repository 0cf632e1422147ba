use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::{ObjectId, ObjectMeta, StorageChannel};
use crate::error::{Error, Result};

/// Channel backed by a directory tree, typically a cloud drive mounted into
/// the local filesystem on both sides. Logical names map to relative paths.
///
/// A plain filesystem keeps one file per name, so a duplicate put overwrites
/// in place; that is a degenerate but valid case of the newest-wins contract.
#[derive(Debug, Clone)]
pub struct FsChannel {
    root: PathBuf,
}

impl FsChannel {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the root directory if it does not exist yet. Called once at
    /// startup; a root that goes missing later still reads as an outage.
    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(Self::unavailable)
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.split('/').any(|part| part == "..") {
            return Err(Error::Validation(format!("invalid object name: {name}")));
        }
        Ok(self.root.join(name))
    }

    fn unavailable(err: std::io::Error) -> Error {
        Error::ChannelUnavailable(err.to_string())
    }

    async fn collect_files(&self, dir: PathBuf, out: &mut Vec<ObjectMeta>) -> Result<()> {
        let mut stack = vec![dir];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Self::unavailable(e)),
            };
            while let Some(entry) = entries.next_entry().await.map_err(Self::unavailable)? {
                let path = entry.path();
                let meta = entry.metadata().await.map_err(Self::unavailable)?;
                if meta.is_dir() {
                    stack.push(path);
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let name = rel.to_string_lossy().replace('\\', "/");
                let modified = meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                out.push(ObjectMeta {
                    id: ObjectId(name.clone()),
                    name,
                    modified,
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageChannel for FsChannel {
    async fn put(&self, name: &str, data: Bytes) -> Result<ObjectId> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(Self::unavailable)?;
        }
        // Write-then-rename so a concurrent reader never sees a partial object.
        let tmp = path.with_extension("tmp-write");
        tokio::fs::write(&tmp, &data).await.map_err(Self::unavailable)?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(Self::unavailable)?;
        Ok(ObjectId(name.to_string()))
    }

    async fn get(&self, id: &ObjectId) -> Result<Bytes> {
        let path = self.resolve(&id.0)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::ObjectNotFound(id.to_string()))
            }
            Err(e) => Err(Self::unavailable(e)),
        }
    }

    async fn list(&self, prefix: &str, limit: Option<usize>) -> Result<Vec<ObjectMeta>> {
        if !self.root.exists() {
            return Err(Error::ChannelUnavailable(format!(
                "channel root does not exist: {}",
                self.root.display()
            )));
        }
        let mut entries = Vec::new();
        self.collect_files(self.root.clone(), &mut entries).await?;
        entries.retain(|m| m.name.starts_with(prefix) && !m.name.ends_with(".tmp-write"));
        entries.sort_by(|a, b| b.modified.cmp(&a.modified).then(b.name.cmp(&a.name)));
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    async fn delete(&self, id: &ObjectId) -> Result<()> {
        let path = self.resolve(&id.0)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::unavailable(e)),
        }
    }
}
