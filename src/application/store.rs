//! Ephemeral artifact storage.
//!
//! A dump directory of generated files, each scheduled for best-effort
//! removal after a TTL. The store offers no exactly-once guarantee: a read
//! may race a scheduled eviction and either win or report a miss, which the
//! serving path accepts by design.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid artifact name")]
    InvalidName,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Filesystem-backed artifact store with timed eviction.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Initialise the store rooted at the dump directory, creating it if necessary.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write an artifact under the dump directory and return its absolute path.
    pub async fn put(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        let path = self.resolve(name)?;
        fs::write(&path, bytes).await?;
        debug!(
            target: "veduta::store",
            name,
            size = bytes.len(),
            "artifact stored"
        );
        Ok(path)
    }

    /// Read an artifact; `Ok(None)` is a miss, not an error.
    pub async fn read(&self, name: &str) -> Result<Option<Bytes>, StoreError> {
        let path = self.resolve(name)?;
        match fs::read(&path).await {
            Ok(bytes) => {
                metrics::counter!("veduta_store_hit_total").increment(1);
                Ok(Some(Bytes::from(bytes)))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                metrics::counter!("veduta_store_miss_total").increment(1);
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Delete an artifact. Deleting an already-missing artifact is a no-op.
    pub async fn remove(&self, name: &str) -> Result<(), StoreError> {
        let path = self.resolve(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Arm a fire-and-forget eviction timer for the named artifact.
    ///
    /// Eviction failures are logged, never escalated; `remove` is idempotent,
    /// so overlapping timers for the same name are harmless.
    pub fn schedule_removal(&self, name: &str, ttl: Duration) {
        let store = self.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            match store.remove(&name).await {
                Ok(()) => {
                    metrics::counter!("veduta_store_evict_total").increment(1);
                    debug!(target: "veduta::store", name, "artifact evicted");
                }
                Err(err) => {
                    warn!(
                        target: "veduta::store",
                        name,
                        error = %err,
                        "scheduled eviction failed"
                    );
                }
            }
        });
    }

    /// Resolve a bare artifact name against the root, rejecting anything that
    /// could escape the dump directory.
    fn resolve(&self, name: &str) -> Result<PathBuf, StoreError> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(name)),
            _ => Err(StoreError::InvalidName),
        }
    }
}
