use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::handle::{AccessMode, DirectoryAccess, DirectoryHandle, PermissionState};
use crate::kv::{KvBackend, KvKey, KvStore, OBSERVED_DIRECTORIES};
use crate::lifecycle::{EventBus, LibraryEvent};
use crate::metadata::{Timestamp, now_millis};

#[derive(Debug, Clone)]
pub struct WatchedDirectory {
    pub id: String,
    pub added_at: Timestamp,
    pub handle: Arc<dyn DirectoryHandle>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct DirectoryRecord {
    id: String,
    added_at: Timestamp,
    location: String,
}

impl From<&WatchedDirectory> for DirectoryRecord {
    fn from(dir: &WatchedDirectory) -> Self {
        Self {
            id: dir.id.clone(),
            added_at: dir.added_at,
            location: dir.handle.location(),
        }
    }
}

/// Owns the watched directories and the shared permission flag.
pub struct DirectoryRegistry<B: KvBackend> {
    store: KvStore<B>,
    access: Arc<dyn DirectoryAccess>,
    directories: RwLock<Arc<Vec<WatchedDirectory>>>,
    requires_permission: AtomicBool,
    mutation: tokio::sync::Mutex<()>,
    events: EventBus,
}

impl<B: KvBackend> DirectoryRegistry<B> {
    pub fn new(store: KvStore<B>, access: Arc<dyn DirectoryAccess>, events: EventBus) -> Self {
        Self {
            store,
            access,
            directories: RwLock::new(Arc::new(Vec::new())),
            requires_permission: AtomicBool::new(false),
            mutation: tokio::sync::Mutex::new(()),
            events,
        }
    }

    pub fn list(&self) -> Arc<Vec<WatchedDirectory>> {
        self.directories.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<WatchedDirectory> {
        self.directories.read().iter().find(|dir| dir.id == id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.directories.read().iter().any(|dir| dir.id == id)
    }

    pub fn requires_permission(&self) -> bool {
        self.requires_permission.load(Ordering::SeqCst)
    }

    pub fn set_requires_permission(&self, value: bool) {
        if self.requires_permission.swap(value, Ordering::SeqCst) != value {
            self.events.emit(LibraryEvent::PermissionRequired(value));
        }
    }

    pub async fn load(&self) -> Result<()> {
        let records: Vec<DirectoryRecord> = self
            .store
            .load(&KvKey::library(OBSERVED_DIRECTORIES))
            .await?
            .unwrap_or_default();
        let directories = records
            .into_iter()
            .map(|record| WatchedDirectory {
                handle: self.access.restore(&record.location),
                id: record.id,
                added_at: record.added_at,
            })
            .collect::<Vec<_>>();
        debug!(count = directories.len(), "loaded watched directories");
        self.install(directories);
        Ok(())
    }

    /// Queries (without prompting) read access to every directory. Any miss marks
    /// the whole registry as requiring permission.
    pub async fn check_permissions(&self) -> Result<bool> {
        let directories = self.list();
        let mut granted = true;
        for dir in directories.iter() {
            let state = dir.handle.query_permission(AccessMode::Read).await?;
            if state != PermissionState::Granted {
                debug!(directory = dir.handle.name(), ?state, "read permission missing");
                granted = false;
            }
        }
        if !granted {
            self.set_requires_permission(true);
        }
        Ok(granted)
    }

    /// Adds `handle` unless an equivalent directory is already watched.
    pub async fn register(
        &self,
        handle: Arc<dyn DirectoryHandle>,
    ) -> Result<Option<WatchedDirectory>> {
        let _guard = self.mutation.lock().await;
        let current = self.list();
        for dir in current.iter() {
            if dir.handle.is_same_entry(handle.as_ref()).await? {
                debug!(directory = handle.name(), id = %dir.id, "directory already watched");
                return Ok(None);
            }
        }

        let entry = WatchedDirectory {
            id: uuid::Uuid::new_v4().to_string(),
            added_at: now_millis(),
            handle,
        };
        let mut next = current.as_ref().clone();
        next.push(entry.clone());
        self.install(next.clone());
        self.persist(&next).await?;
        info!(directory = entry.handle.name(), id = %entry.id, "watching directory");
        Ok(Some(entry))
    }

    /// Returns whether anything was removed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let _guard = self.mutation.lock().await;
        let current = self.list();
        if !current.iter().any(|dir| dir.id == id) {
            debug!(id, "ignoring removal of unknown directory");
            return Ok(false);
        }
        let next = current
            .iter()
            .filter(|dir| dir.id != id)
            .cloned()
            .collect::<Vec<_>>();
        self.install(next.clone());
        self.persist(&next).await?;
        info!(id, "stopped watching directory");
        Ok(true)
    }

    fn install(&self, directories: Vec<WatchedDirectory>) {
        *self.directories.write() = Arc::new(directories);
        self.events.emit(LibraryEvent::DirectoriesChanged);
    }

    async fn persist(&self, directories: &[WatchedDirectory]) -> Result<()> {
        let records = directories
            .iter()
            .map(DirectoryRecord::from)
            .collect::<Vec<_>>();
        self.store
            .store(&KvKey::library(OBSERVED_DIRECTORIES), &records)
            .await
    }
}
