use std::path::Path;

use async_trait::async_trait;
use tokio::task::spawn_blocking;

use crate::error::{LibraryError, Result};

use super::{KvBackend, KvKey, KvNamespace};

/// One sled database, one tree per [`KvNamespace`].
pub struct SledBackend {
    db: sled::Db,
    library: sled::Tree,
    settings: sled::Tree,
    legacy: sled::Tree,
}

impl SledBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|err| LibraryError::Kv(format!("unable to open sled db: {err}")))?;
        let open = |namespace: KvNamespace| {
            db.open_tree(namespace.name())
                .map_err(|err| LibraryError::Kv(format!("unable to open {namespace} tree: {err}")))
        };
        Ok(Self {
            library: open(KvNamespace::Library)?,
            settings: open(KvNamespace::Settings)?,
            legacy: open(KvNamespace::Legacy)?,
            db,
        })
    }

    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map(|_| ())
            .map_err(|err| LibraryError::Kv(format!("flush failed: {err}")))
    }

    fn tree(&self, namespace: KvNamespace) -> sled::Tree {
        match namespace {
            KvNamespace::Library => self.library.clone(),
            KvNamespace::Settings => self.settings.clone(),
            KvNamespace::Legacy => self.legacy.clone(),
        }
    }
}

/// Runs a sled call off the async workers.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> sled::Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(work)
        .await
        .map_err(|err| LibraryError::Task(err.to_string()))?
        .map_err(|err| LibraryError::Kv(err.to_string()))
}

#[async_trait]
impl KvBackend for SledBackend {
    async fn get(&self, key: &KvKey) -> Result<Option<Vec<u8>>> {
        let tree = self.tree(key.namespace);
        let name = key.key.clone();
        let value = blocking(move || tree.get(name.as_bytes())).await?;
        Ok(value.map(|ivec| ivec.to_vec()))
    }

    async fn put(&self, key: &KvKey, value: Vec<u8>) -> Result<()> {
        let tree = self.tree(key.namespace);
        let name = key.key.clone();
        blocking(move || tree.insert(name.as_bytes(), value)).await?;
        Ok(())
    }

    async fn clear(&self, namespace: KvNamespace) -> Result<usize> {
        let tree = self.tree(namespace);
        blocking(move || {
            let removed = tree.len();
            tree.clear()?;
            Ok(removed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::PLAYBACK_HISTORY;
    use crate::kv::testing::sled_store;
    use crate::metadata::{PlaybackHistoryEntry, SongKey};

    #[tokio::test]
    async fn history_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let key = KvKey::library(PLAYBACK_HISTORY);
        let history = vec![PlaybackHistoryEntry::new(&SongKey::local("dir/a.mid"), 42)];

        {
            let store = sled_store(dir.path());
            store.store(&key, &history).await.expect("store");
            store.backend().flush().await.expect("flush");
        }

        let store = sled_store(dir.path());
        let fetched = store
            .load::<Vec<PlaybackHistoryEntry>>(&key)
            .await
            .expect("load");
        assert_eq!(fetched, Some(history));
    }

    #[tokio::test]
    async fn clearing_legacy_leaves_other_namespaces() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = sled_store(dir.path());
        let retired = KvKey::new(KvNamespace::Legacy, "songs");
        let settings = KvKey::new(KvNamespace::Settings, "songs");
        store.store(&retired, &1).await.expect("store legacy");
        store.store(&settings, &2).await.expect("store settings");

        assert_eq!(store.clear(KvNamespace::Legacy).await.expect("clear"), 1);
        assert_eq!(store.clear(KvNamespace::Legacy).await.expect("clear"), 0);

        assert_eq!(store.load::<u32>(&retired).await.expect("load"), None);
        assert_eq!(store.load::<u32>(&settings).await.expect("load"), Some(2));
    }

    #[tokio::test]
    async fn malformed_value_is_a_kv_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = sled_store(dir.path());
        let key = KvKey::library("broken");
        store
            .backend()
            .put(&key, b"not json".to_vec())
            .await
            .expect("put");

        let err = store.load::<Vec<u32>>(&key).await.unwrap_err();
        assert!(matches!(err, LibraryError::Kv(message) if message.starts_with("library:broken")));
    }
}
