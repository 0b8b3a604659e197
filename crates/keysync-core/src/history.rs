use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::kv::{KvBackend, KvKey, KvStore, PLAYBACK_HISTORY};
use crate::lifecycle::{EventBus, LibraryEvent};
use crate::metadata::{PlaybackHistoryEntry, SongKey, now_millis};

/// Newest-first log of plays. Grows without bound.
pub struct PlaybackHistory<B: KvBackend> {
    store: KvStore<B>,
    entries: RwLock<Arc<Vec<PlaybackHistoryEntry>>>,
    writes: tokio::sync::Mutex<()>,
    events: EventBus,
}

impl<B: KvBackend> PlaybackHistory<B> {
    pub fn new(store: KvStore<B>, events: EventBus) -> Self {
        Self {
            store,
            entries: RwLock::new(Arc::new(Vec::new())),
            writes: tokio::sync::Mutex::new(()),
            events,
        }
    }

    pub async fn load(&self) -> Result<()> {
        let entries: Vec<PlaybackHistoryEntry> = self
            .store
            .load(&KvKey::library(PLAYBACK_HISTORY))
            .await?
            .unwrap_or_default();
        *self.entries.write() = Arc::new(entries);
        Ok(())
    }

    pub fn entries(&self) -> Arc<Vec<PlaybackHistoryEntry>> {
        self.entries.read().clone()
    }

    pub async fn record(&self, key: &SongKey) -> Result<PlaybackHistoryEntry> {
        let _guard = self.writes.lock().await;
        let entry = PlaybackHistoryEntry::new(key, now_millis());
        let snapshot = {
            let mut entries = self.entries.write();
            let mut next = Vec::with_capacity(entries.len() + 1);
            next.push(entry.clone());
            next.extend(entries.iter().cloned());
            let next = Arc::new(next);
            *entries = next.clone();
            next
        };
        self.events.emit(LibraryEvent::HistoryChanged);
        self.store
            .store(&KvKey::library(PLAYBACK_HISTORY), snapshot.as_ref())
            .await?;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::testing::sled_store;
    use tempfile::tempdir;

    #[tokio::test]
    async fn newest_entry_comes_first() {
        let dir = tempdir().expect("tempdir");
        let kv = sled_store(dir.path());
        let history = PlaybackHistory::new(kv.clone(), EventBus::default());

        history.record(&SongKey::local("d/a.mid")).await.expect("a");
        let latest = history.record(&SongKey::local("d/b.mid")).await.expect("b");

        let entries = history.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], latest);
        assert_eq!(entries[1].song_id, "d/a.mid");

        let reloaded = PlaybackHistory::new(kv, EventBus::default());
        reloaded.load().await.expect("load");
        assert_eq!(reloaded.entries(), entries);
    }
}
