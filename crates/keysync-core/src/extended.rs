use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::kv::{KvBackend, KvKey, KvStore, SONG_EXTENDED_METADATA};
use crate::lifecycle::{EventBus, LibraryEvent};
use crate::metadata::{ExtendedSongMetadata, MetadataEdit, SongKey, Timestamp};

pub type ExtendedMetadataMap = HashMap<SongKey, ExtendedSongMetadata>;

/// Rating, genre, difficulty and play statistics per song.
pub struct ExtendedMetadataStore<B: KvBackend> {
    store: KvStore<B>,
    records: RwLock<Arc<ExtendedMetadataMap>>,
    writes: tokio::sync::Mutex<()>,
    events: EventBus,
}

impl<B: KvBackend> ExtendedMetadataStore<B> {
    pub fn new(store: KvStore<B>, events: EventBus) -> Self {
        Self {
            store,
            records: RwLock::new(Arc::new(ExtendedMetadataMap::new())),
            writes: tokio::sync::Mutex::new(()),
            events,
        }
    }

    pub async fn load(&self) -> Result<()> {
        let records: ExtendedMetadataMap = self
            .store
            .load(&Self::key())
            .await?
            .unwrap_or_default();
        *self.records.write() = Arc::new(records);
        Ok(())
    }

    pub fn snapshot(&self) -> Arc<ExtendedMetadataMap> {
        self.records.read().clone()
    }

    pub fn get(&self, key: &SongKey) -> Option<ExtendedSongMetadata> {
        self.records.read().get(key).cloned()
    }

    /// Merges the user-editable fields of `edit` into the record for `key`.
    pub async fn edit(&self, key: &SongKey, edit: MetadataEdit) -> Result<ExtendedSongMetadata> {
        self.modify(key, |record| record.apply(&edit)).await
    }

    pub async fn record_play(
        &self,
        key: &SongKey,
        timestamp: Timestamp,
    ) -> Result<ExtendedSongMetadata> {
        self.modify(key, |record| record.record_play(timestamp)).await
    }

    /// Writes are serialized, so read-modify-write sequences cannot interleave.
    async fn modify<F>(&self, key: &SongKey, change: F) -> Result<ExtendedSongMetadata>
    where
        F: FnOnce(&mut ExtendedSongMetadata),
    {
        let _guard = self.writes.lock().await;
        let (merged, snapshot) = {
            let mut records = self.records.write();
            let mut next = records.as_ref().clone();
            let record = next.entry(key.clone()).or_default();
            change(record);
            let merged = record.clone();
            let next = Arc::new(next);
            *records = next.clone();
            (merged, next)
        };
        self.events.emit(LibraryEvent::MetadataChanged(key.clone()));
        self.store.store(&Self::key(), snapshot.as_ref()).await?;
        Ok(merged)
    }

    fn key() -> KvKey {
        KvKey::library(SONG_EXTENDED_METADATA)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::testing::sled_store;
    use tempfile::tempdir;

    #[tokio::test]
    async fn updates_merge_instead_of_replacing() {
        let dir = tempdir().expect("tempdir");
        let store = ExtendedMetadataStore::new(sled_store(dir.path()), EventBus::default());
        let key = SongKey::local("d/a.mid");

        store
            .edit(
                &key,
                MetadataEdit {
                    score: Some(4),
                    ..Default::default()
                },
            )
            .await
            .expect("score");
        let merged = store
            .edit(
                &key,
                MetadataEdit {
                    genre: Some("Jazz".into()),
                    ..Default::default()
                },
            )
            .await
            .expect("genre");

        assert_eq!(merged.score, Some(4));
        assert_eq!(merged.genre.as_deref(), Some("Jazz"));
        assert_eq!(store.get(&key), Some(merged));
    }

    #[tokio::test]
    async fn records_reload_from_store() {
        let dir = tempdir().expect("tempdir");
        let kv = sled_store(dir.path());
        let key = SongKey::uploaded("upload-1-a.mid");

        let writer = ExtendedMetadataStore::new(kv.clone(), EventBus::default());
        writer
            .edit(
                &key,
                MetadataEdit {
                    difficulty_custom: Some(70),
                    ..Default::default()
                },
            )
            .await
            .expect("update");

        let reader = ExtendedMetadataStore::new(kv, EventBus::default());
        assert!(reader.get(&key).is_none());
        reader.load().await.expect("load");
        assert_eq!(reader.get(&key).and_then(|r| r.difficulty_custom), Some(70));
    }

    #[tokio::test]
    async fn snapshots_are_not_mutated_in_place() {
        let dir = tempdir().expect("tempdir");
        let store = ExtendedMetadataStore::new(sled_store(dir.path()), EventBus::default());
        let before = store.snapshot();

        store
            .edit(&SongKey::local("d/a.mid"), MetadataEdit::default())
            .await
            .expect("edit");

        assert!(before.is_empty());
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn edits_leave_play_statistics_alone() {
        let dir = tempdir().expect("tempdir");
        let store = ExtendedMetadataStore::new(sled_store(dir.path()), EventBus::default());
        let key = SongKey::local("d/a.mid");
        store.record_play(&key, 10).await.expect("play");
        store.record_play(&key, 20).await.expect("play");

        let edited = store
            .edit(
                &key,
                MetadataEdit {
                    score: Some(2),
                    ..Default::default()
                },
            )
            .await
            .expect("edit");

        assert_eq!(edited.play_count, Some(2));
        assert_eq!(edited.last_played, Some(20));
        assert_eq!(edited.score, Some(2));
    }
}
