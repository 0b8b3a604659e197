use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::error::Result;
use crate::filter::upload_title;
use crate::handle::FileBlob;
use crate::kv::{KvBackend, KvKey, KvStore, UPLOADED_SONGS};
use crate::lifecycle::{EventBus, LibraryEvent};
use crate::metadata::{SongMetadata, Timestamp, now_millis};
use crate::midi::MetadataExtractor;

/// Uploaded files for the lifetime of the process, plus the persisted list
/// describing every upload. Entries from earlier sessions keep their metadata
/// but have no bytes; [`UploadCache::get_file`] returns `None` for them.
pub struct UploadCache<B: KvBackend> {
    store: KvStore<B>,
    extractor: MetadataExtractor,
    files: RwLock<HashMap<String, FileBlob>>,
    songs: RwLock<Arc<Vec<SongMetadata>>>,
    writes: tokio::sync::Mutex<()>,
    events: EventBus,
}

impl<B: KvBackend> UploadCache<B> {
    pub fn new(store: KvStore<B>, extractor: MetadataExtractor, events: EventBus) -> Self {
        Self {
            store,
            extractor,
            files: RwLock::new(HashMap::new()),
            songs: RwLock::new(Arc::new(Vec::new())),
            writes: tokio::sync::Mutex::new(()),
            events,
        }
    }

    pub async fn load(&self) -> Result<()> {
        let songs: Vec<SongMetadata> = self
            .store
            .load(&KvKey::library(UPLOADED_SONGS))
            .await?
            .unwrap_or_default();
        *self.songs.write() = Arc::new(songs);
        Ok(())
    }

    pub fn songs(&self) -> Arc<Vec<SongMetadata>> {
        self.songs.read().clone()
    }

    pub fn get_file(&self, id: &str) -> Option<FileBlob> {
        self.files.read().get(id).cloned()
    }

    pub async fn upload(&self, file: FileBlob) -> Result<SongMetadata> {
        let duration = self.extractor.extract(file.bytes.clone()).await?;

        let _guard = self.writes.lock().await;
        let id = upload_id(&self.songs(), now_millis(), &file.name);
        let song = SongMetadata::uploaded(id.clone(), upload_title(&file.name).to_owned(), duration);
        self.files.write().insert(id.clone(), file);
        let snapshot = {
            let mut songs = self.songs.write();
            let mut next = songs.as_ref().clone();
            next.push(song.clone());
            let next = Arc::new(next);
            *songs = next.clone();
            next
        };
        self.events.emit(LibraryEvent::UploadsChanged);
        self.store
            .store(&KvKey::library(UPLOADED_SONGS), snapshot.as_ref())
            .await?;
        info!(id = %id, duration, "stored uploaded song");
        Ok(song)
    }
}

/// `upload-<millis>-<name>`, with a counter before the name when an earlier
/// upload already took that id.
fn upload_id(existing: &[SongMetadata], stamp: Timestamp, name: &str) -> String {
    let taken = |id: &str| existing.iter().any(|song| song.id == id);
    let mut id = format!("upload-{stamp}-{name}");
    let mut counter = 1;
    while taken(&id) {
        id = format!("upload-{stamp}-{counter}-{name}");
        counter += 1;
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LibraryError;
    use crate::kv::testing::sled_store;
    use crate::metadata::SongSource;
    use crate::midi::tests::TWO_SECOND_SONG;
    use bytes::Bytes;
    use tempfile::tempdir;

    fn cache(kv: KvStore<crate::kv::SledBackend>) -> UploadCache<crate::kv::SledBackend> {
        UploadCache::new(kv, MetadataExtractor::default(), EventBus::default())
    }

    #[tokio::test]
    async fn upload_keeps_bytes_for_the_session_only() {
        let dir = tempdir().expect("tempdir");
        let kv = sled_store(dir.path());
        let uploads = cache(kv.clone());

        let song = uploads
            .upload(FileBlob::new(
                "Prelude.MID",
                "audio/midi",
                Bytes::from_static(TWO_SECOND_SONG),
            ))
            .await
            .expect("upload");
        assert!(song.id.starts_with("upload-"));
        assert!(song.id.ends_with("-Prelude.MID"));
        assert_eq!(song.title, "Prelude");
        assert_eq!(song.file, song.id);
        assert_eq!(song.source, SongSource::Uploaded);
        assert!((song.duration - 2.0).abs() < 1e-9);
        assert!(uploads.get_file(&song.id).is_some());

        let restarted = cache(kv);
        restarted.load().await.expect("load");
        assert_eq!(restarted.songs().len(), 1);
        assert_eq!(restarted.songs()[0].id, song.id);
        assert!(restarted.get_file(&song.id).is_none());
    }

    #[tokio::test]
    async fn unparseable_upload_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let uploads = cache(sled_store(dir.path()));

        let err = uploads
            .upload(FileBlob::new("x.mid", "", Bytes::from_static(b"nope")))
            .await
            .unwrap_err();
        assert!(matches!(err, LibraryError::Midi(_)));
        assert!(uploads.songs().is_empty());
    }

    #[test]
    fn same_name_in_the_same_millisecond_gets_a_new_id() {
        let first = SongMetadata::uploaded("upload-7-a.mid".into(), "a".into(), 1.0);
        let second = SongMetadata::uploaded("upload-7-1-a.mid".into(), "a".into(), 1.0);

        assert_eq!(upload_id(&[], 7, "a.mid"), "upload-7-a.mid");
        assert_eq!(upload_id(&[first.clone()], 7, "a.mid"), "upload-7-1-a.mid");
        assert_eq!(upload_id(&[first, second], 7, "a.mid"), "upload-7-2-a.mid");
    }

    #[tokio::test]
    async fn repeated_uploads_keep_their_own_bytes() {
        let dir = tempdir().expect("tempdir");
        let uploads = cache(sled_store(dir.path()));
        let blob = FileBlob::new("a.mid", "audio/midi", Bytes::from_static(TWO_SECOND_SONG));

        let first = uploads.upload(blob.clone()).await.expect("first");
        let second = uploads.upload(blob).await.expect("second");

        assert_ne!(first.id, second.id);
        assert_eq!(uploads.songs().len(), 2);
        assert!(uploads.get_file(&first.id).is_some());
        assert!(uploads.get_file(&second.id).is_some());
    }
}
