use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{OnceCell, broadcast};
use tracing::{debug, error, info, warn};

use crate::config::LibraryConfig;
use crate::error::{LibraryError, Result};
use crate::extended::{ExtendedMetadataMap, ExtendedMetadataStore};
use crate::handle::{DirectoryAccess, FileBlob, FileHandle};
use crate::history::PlaybackHistory;
use crate::kv::{KvBackend, KvCodec, KvKey, KvNamespace, KvStore, SledBackend};
use crate::lifecycle::{EventBus, InitState, LibraryEvent};
use crate::metadata::{
    ExtendedSongMetadata, MetadataEdit, PlaybackHistoryEntry, SongKey, SongMetadata,
};
use crate::midi::MetadataExtractor;
use crate::query::{self, LibraryQuery};
use crate::registry::{DirectoryRegistry, WatchedDirectory};
use crate::scanner::{ScanCoordinator, ScanOutcome, SongMap};
use crate::upload::UploadCache;

/// Application state for the local song library. Construct once and share.
pub struct Library<B: KvBackend> {
    config: Arc<LibraryConfig>,
    store: KvStore<B>,
    access: Arc<dyn DirectoryAccess>,
    registry: Arc<DirectoryRegistry<B>>,
    scanner: Arc<ScanCoordinator<B>>,
    extended: ExtendedMetadataStore<B>,
    history: PlaybackHistory<B>,
    uploads: UploadCache<B>,
    init: OnceCell<()>,
    state: RwLock<InitState>,
    events: EventBus,
}

impl Library<SledBackend> {
    pub fn open(config: LibraryConfig, access: Arc<dyn DirectoryAccess>) -> Result<Self> {
        config.validate()?;
        let backend = SledBackend::open(&config.store_path)?;
        Ok(Self::new(
            config,
            KvStore::new(Arc::new(backend)),
            access,
            MetadataExtractor::default(),
        ))
    }

    pub async fn flush(&self) -> Result<()> {
        self.store.backend().flush().await
    }
}

impl<B: KvBackend> Library<B> {
    pub fn new(
        config: LibraryConfig,
        store: KvStore<B>,
        access: Arc<dyn DirectoryAccess>,
        extractor: MetadataExtractor,
    ) -> Self {
        let events = EventBus::default();
        let registry = Arc::new(DirectoryRegistry::new(
            store.clone(),
            access.clone(),
            events.clone(),
        ));
        let scanner = Arc::new(ScanCoordinator::new(
            registry.clone(),
            extractor.clone(),
            events.clone(),
        ));
        Self {
            config: Arc::new(config),
            extended: ExtendedMetadataStore::new(store.clone(), events.clone()),
            history: PlaybackHistory::new(store.clone(), events.clone()),
            uploads: UploadCache::new(store.clone(), extractor, events.clone()),
            store,
            access,
            registry,
            scanner,
            init: OnceCell::new(),
            state: RwLock::new(InitState::Uninitialized),
            events,
        }
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LibraryEvent> {
        self.events.subscribe()
    }

    pub fn init_state(&self) -> InitState {
        *self.state.read()
    }

    pub fn is_initialized(&self) -> bool {
        self.init_state() == InitState::Initialized
    }

    /// Loads persisted state and runs the first scan. Runs once per library;
    /// concurrent callers wait for the same bootstrap. Failures are logged and
    /// the library still ends up initialized.
    pub async fn initialize(&self) {
        self.init
            .get_or_init(|| async {
                *self.state.write() = InitState::Initializing;
                if let Err(err) = self.bootstrap().await {
                    error!(error = %err, "library initialization failed");
                }
                *self.state.write() = InitState::Initialized;
                self.events.emit(LibraryEvent::Initialized);
            })
            .await;
    }

    async fn bootstrap(&self) -> Result<()> {
        let retired = self.store.clear(KvNamespace::Legacy).await?;
        if retired > 0 {
            info!(retired, "removed retired keys");
        }

        self.registry.load().await?;
        if self.registry.check_permissions().await? {
            if let Err(err) = self.scanner.scan().await {
                error!(error = %err, "initial scan failed");
            }
        } else {
            info!("directory permission required, deferring scan");
        }

        self.extended.load().await?;
        self.history.load().await?;
        self.uploads.load().await?;
        Ok(())
    }

    pub fn is_directory_access_supported(&self) -> bool {
        self.access.is_supported()
    }

    /// Prompts for a directory and starts watching it. Returns `None` when the
    /// prompt was dismissed or the directory is already watched.
    pub async fn add_folder(&self) -> Result<Option<WatchedDirectory>> {
        if !self.access.is_supported() {
            return Err(LibraryError::Unsupported(
                "directory access is not supported on this platform",
            ));
        }
        self.initialize().await;

        let Some(handle) = self.access.pick_directory().await? else {
            debug!("folder selection dismissed");
            return Ok(None);
        };
        match self.registry.register(handle).await? {
            Some(dir) => {
                self.scan_folders().await?;
                Ok(Some(dir))
            }
            None => Ok(None),
        }
    }

    /// Stops watching `id` and rescans. `Ok` means the removal was persisted;
    /// a failing rescan is only logged.
    pub async fn remove_folder(&self, id: &str) -> Result<()> {
        if !self.registry.remove(id).await? {
            return Ok(());
        }
        if let Err(err) = self.scan_folders().await {
            warn!(directory_id = id, error = %err, "rescan after removing folder failed");
        }
        Ok(())
    }

    pub async fn scan_folders(&self) -> Result<ScanOutcome> {
        let outcome = self.scanner.scan().await?;
        if let ScanOutcome::PermissionDenied { directory } = &outcome {
            warn!(%directory, "scan aborted, permission required");
        }
        Ok(outcome)
    }

    /// Resolves a local song id (`<directoryId>/<filename>`) to its file.
    pub async fn get_song_handle(&self, id: &str) -> Option<Arc<dyn FileHandle>> {
        self.initialize().await;
        let (directory_id, name) = id.split_once('/')?;
        if !self.registry.contains(directory_id) {
            error!(directory_id, "missing expected directory handle");
            return None;
        }
        self.scanner.song_handle(directory_id, name)
    }

    pub async fn upload_midi_file(&self, file: FileBlob) -> Result<SongMetadata> {
        self.uploads.upload(file).await
    }

    pub fn get_uploaded_file(&self, id: &str) -> Option<FileBlob> {
        self.uploads.get_file(id)
    }

    /// Merges genre, rating and custom difficulty. Play statistics are only
    /// changed by [`add_to_history`](Self::add_to_history).
    pub async fn update_extended_metadata(
        &self,
        key: &SongKey,
        edit: MetadataEdit,
    ) -> Result<ExtendedSongMetadata> {
        self.extended.edit(key, edit).await
    }

    /// Records a play, then bumps the song's play count and last played time.
    /// The two writes are separate; a crash between them leaves the count behind.
    pub async fn add_to_history(&self, key: &SongKey) -> Result<PlaybackHistoryEntry> {
        let entry = self.history.record(key).await?;
        self.extended.record_play(key, entry.timestamp).await?;
        Ok(entry)
    }

    pub async fn song_settings<T: KvCodec>(&self, file: &str) -> Result<Option<T>> {
        self.store.load(&Self::settings_key(file)).await
    }

    pub async fn set_song_settings<T: KvCodec>(&self, file: &str, settings: &T) -> Result<()> {
        self.store.store(&Self::settings_key(file), settings).await
    }

    fn settings_key(file: &str) -> KvKey {
        KvKey::new(KvNamespace::Settings, format!("{file}/settings"))
    }

    pub fn directories(&self) -> Arc<Vec<WatchedDirectory>> {
        self.registry.list()
    }

    pub fn requires_permission(&self) -> bool {
        self.registry.requires_permission()
    }

    pub fn songs(&self) -> Arc<SongMap> {
        self.scanner.songs()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    pub fn extended_metadata(&self) -> Arc<ExtendedMetadataMap> {
        self.extended.snapshot()
    }

    pub fn history(&self) -> Arc<Vec<PlaybackHistoryEntry>> {
        self.history.entries()
    }

    pub fn uploaded_songs(&self) -> Arc<Vec<SongMetadata>> {
        self.uploads.songs()
    }

    /// Local songs in directory order, then uploads.
    pub fn all_songs(&self) -> Vec<SongMetadata> {
        let songs = self.scanner.songs();
        let mut all: Vec<SongMetadata> = self
            .registry
            .list()
            .iter()
            .filter_map(|dir| songs.get(&dir.id))
            .flatten()
            .cloned()
            .collect();
        all.extend(self.uploads.songs().iter().cloned());
        all
    }

    pub fn query(&self, query: &LibraryQuery) -> Vec<SongMetadata> {
        query::apply(&self.all_songs(), &self.extended.snapshot(), query)
    }

    pub fn recently_played(&self) -> Vec<SongMetadata> {
        query::recently_played(
            &self.all_songs(),
            &self.extended.snapshot(),
            self.config.recent_limit,
        )
    }
}
