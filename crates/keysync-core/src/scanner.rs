use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{LibraryError, Result};
use crate::filter::is_midi_candidate;
use crate::handle::{AccessMode, EntryHandle, FileHandle, PermissionState};
use crate::kv::KvBackend;
use crate::lifecycle::{EventBus, LibraryEvent};
use crate::metadata::SongMetadata;
use crate::midi::MetadataExtractor;
use crate::registry::{DirectoryRegistry, WatchedDirectory};
use crate::single_flight::SingleFlight;

/// Songs per watched directory id.
pub type SongMap = HashMap<String, Vec<SongMetadata>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed { directories: usize, songs: usize },
    /// The user declined access to `directory`; nothing was committed.
    PermissionDenied { directory: String },
}

type SharedScan = std::result::Result<ScanOutcome, Arc<LibraryError>>;

pub struct ScanCoordinator<B: KvBackend> {
    registry: Arc<DirectoryRegistry<B>>,
    extractor: MetadataExtractor,
    songs: RwLock<Arc<SongMap>>,
    flight: SingleFlight<SharedScan>,
    events: EventBus,
}

impl<B: KvBackend> ScanCoordinator<B> {
    pub fn new(
        registry: Arc<DirectoryRegistry<B>>,
        extractor: MetadataExtractor,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            extractor,
            songs: RwLock::new(Arc::new(SongMap::new())),
            flight: SingleFlight::new(),
            events,
        }
    }

    /// Last committed mapping.
    pub fn songs(&self) -> Arc<SongMap> {
        self.songs.read().clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.flight.in_flight()
    }

    pub fn song_handle(&self, directory_id: &str, name: &str) -> Option<Arc<dyn FileHandle>> {
        self.songs
            .read()
            .get(directory_id)?
            .iter()
            .filter_map(|song| song.handle.as_ref())
            .find(|handle| handle.name() == name)
            .cloned()
    }

    /// Walks every watched directory. A call made while a walk is running waits
    /// for that walk and receives its outcome. The walk runs on its own task and
    /// completes even if every caller stops waiting.
    pub async fn scan(self: &Arc<Self>) -> Result<ScanOutcome> {
        let this = self.clone();
        let outcome = self
            .flight
            .run(move || async move {
                this.events.emit(LibraryEvent::ScanStarted);
                let outcome = this.walk().await.map_err(Arc::new);
                this.events.emit(LibraryEvent::ScanFinished);
                outcome
            })
            .await
            .map_err(|err| LibraryError::ScanFailed(Arc::new(LibraryError::Task(err.to_string()))))?;
        outcome.map_err(LibraryError::ScanFailed)
    }

    async fn walk(&self) -> Result<ScanOutcome> {
        let directories = self.registry.list();

        if self.registry.requires_permission() {
            for dir in directories.iter() {
                let state = dir.handle.request_permission(AccessMode::Read).await?;
                if state != PermissionState::Granted {
                    warn!(directory = dir.handle.name(), "permission not granted");
                    return Ok(ScanOutcome::PermissionDenied {
                        directory: dir.handle.name().to_owned(),
                    });
                }
            }
            self.registry.set_requires_permission(false);
        }

        let mut songs = SongMap::new();
        for dir in directories.iter() {
            let found = self.scan_directory(dir).await?;
            songs.insert(dir.id.clone(), found);
        }

        // directories removed while the walk was running stay out
        songs.retain(|id, _| self.registry.contains(id));
        let outcome = ScanOutcome::Completed {
            directories: songs.len(),
            songs: songs.values().map(Vec::len).sum(),
        };
        *self.songs.write() = Arc::new(songs);
        self.events.emit(LibraryEvent::SongsChanged);
        info!(?outcome, "scan finished");
        Ok(outcome)
    }

    async fn scan_directory(&self, dir: &WatchedDirectory) -> Result<Vec<SongMetadata>> {
        let name = dir.handle.name();
        let entries = dir
            .handle
            .entries()
            .await
            .map_err(|source| LibraryError::Directory {
                name: name.to_owned(),
                source: Box::new(source),
            })?;

        let mut songs = Vec::new();
        for (entry_name, entry) in entries {
            let EntryHandle::File(file) = entry else {
                continue;
            };
            let info = match file.info().await {
                Ok(info) => info,
                Err(err) => {
                    warn!(directory = name, file = %entry_name, error = %err, "unable to inspect file");
                    continue;
                }
            };
            if !is_midi_candidate(&info) {
                continue;
            }
            let bytes = match file.read().await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(directory = name, file = %entry_name, error = %err, "unable to read file");
                    continue;
                }
            };
            match self.extractor.extract(bytes).await {
                Ok(duration) => {
                    songs.push(SongMetadata::local(&dir.id, &entry_name, duration, file));
                }
                Err(err) => {
                    warn!(directory = name, file = %entry_name, error = %err, "error parsing midi file");
                }
            }
        }
        debug!(directory = name, songs = songs.len(), "scanned directory");
        Ok(songs)
    }
}
