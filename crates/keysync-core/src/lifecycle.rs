use tokio::sync::broadcast;

use crate::metadata::SongKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    Initializing,
    Initialized,
}

/// Change notifications for observers of the library state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryEvent {
    DirectoriesChanged,
    PermissionRequired(bool),
    ScanStarted,
    ScanFinished,
    SongsChanged,
    MetadataChanged(SongKey),
    HistoryChanged,
    UploadsChanged,
    Initialized,
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LibraryEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LibraryEvent> {
        self.sender.subscribe()
    }

    /// Having no subscribers is fine.
    pub fn emit(&self, event: LibraryEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
