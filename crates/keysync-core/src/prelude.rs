pub use crate::config::{ConfigValidationError, LibraryConfig};
pub use crate::error::{LibraryError, Result};
pub use crate::filesystem::{FsDirectoryAccess, FsDirectoryHandle, FsFileHandle};
pub use crate::handle::{
    AccessMode, DirectoryAccess, DirectoryHandle, EntryHandle, FileBlob, FileHandle, FileInfo,
    PermissionState,
};
pub use crate::library::Library;
pub use crate::lifecycle::{InitState, LibraryEvent};
pub use crate::metadata::{
    ExtendedSongMetadata, MetadataEdit, PlaybackHistoryEntry, SongKey, SongMetadata,
    SongSource,
};
pub use crate::query::{LibraryQuery, SortOrder};
pub use crate::registry::WatchedDirectory;
pub use crate::scanner::ScanOutcome;
