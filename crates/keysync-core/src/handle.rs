use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Prompt,
    Denied,
}

/// File content snapshot, the equivalent of a browser `File`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlob {
    pub name: String,
    pub media_type: String,
    pub bytes: Bytes,
}

impl FileBlob {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            bytes,
        }
    }
}

/// What can be known about a file without reading it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub media_type: String,
}

#[async_trait]
pub trait FileHandle: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Name and media type. Never touches the content.
    async fn info(&self) -> Result<FileInfo>;

    async fn read(&self) -> Result<Bytes>;

    async fn get_file(&self) -> Result<FileBlob> {
        let info = self.info().await?;
        let bytes = self.read().await?;
        Ok(FileBlob::new(info.name, info.media_type, bytes))
    }
}

#[derive(Debug, Clone)]
pub enum EntryHandle {
    File(Arc<dyn FileHandle>),
    Directory(Arc<dyn DirectoryHandle>),
}

/// A revocable, user-granted reference to a directory.
#[async_trait]
pub trait DirectoryHandle: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;
    /// Persistable form of the handle, accepted by [`DirectoryAccess::restore`].
    fn location(&self) -> String;
    async fn query_permission(&self, mode: AccessMode) -> Result<PermissionState>;
    async fn request_permission(&self, mode: AccessMode) -> Result<PermissionState>;
    async fn is_same_entry(&self, other: &dyn DirectoryHandle) -> Result<bool>;
    /// Direct children only.
    async fn entries(&self) -> Result<Vec<(String, EntryHandle)>>;
}

/// Platform capability that hands out directory handles.
#[async_trait]
pub trait DirectoryAccess: Send + Sync {
    fn is_supported(&self) -> bool {
        true
    }

    /// Prompts the user for a directory. `Ok(None)` means the prompt was dismissed.
    async fn pick_directory(&self) -> Result<Option<Arc<dyn DirectoryHandle>>>;

    fn restore(&self, location: &str) -> Arc<dyn DirectoryHandle>;
}
