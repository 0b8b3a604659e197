use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::fs;

use crate::error::Result;
use crate::handle::{
    AccessMode, DirectoryAccess, DirectoryHandle, EntryHandle, FileHandle, FileInfo,
    PermissionState,
};

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[derive(Debug, Clone)]
pub struct FsFileHandle {
    path: PathBuf,
    name: String,
}

impl FsFileHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = display_name(&path);
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl FileHandle for FsFileHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn info(&self) -> Result<FileInfo> {
        let media_type = mime_guess::from_path(&self.path)
            .first_raw()
            .unwrap_or_default();
        Ok(FileInfo {
            name: self.name.clone(),
            media_type: media_type.to_owned(),
        })
    }

    async fn read(&self) -> Result<Bytes> {
        let meta = fs::metadata(&self.path).await?;
        if !meta.is_file() {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("{} is not a regular file", self.path.display()),
            )
            .into());
        }
        Ok(Bytes::from(fs::read(&self.path).await?))
    }
}

#[derive(Debug, Clone)]
pub struct FsDirectoryHandle {
    path: PathBuf,
    name: String,
}

impl FsDirectoryHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = display_name(&path);
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn readable(&self) -> bool {
        fs::read_dir(&self.path).await.is_ok()
    }
}

#[async_trait]
impl DirectoryHandle for FsDirectoryHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn location(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    async fn query_permission(&self, _mode: AccessMode) -> Result<PermissionState> {
        Ok(if self.readable().await {
            PermissionState::Granted
        } else {
            PermissionState::Prompt
        })
    }

    async fn request_permission(&self, _mode: AccessMode) -> Result<PermissionState> {
        Ok(if self.readable().await {
            PermissionState::Granted
        } else {
            PermissionState::Denied
        })
    }

    async fn is_same_entry(&self, other: &dyn DirectoryHandle) -> Result<bool> {
        let other = PathBuf::from(other.location());
        match (fs::canonicalize(&self.path).await, fs::canonicalize(&other).await) {
            (Ok(left), Ok(right)) => Ok(left == right),
            // a directory that no longer resolves can only match its own path
            _ => Ok(self.path == other),
        }
    }

    async fn entries(&self) -> Result<Vec<(String, EntryHandle)>> {
        let mut reader = fs::read_dir(&self.path).await?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let mut file_type = entry.file_type().await?;
            if file_type.is_symlink() {
                match fs::metadata(&path).await {
                    Ok(meta) => file_type = meta.file_type(),
                    Err(err) if err.kind() == ErrorKind::NotFound => continue,
                    Err(err) => return Err(err.into()),
                }
            }
            let handle = if file_type.is_dir() {
                EntryHandle::Directory(Arc::new(FsDirectoryHandle::new(path)))
            } else if file_type.is_file() {
                EntryHandle::File(Arc::new(FsFileHandle::new(path)))
            } else {
                // pipes, sockets and devices
                continue;
            };
            entries.push((name, handle));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}

/// Local filesystem access. Folder "prompts" are answered from a queue of
/// preselected paths, an empty queue behaving like a dismissed picker.
#[derive(Debug, Default)]
pub struct FsDirectoryAccess {
    selections: Mutex<VecDeque<PathBuf>>,
}

impl FsDirectoryAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&self, path: impl Into<PathBuf>) {
        self.selections.lock().push_back(path.into());
    }
}

#[async_trait]
impl DirectoryAccess for FsDirectoryAccess {
    async fn pick_directory(&self) -> Result<Option<Arc<dyn DirectoryHandle>>> {
        let Some(path) = self.selections.lock().pop_front() else {
            return Ok(None);
        };
        let meta = fs::metadata(&path).await?;
        if !meta.is_dir() {
            return Err(std::io::Error::new(
                ErrorKind::NotADirectory,
                format!("{} is not a directory", path.display()),
            )
            .into());
        }
        Ok(Some(Arc::new(FsDirectoryHandle::new(path))))
    }

    fn restore(&self, location: &str) -> Arc<dyn DirectoryHandle> {
        Arc::new(FsDirectoryHandle::new(location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn lists_direct_children_only() {
        let dir = tempdir().expect("tempdir");
        stdfs::write(dir.path().join("b.mid"), b"MThd").expect("write");
        stdfs::write(dir.path().join("a.txt"), b"notes").expect("write");
        stdfs::create_dir(dir.path().join("nested")).expect("mkdir");
        stdfs::write(dir.path().join("nested").join("c.mid"), b"MThd").expect("write");

        let handle = FsDirectoryHandle::new(dir.path());
        let entries = handle.entries().await.expect("entries");
        let names: Vec<_> = entries.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.mid", "nested"]);
        assert!(matches!(entries[2].1, EntryHandle::Directory(_)));
    }

    #[tokio::test]
    async fn file_blob_carries_guessed_media_type() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("song.mid");
        stdfs::write(&path, b"MThd").expect("write");

        let blob = FsFileHandle::new(&path).get_file().await.expect("blob");
        assert_eq!(blob.name, "song.mid");
        assert_eq!(blob.media_type, "audio/midi");
        assert_eq!(&blob.bytes[..], b"MThd");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn special_files_are_not_listed() {
        let dir = tempdir().expect("tempdir");
        stdfs::write(dir.path().join("a.mid"), b"MThd").expect("write");
        let pipe = dir.path().join("notes.pipe");
        let status = std::process::Command::new("mkfifo")
            .arg(&pipe)
            .status()
            .expect("mkfifo");
        assert!(status.success());

        let handle = FsDirectoryHandle::new(dir.path());
        let entries = handle.entries().await.expect("entries");
        let names: Vec<_> = entries.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["a.mid"]);

        let err = FsFileHandle::new(&pipe).read().await.unwrap_err();
        assert!(matches!(err, crate::error::LibraryError::Io(_)));
    }

    #[tokio::test]
    async fn same_entry_resolves_through_relative_segments() {
        let dir = tempdir().expect("tempdir");
        stdfs::create_dir(dir.path().join("books")).expect("mkdir");
        let direct = FsDirectoryHandle::new(dir.path().join("books"));
        let dotted = FsDirectoryHandle::new(dir.path().join("books").join(".."));
        let roundabout = FsDirectoryHandle::new(dir.path().join("books").join("..").join("books"));

        assert!(direct.is_same_entry(&roundabout).await.expect("compare"));
        assert!(!direct.is_same_entry(&dotted).await.expect("compare"));
    }

    #[tokio::test]
    async fn missing_directory_needs_permission() {
        let dir = tempdir().expect("tempdir");
        let handle = FsDirectoryHandle::new(dir.path().join("gone"));
        assert_eq!(
            handle.query_permission(AccessMode::Read).await.expect("query"),
            PermissionState::Prompt
        );
        assert_eq!(
            handle.request_permission(AccessMode::Read).await.expect("request"),
            PermissionState::Denied
        );
    }

    #[tokio::test]
    async fn empty_selection_queue_is_a_dismissed_picker() {
        let access = FsDirectoryAccess::new();
        assert!(access.pick_directory().await.expect("pick").is_none());

        let dir = tempdir().expect("tempdir");
        access.select(dir.path());
        let picked = access.pick_directory().await.expect("pick").expect("handle");
        assert_eq!(picked.location(), dir.path().to_string_lossy());
    }
}
