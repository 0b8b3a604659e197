use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{LibraryError, Result};

mod sled_backend;
pub use sled_backend::SledBackend;

pub const OBSERVED_DIRECTORIES: &str = "observed-directories";
pub const SONG_EXTENDED_METADATA: &str = "song-extended-metadata";
pub const PLAYBACK_HISTORY: &str = "playback-history";
pub const UPLOADED_SONGS: &str = "uploaded-songs";

/// A logical key inside one of the store's namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KvKey {
    pub namespace: KvNamespace,
    pub key: String,
}

impl KvKey {
    pub fn new(namespace: KvNamespace, key: impl Into<String>) -> Self {
        Self {
            namespace,
            key: key.into(),
        }
    }

    pub fn library(key: &str) -> Self {
        Self::new(KvNamespace::Library, key)
    }
}

impl fmt::Display for KvKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KvNamespace {
    /// Directories, extended metadata, history and the upload list.
    Library,
    /// Per-song practice settings.
    Settings,
    /// Keys retired by format migrations. Cleared on every startup, so a
    /// migration only has to move a key here to have it deleted.
    Legacy,
}

impl KvNamespace {
    pub const ALL: [KvNamespace; 3] = [Self::Library, Self::Settings, Self::Legacy];

    pub fn name(self) -> &'static str {
        match self {
            Self::Library => "library",
            Self::Settings => "settings",
            Self::Legacy => "legacy",
        }
    }
}

impl fmt::Display for KvNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[async_trait]
pub trait KvBackend: Send + Sync + 'static {
    async fn get(&self, key: &KvKey) -> Result<Option<Vec<u8>>>;
    async fn put(&self, key: &KvKey, value: Vec<u8>) -> Result<()>;
    /// Drops every key of `namespace` and returns how many there were.
    async fn clear(&self, namespace: KvNamespace) -> Result<usize>;
}

pub trait KvCodec: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> KvCodec for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// JSON values over a [`KvBackend`]. Cheap to clone.
pub struct KvStore<B: KvBackend> {
    backend: Arc<B>,
}

impl<B: KvBackend> Clone for KvStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
        }
    }
}

impl<B: KvBackend> KvStore<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// A value that no longer decodes is an error, not an absent key.
    pub async fn load<T: KvCodec>(&self, key: &KvKey) -> Result<Option<T>> {
        let Some(bytes) = self.backend.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| LibraryError::Kv(format!("{key}: {err}")))
    }

    pub async fn store<T: Serialize + ?Sized>(&self, key: &KvKey, value: &T) -> Result<()> {
        let bytes =
            serde_json::to_vec(value).map_err(|err| LibraryError::Kv(format!("{key}: {err}")))?;
        self.backend.put(key, bytes).await
    }

    pub async fn clear(&self, namespace: KvNamespace) -> Result<usize> {
        self.backend.clear(namespace).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use mockall::mock;

    mock! {
        pub Backend {}

        #[async_trait]
        impl KvBackend for Backend {
            async fn get(&self, key: &KvKey) -> Result<Option<Vec<u8>>>;
            async fn put(&self, key: &KvKey, value: Vec<u8>) -> Result<()>;
            async fn clear(&self, namespace: KvNamespace) -> Result<usize>;
        }
    }

    pub fn sled_store(path: &std::path::Path) -> KvStore<SledBackend> {
        let backend = SledBackend::open(path).expect("open sled");
        KvStore::new(Arc::new(backend))
    }
}
