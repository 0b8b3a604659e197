use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_RECENT_LIMIT: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LibraryConfig {
    /// Directory holding the sled database.
    pub store_path: PathBuf,
    /// Number of songs in the recently played view.
    pub recent_limit: usize,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("keysync.db"),
            recent_limit: DEFAULT_RECENT_LIMIT,
        }
    }
}

impl LibraryConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.store_path.as_os_str().is_empty() {
            return Err(ConfigValidationError::InvalidStorePath);
        }
        if self.recent_limit == 0 {
            return Err(ConfigValidationError::InvalidRecentLimit);
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigValidationError {
    #[error("store path must be provided")]
    InvalidStorePath,
    #[error("recent limit must be greater than zero")]
    InvalidRecentLimit,
}
