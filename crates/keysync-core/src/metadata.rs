use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::handle::FileHandle;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_millis() as Timestamp)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "lowercase")]
pub enum SongSource {
    Local,
    Uploaded,
}

impl fmt::Display for SongSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SongSource::Local => "local",
            SongSource::Uploaded => "uploaded",
        })
    }
}

impl FromStr for SongSource {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "local" => Ok(SongSource::Local),
            "uploaded" => Ok(SongSource::Uploaded),
            other => Err(format!("unknown song source `{other}`")),
        }
    }
}

/// Stable identity of a song for extended metadata, derived from its id and source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SongKey {
    pub song_id: String,
    pub source: SongSource,
}

impl SongKey {
    pub fn new(song_id: impl Into<String>, source: SongSource) -> Self {
        Self {
            song_id: song_id.into(),
            source,
        }
    }

    pub fn local(song_id: impl Into<String>) -> Self {
        Self::new(song_id, SongSource::Local)
    }

    pub fn uploaded(song_id: impl Into<String>) -> Self {
        Self::new(song_id, SongSource::Uploaded)
    }
}

impl fmt::Display for SongKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.song_id)
    }
}

impl FromStr for SongKey {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (source, song_id) = value
            .split_once(':')
            .ok_or_else(|| format!("malformed song key `{value}`"))?;
        Ok(SongKey::new(song_id, source.parse()?))
    }
}

impl From<SongKey> for String {
    fn from(key: SongKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for SongKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SongMetadata {
    pub id: String,
    pub title: String,
    pub file: String,
    pub source: SongSource,
    pub difficulty: u32,
    /// Seconds.
    pub duration: f64,
    #[serde(skip)]
    pub handle: Option<Arc<dyn FileHandle>>,
}

impl SongMetadata {
    /// A song found inside a watched directory. The title keeps the file extension.
    pub fn local(
        directory_id: &str,
        name: &str,
        duration: f64,
        handle: Arc<dyn FileHandle>,
    ) -> Self {
        Self {
            id: format!("{directory_id}/{name}"),
            title: name.to_owned(),
            file: name.to_owned(),
            source: SongSource::Local,
            difficulty: 0,
            duration,
            handle: Some(handle),
        }
    }

    pub fn uploaded(id: String, title: String, duration: f64) -> Self {
        Self {
            file: id.clone(),
            id,
            title,
            source: SongSource::Uploaded,
            difficulty: 0,
            duration,
            handle: None,
        }
    }

    pub fn key(&self) -> SongKey {
        SongKey::new(self.id.clone(), self.source)
    }
}

/// User and play facts about a song. Play statistics only move through
/// [`record_play`](Self::record_play).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedSongMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty_custom: Option<u32>,
    /// Rating, 1 to 5.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub play_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_played: Option<Timestamp>,
}

/// User-editable fields. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEdit {
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub difficulty_custom: Option<u32>,
    #[serde(default)]
    pub score: Option<u8>,
}

impl ExtendedSongMetadata {
    pub fn apply(&mut self, edit: &MetadataEdit) {
        if let Some(genre) = &edit.genre {
            self.genre = Some(genre.clone());
        }
        if edit.difficulty_custom.is_some() {
            self.difficulty_custom = edit.difficulty_custom;
        }
        if edit.score.is_some() {
            self.score = edit.score;
        }
    }

    /// Counts one more play. `last_played` never moves backwards.
    pub fn record_play(&mut self, timestamp: Timestamp) {
        self.play_count = Some(self.play_count.unwrap_or(0) + 1);
        self.last_played = Some(
            self.last_played
                .map_or(timestamp, |previous| previous.max(timestamp)),
        );
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackHistoryEntry {
    pub song_id: String,
    #[serde(default = "default_source")]
    pub source: SongSource,
    pub timestamp: Timestamp,
}

fn default_source() -> SongSource {
    SongSource::Local
}

impl PlaybackHistoryEntry {
    pub fn new(key: &SongKey, timestamp: Timestamp) -> Self {
        Self {
            song_id: key.song_id.clone(),
            source: key.source,
            timestamp,
        }
    }

    pub fn key(&self) -> SongKey {
        SongKey::new(self.song_id.clone(), self.source)
    }
}
