use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::extended::ExtendedMetadataMap;
use crate::metadata::{ExtendedSongMetadata, SongMetadata};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortOrder {
    #[default]
    Title,
    LastPlayed,
    PlayCount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryQuery {
    /// Restrict to songs of one watched directory.
    pub folder: Option<String>,
    /// Case-insensitive title substring.
    pub search: Option<String>,
    pub sort: SortOrder,
}

fn extended<'a>(
    metadata: &'a ExtendedMetadataMap,
    song: &SongMetadata,
) -> Option<&'a ExtendedSongMetadata> {
    metadata.get(&song.key())
}

fn last_played(metadata: &ExtendedMetadataMap, song: &SongMetadata) -> i64 {
    extended(metadata, song)
        .and_then(|record| record.last_played)
        .unwrap_or(0)
}

fn play_count(metadata: &ExtendedMetadataMap, song: &SongMetadata) -> u64 {
    extended(metadata, song)
        .and_then(|record| record.play_count)
        .unwrap_or(0)
}

fn compare_titles(a: &SongMetadata, b: &SongMetadata) -> Ordering {
    a.title
        .to_lowercase()
        .cmp(&b.title.to_lowercase())
        .then_with(|| a.title.cmp(&b.title))
}

pub fn apply(
    songs: &[SongMetadata],
    metadata: &ExtendedMetadataMap,
    query: &LibraryQuery,
) -> Vec<SongMetadata> {
    let prefix = query.folder.as_ref().map(|folder| format!("{folder}/"));
    let needle = query
        .search
        .as_deref()
        .filter(|search| !search.is_empty())
        .map(str::to_lowercase);

    let mut result: Vec<SongMetadata> = songs
        .iter()
        .filter(|song| prefix.as_ref().is_none_or(|p| song.id.starts_with(p)))
        .filter(|song| {
            needle
                .as_ref()
                .is_none_or(|n| song.title.to_lowercase().contains(n))
        })
        .cloned()
        .collect();

    match query.sort {
        SortOrder::Title => result.sort_by(compare_titles),
        SortOrder::LastPlayed => {
            result.sort_by_key(|song| std::cmp::Reverse(last_played(metadata, song)))
        }
        SortOrder::PlayCount => {
            result.sort_by_key(|song| std::cmp::Reverse(play_count(metadata, song)))
        }
    }
    result
}

/// Played songs, most recent first.
pub fn recently_played(
    songs: &[SongMetadata],
    metadata: &ExtendedMetadataMap,
    limit: usize,
) -> Vec<SongMetadata> {
    let mut played: Vec<SongMetadata> = songs
        .iter()
        .filter(|song| extended(metadata, song).is_some_and(|r| r.last_played.is_some()))
        .cloned()
        .collect();
    played.sort_by_key(|song| std::cmp::Reverse(last_played(metadata, song)));
    played.truncate(limit);
    played
}
