use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use keysync_core::kv::SledBackend;
use keysync_core::prelude::*;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "keysync")]
#[command(about = "Keysync - local MIDI library for piano practice", long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database directory, overrides the configuration file
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage watched folders
    #[command(subcommand)]
    Folders(FolderCommand),
    /// Rescan every watched folder, asking again for access if needed
    Scan,
    /// List songs
    Songs {
        #[arg(long)]
        folder: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, value_enum, default_value_t = SortArg::Title)]
        sort: SortArg,
        /// Only recently played songs
        #[arg(long)]
        recent: bool,
    },
    /// Record a play of a song
    Play {
        song_id: String,
        #[arg(long)]
        uploaded: bool,
    },
    /// Edit rating, genre or difficulty of a song
    Edit {
        song_id: String,
        #[arg(long)]
        uploaded: bool,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        score: Option<u8>,
        #[arg(long)]
        genre: Option<String>,
        #[arg(long, value_parser = clap::value_parser!(u32).range(0..=100))]
        difficulty: Option<u32>,
    },
    /// Show playback history, newest first
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Add a MIDI file to the uploaded songs
    Upload { file: PathBuf },
}

#[derive(Subcommand, Debug)]
enum FolderCommand {
    Add { path: PathBuf },
    Remove { id: String },
    List,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SortArg {
    Title,
    LastPlayed,
    PlayCount,
}

impl From<SortArg> for SortOrder {
    fn from(value: SortArg) -> Self {
        match value {
            SortArg::Title => SortOrder::Title,
            SortArg::LastPlayed => SortOrder::LastPlayed,
            SortArg::PlayCount => SortOrder::PlayCount,
        }
    }
}

fn load_config(args: &Args) -> anyhow::Result<LibraryConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        }
        None => LibraryConfig::default(),
    };
    if let Some(store) = &args.store {
        config.store_path = store.clone();
    }
    config.validate()?;
    Ok(config)
}

fn format_time(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

fn song_key(song_id: String, uploaded: bool) -> SongKey {
    if uploaded {
        SongKey::uploaded(song_id)
    } else {
        SongKey::local(song_id)
    }
}

fn print_songs(library: &Library<SledBackend>, songs: &[SongMetadata]) {
    let metadata = library.extended_metadata();
    for song in songs {
        let plays = metadata
            .get(&song.key())
            .and_then(|record| record.play_count)
            .unwrap_or(0);
        println!(
            "{}\t{}\t{}\t{} plays",
            song.id,
            song.title,
            format_time(song.duration),
            plays
        );
    }
}

fn report_scan(outcome: &ScanOutcome) {
    match outcome {
        ScanOutcome::Completed { directories, songs } => {
            info!("Scanned {} folders, {} songs", directories, songs);
        }
        ScanOutcome::PermissionDenied { directory } => {
            warn!("Access to {} was not granted, scan aborted", directory);
        }
    }
}

async fn run(
    library: &Library<SledBackend>,
    access: &FsDirectoryAccess,
    command: Command,
) -> anyhow::Result<()> {
    match command {
        Command::Folders(FolderCommand::Add { path }) => {
            access.select(std::fs::canonicalize(&path).unwrap_or(path));
            match library.add_folder().await? {
                Some(dir) => println!("{}\t{}", dir.id, dir.handle.name()),
                None => info!("Folder is already watched"),
            }
        }
        Command::Folders(FolderCommand::Remove { id }) => {
            library.remove_folder(&id).await?;
        }
        Command::Folders(FolderCommand::List) => {
            let songs = library.songs();
            for dir in library.directories().iter() {
                let count = songs.get(&dir.id).map(Vec::len).unwrap_or(0);
                println!("{}\t{}\t{} songs", dir.id, dir.handle.location(), count);
            }
        }
        Command::Scan => {
            let outcome = library.scan_folders().await?;
            report_scan(&outcome);
        }
        Command::Songs {
            folder,
            search,
            sort,
            recent,
        } => {
            let songs = if recent {
                library.recently_played()
            } else {
                library.query(&LibraryQuery {
                    folder,
                    search,
                    sort: sort.into(),
                })
            };
            print_songs(library, &songs);
        }
        Command::Play { song_id, uploaded } => {
            let key = song_key(song_id, uploaded);
            if !uploaded && library.get_song_handle(&key.song_id).await.is_none() {
                warn!("{} is not in a scanned folder", key.song_id);
            }
            library.add_to_history(&key).await?;
            let plays = library
                .extended_metadata()
                .get(&key)
                .and_then(|record| record.play_count)
                .unwrap_or(0);
            println!("{}\t{} plays", key.song_id, plays);
        }
        Command::Edit {
            song_id,
            uploaded,
            score,
            genre,
            difficulty,
        } => {
            let key = song_key(song_id, uploaded);
            let record = library
                .update_extended_metadata(
                    &key,
                    MetadataEdit {
                        genre,
                        difficulty_custom: difficulty,
                        score,
                        ..Default::default()
                    },
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::History { limit } => {
            for entry in library.history().iter().take(limit) {
                println!("{}\t{}\t{}", entry.timestamp, entry.source, entry.song_id);
            }
        }
        Command::Upload { file } => {
            let blob = FsFileHandle::new(file).get_file().await?;
            let song = library.upload_midi_file(blob).await?;
            println!("{}\t{}\t{}", song.id, song.title, format_time(song.duration));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let config = load_config(&args)?;
    info!("Library store: {}", config.store_path.display());

    let access = Arc::new(FsDirectoryAccess::new());
    let library = Library::open(config, access.clone())?;
    library.initialize().await;

    if library.requires_permission() && !matches!(args.command, Command::Scan) {
        warn!("Some folders cannot be read; run `keysync scan` once they are reachable again");
    }

    let result = run(&library, &access, args.command).await;
    library.flush().await?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_minutes_and_seconds() {
        assert_eq!(format_time(0.0), "0:00");
        assert_eq!(format_time(125.4), "2:05");
        assert_eq!(format_time(3600.0), "60:00");
    }

    #[test]
    fn store_flag_overrides_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("keysync.json");
        std::fs::write(&config_path, r#"{ "store_path": "from-file", "recent_limit": 3 }"#)
            .expect("write config");

        let args = Args::parse_from([
            "keysync",
            "--config",
            config_path.to_str().expect("utf-8 path"),
            "--store",
            "from-flag",
            "scan",
        ]);
        let config = load_config(&args).expect("config");
        assert_eq!(config.store_path, PathBuf::from("from-flag"));
        assert_eq!(config.recent_limit, 3);
    }

    #[test]
    fn rejects_out_of_range_scores() {
        assert!(Args::try_parse_from(["keysync", "edit", "d/a.mid", "--score", "6"]).is_err());
    }
}
