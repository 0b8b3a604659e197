use std::sync::Arc;

use bytes::Bytes;
use midly::{MetaMessage, Smf, Timing, TrackEventKind};
use tokio::task::spawn_blocking;

use crate::error::{LibraryError, Result};

const DEFAULT_TEMPO_US: u64 = 500_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidiSummary {
    /// Seconds.
    pub duration: f64,
}

#[cfg_attr(test, mockall::automock)]
pub trait MidiParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<MidiSummary>;
}

/// Standard MIDI file parser backed by `midly`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MidlyParser;

impl MidiParser for MidlyParser {
    fn parse(&self, bytes: &[u8]) -> Result<MidiSummary> {
        let smf = Smf::parse(bytes).map_err(|err| LibraryError::Midi(err.to_string()))?;
        Ok(MidiSummary {
            duration: duration_seconds(&smf),
        })
    }
}

fn duration_seconds(smf: &Smf<'_>) -> f64 {
    let mut end_tick = 0u64;
    let mut tempo_changes: Vec<(u64, u64)> = Vec::new();
    for track in &smf.tracks {
        let mut tick = 0u64;
        for event in track {
            tick += u64::from(event.delta.as_int());
            if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = event.kind {
                tempo_changes.push((tick, u64::from(tempo.as_int())));
            }
        }
        end_tick = end_tick.max(tick);
    }

    match smf.header.timing {
        Timing::Timecode(fps, subframes) => {
            let ticks_per_second = f64::from(fps.as_f32()) * f64::from(subframes);
            if ticks_per_second == 0.0 {
                return 0.0;
            }
            end_tick as f64 / ticks_per_second
        }
        Timing::Metrical(ticks_per_beat) => {
            let ticks_per_beat = u64::from(ticks_per_beat.as_int());
            if ticks_per_beat == 0 {
                return 0.0;
            }
            tempo_changes.sort_by_key(|(tick, _)| *tick);

            let mut micros = 0u64;
            let mut last_tick = 0u64;
            let mut tempo = DEFAULT_TEMPO_US;
            for (tick, next_tempo) in tempo_changes {
                if tick >= end_tick {
                    break;
                }
                micros += (tick - last_tick) * tempo / ticks_per_beat;
                last_tick = tick;
                tempo = next_tempo;
            }
            micros += (end_tick - last_tick) * tempo / ticks_per_beat;
            micros as f64 / 1_000_000.0
        }
    }
}

/// Turns raw file bytes into a duration. Parsing runs off the async workers.
#[derive(Clone)]
pub struct MetadataExtractor {
    parser: Arc<dyn MidiParser>,
}

impl MetadataExtractor {
    pub fn new(parser: Arc<dyn MidiParser>) -> Self {
        Self { parser }
    }

    pub async fn extract(&self, bytes: Bytes) -> Result<f64> {
        let parser = self.parser.clone();
        let summary = spawn_blocking(move || parser.parse(&bytes))
            .await
            .map_err(|err| LibraryError::Task(err.to_string()))??;
        Ok(summary.duration)
    }
}

impl Default for MetadataExtractor {
    fn default() -> Self {
        Self::new(Arc::new(MidlyParser))
    }
}
