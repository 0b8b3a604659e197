use crate::handle::FileInfo;

const MIDI_MEDIA_TYPES: &[&str] = &["audio/midi", "audio/mid", "audio/x-midi"];
const MIDI_EXTENSIONS: &[&str] = &[".mid", ".midi"];

/// A file is a MIDI candidate if either its media type or its name says so.
pub fn is_midi_file(name: &str, media_type: &str) -> bool {
    has_midi_media_type(media_type) || has_midi_extension(name)
}

pub fn is_midi_candidate(info: &FileInfo) -> bool {
    is_midi_file(&info.name, &info.media_type)
}

fn has_midi_media_type(media_type: &str) -> bool {
    MIDI_MEDIA_TYPES
        .iter()
        .any(|candidate| media_type.eq_ignore_ascii_case(candidate))
}

fn has_midi_extension(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    MIDI_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext))
}

/// Title shown for an uploaded file: the name without a trailing `.mid`/`.midi`.
pub fn upload_title(name: &str) -> &str {
    let lowered = name.to_ascii_lowercase();
    for ext in [".midi", ".mid"] {
        if lowered.ends_with(ext) {
            return &name[..name.len() - ext.len()];
        }
    }
    name
}
