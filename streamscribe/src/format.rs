use std::fmt;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

/// Number of leading bytes inspected when sniffing content.
pub const SNIFF_LEN: usize = 12;

/// Container/codec family of an input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Wav,
    Mp3,
    Flac,
    Ogg,
    /// Audio-only MPEG-4 container. Recognized by extension only.
    M4a,
    /// Video container; its audio track must be extracted first. Recognized by extension only.
    Mp4,
}

impl MediaKind {
    pub fn name(&self) -> &'static str {
        match self {
            MediaKind::Wav => "wav",
            MediaKind::Mp3 => "mp3",
            MediaKind::Flac => "flac",
            MediaKind::Ogg => "ogg",
            MediaKind::M4a => "m4a",
            MediaKind::Mp4 => "mp4",
        }
    }

    /// Whether the kind is already canonical and can be streamed as-is.
    pub fn is_canonical(&self) -> bool {
        matches!(self, MediaKind::Wav)
    }

    pub fn is_video(&self) -> bool {
        matches!(self, MediaKind::Mp4)
    }

    /// All accepted kinds, in the order the CLI lists them.
    pub fn all() -> [MediaKind; 6] {
        [
            MediaKind::Wav,
            MediaKind::Mp3,
            MediaKind::Flac,
            MediaKind::Ogg,
            MediaKind::M4a,
            MediaKind::Mp4,
        ]
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Classify media from its first bytes, falling back to the extension only for
/// MPEG-4 containers, whose headers are not sniffed.
///
/// Content wins over the extension: a `.mp4` file that starts with a RIFF/WAVE
/// header is a WAV file, and a `.mp3` file with no recognizable header is rejected.
pub fn detect(prefix: &[u8], extension: Option<&str>) -> Result<MediaKind> {
    if let Some(kind) = sniff(prefix) {
        return Ok(kind);
    }

    let ext = extension.map(|e| e.trim_start_matches('.').to_ascii_lowercase());
    match ext.as_deref() {
        Some("m4a") => Ok(MediaKind::M4a),
        Some("mp4") => Ok(MediaKind::Mp4),
        Some(other) => Err(Error::InvalidInputFormat(format!(
            "content does not match any supported format (extension \"{other}\")"
        ))),
        None => Err(Error::InvalidInputFormat(
            "content does not match any supported format".into(),
        )),
    }
}

/// Read the first bytes of `path` and classify it.
pub fn detect_file(path: &Path) -> Result<MediaKind> {
    if !path.exists() {
        return Err(Error::InputNotFound {
            path: path.to_path_buf(),
        });
    }

    let mut prefix = Vec::with_capacity(SNIFF_LEN);
    std::fs::File::open(path)?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut prefix)?;

    let extension = path.extension().and_then(|e| e.to_str());
    let kind = detect(&prefix, extension)?;
    debug!(path = %path.display(), %kind, "classified input");
    Ok(kind)
}

fn sniff(prefix: &[u8]) -> Option<MediaKind> {
    if prefix.len() >= 12 && &prefix[0..4] == b"RIFF" && &prefix[8..12] == b"WAVE" {
        return Some(MediaKind::Wav);
    }
    if prefix.starts_with(b"ID3") || is_mpeg_frame_sync(prefix) {
        return Some(MediaKind::Mp3);
    }
    if prefix.starts_with(b"fLaC") {
        return Some(MediaKind::Flac);
    }
    if prefix.starts_with(b"OggS") {
        return Some(MediaKind::Ogg);
    }
    None
}

/// MPEG audio frame header: 11 sync bits, then a layer field that must not be 0b00
/// (that value marks AAC ADTS, which shares the sync word).
fn is_mpeg_frame_sync(prefix: &[u8]) -> bool {
    match prefix {
        [0xFF, b1, ..] => b1 & 0xE0 == 0xE0 && b1 & 0x06 != 0,
        _ => false,
    }
}
