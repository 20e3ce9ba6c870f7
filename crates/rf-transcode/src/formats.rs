//! Output format definitions

use serde::{Deserialize, Serialize};

/// Requested target for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    /// MP3 only (lossy)
    Mp3,
    /// WAV only (32-bit float container)
    Wav,
    /// Both MP3 and WAV for every source
    All,
}

impl Default for TargetFormat {
    fn default() -> Self {
        Self::All
    }
}

impl TargetFormat {
    /// Output kinds produced per source, in encoding order
    pub fn kinds(&self) -> &'static [OutputKind] {
        match self {
            Self::Mp3 => &[OutputKind::Lossy],
            Self::Wav => &[OutputKind::Container],
            Self::All => &[OutputKind::Lossy, OutputKind::Container],
        }
    }

    /// Marker used in archive file names
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
            Self::All => "all",
        }
    }

    /// Parse a marker, `auto` is accepted as an alias for `all`
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker.to_ascii_lowercase().as_str() {
            "mp3" => Some(Self::Mp3),
            "wav" => Some(Self::Wav),
            "all" | "auto" | "both" => Some(Self::All),
            _ => None,
        }
    }
}

impl std::fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.marker())
    }
}

/// Content kind of an encoded output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputKind {
    /// Compressed MP3 frames
    Lossy,
    /// RIFF/WAVE with IEEE float samples
    Container,
}

impl OutputKind {
    /// File extension without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Lossy => "mp3",
            Self::Container => "wav",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Lossy => "audio/mp3",
            Self::Container => "audio/wav",
        }
    }
}

/// Input extensions accepted into a job (compared case-insensitively)
pub const SUPPORTED_INPUTS: &[&str] = &["mp3", "wav"];

/// Whether a file name carries an accepted input extension
pub fn is_supported_input(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SUPPORTED_INPUTS
        .iter()
        .any(|ext| lower.ends_with(&format!(".{}", ext)))
}

/// Replace the last extension of `name` with `extension`
///
/// A name without a dot gets the extension appended.
pub fn replace_extension(name: &str, extension: &str) -> String {
    let stem = match name.rfind('.') {
        Some(dot) if !name[dot..].contains('/') => &name[..dot],
        _ => name,
    };
    format!("{}.{}", stem, extension)
}

/// Archive file name for a job: `{key}_{marker}.zip`
pub fn archive_file_name(job_key: &str, format: TargetFormat) -> String {
    format!("{}_{}.zip", job_key, format.marker())
}
