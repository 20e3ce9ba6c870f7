//! Source handles and decoded audio

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{TranscodeError, TranscodeResult};
use crate::formats::is_supported_input;

// ═══════════════════════════════════════════════════════════════════════════════
// DECODED AUDIO
// ═══════════════════════════════════════════════════════════════════════════════

/// One decoded input: planar f32 samples, one vector per channel
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSource {
    name: String,
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioSource {
    /// Build from per-channel samples; all channels must share one length
    pub fn new(
        name: impl Into<String>,
        sample_rate: u32,
        channels: Vec<Vec<f32>>,
    ) -> TranscodeResult<Self> {
        let name = name.into();

        if channels.is_empty() {
            return Err(TranscodeError::decode(name, "no channels"));
        }
        if sample_rate == 0 {
            return Err(TranscodeError::decode(name, "sample rate is zero"));
        }

        let frames = channels[0].len();
        if let Some(bad) = channels.iter().position(|c| c.len() != frames) {
            return Err(TranscodeError::decode(
                name,
                format!(
                    "channel {} has {} samples, expected {}",
                    bad,
                    channels[bad].len(),
                    frames
                ),
            ));
        }

        Ok(Self {
            name,
            sample_rate,
            channels,
        })
    }

    /// Original identifier (file name)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel
    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    /// Samples across all channels
    pub fn total_samples(&self) -> usize {
        self.frames() * self.channel_count()
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOURCE HANDLES
// ═══════════════════════════════════════════════════════════════════════════════

/// A not-yet-decoded input file supplied by the host
pub trait SourceHandle: Send + Sync + fmt::Debug {
    /// Base file name including extension
    fn name(&self) -> &str;

    /// Size in bytes as reported before reading
    fn size(&self) -> u64;

    /// Read the full encoded bytes
    fn read(&self) -> std::io::Result<Vec<u8>>;
}

/// Source backed by a file on disk
#[derive(Debug, Clone)]
pub struct FsSource {
    path: PathBuf,
    name: String,
    size: u64,
}

impl FsSource {
    /// Stat the file; the name is the path's final component
    pub fn open(path: impl Into<PathBuf>) -> TranscodeResult<Self> {
        let path = path.into();
        let size = std::fs::metadata(&path)
            .map_err(|e| TranscodeError::FileRead {
                name: path.display().to_string(),
                reason: e.to_string(),
            })?
            .len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { path, name, size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SourceHandle for FsSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read(&self) -> std::io::Result<Vec<u8>> {
        std::fs::read(&self.path)
    }
}

/// Source held in memory
#[derive(Clone)]
pub struct MemorySource {
    name: String,
    bytes: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySource")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl SourceHandle for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read(&self) -> std::io::Result<Vec<u8>> {
        Ok(self.bytes.to_vec())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ADMISSION
// ═══════════════════════════════════════════════════════════════════════════════

/// Check a handle against the size limit
pub fn check_size(handle: &dyn SourceHandle, limit: u64) -> TranscodeResult<()> {
    if handle.size() > limit {
        return Err(TranscodeError::SizeLimit {
            name: handle.name().to_string(),
            size: handle.size(),
            limit,
        });
    }
    Ok(())
}

/// Filter a flattened file list down to the sources a job may contain
///
/// Oversized files are dropped with a warning; files without an accepted
/// extension are dropped silently. Order is preserved.
pub fn admit_sources(
    files: Vec<Arc<dyn SourceHandle>>,
    max_source_bytes: u64,
) -> Vec<Arc<dyn SourceHandle>> {
    files
        .into_iter()
        .filter(|file| {
            if let Err(e) = check_size(file.as_ref(), max_source_bytes) {
                log::warn!("[Sources] Excluded: {}", e);
                return false;
            }
            is_supported_input(file.name())
        })
        .collect()
}
