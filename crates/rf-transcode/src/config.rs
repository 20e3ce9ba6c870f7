//! Configuration types for album transcoding

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TranscodeError, TranscodeResult};

/// Samples per channel processed per encoder chunk (1 MiB of samples)
pub const DEFAULT_CHUNK_SAMPLES: usize = 1024 * 1024;

/// Samples per MPEG-1 Layer III frame
pub const MP3_FRAME_SAMPLES: usize = 1152;

/// Largest source file admitted into a job (2 GiB)
pub const MAX_SOURCE_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Transcoding configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Chunk bound in samples (per channel for MP3, interleaved for WAV)
    pub chunk_samples: usize,

    /// Samples per channel handed to LAME per call
    pub mp3_block_size: usize,

    /// Constant MP3 bitrate in kbps
    pub mp3_bitrate_kbps: u32,

    /// Deflate level for archive entries (0-9)
    pub compression_level: i64,

    /// Sources above this size are excluded before decoding
    pub max_source_bytes: u64,

    /// Pause after each processed source
    pub source_pause_ms: u64,

    /// Pause between albums in a batch
    pub batch_pause_ms: u64,

    /// Bytes written per archive progress step
    pub archive_write_block: usize,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            chunk_samples: DEFAULT_CHUNK_SAMPLES,
            mp3_block_size: MP3_FRAME_SAMPLES,
            mp3_bitrate_kbps: 128,
            compression_level: 6,
            max_source_bytes: MAX_SOURCE_BYTES,
            source_pause_ms: 10,
            batch_pause_ms: 2000,
            archive_write_block: 64 * 1024,
        }
    }
}

impl TranscodeConfig {
    /// No pauses; the pipeline still yields at every chunk, source and album
    pub fn immediate() -> Self {
        Self {
            source_pause_ms: 0,
            batch_pause_ms: 0,
            ..Default::default()
        }
    }

    /// Load from a JSON file, missing keys fall back to defaults
    pub fn load(path: &Path) -> TranscodeResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| TranscodeError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the encoders cannot work with
    pub fn validate(&self) -> TranscodeResult<()> {
        if self.chunk_samples == 0 {
            return Err(TranscodeError::InvalidConfig(
                "chunk_samples must be positive".to_string(),
            ));
        }
        if self.mp3_block_size == 0 {
            return Err(TranscodeError::InvalidConfig(
                "mp3_block_size must be positive".to_string(),
            ));
        }
        if self.archive_write_block == 0 {
            return Err(TranscodeError::InvalidConfig(
                "archive_write_block must be positive".to_string(),
            ));
        }
        if !(0..=9).contains(&self.compression_level) {
            return Err(TranscodeError::InvalidConfig(format!(
                "compression_level must be 0-9, got {}",
                self.compression_level
            )));
        }
        Ok(())
    }

    /// Set chunk bound
    pub fn with_chunk_samples(mut self, samples: usize) -> Self {
        self.chunk_samples = samples;
        self
    }

    /// Set the per-source and per-album pauses
    pub fn with_pauses(mut self, source_ms: u64, batch_ms: u64) -> Self {
        self.source_pause_ms = source_ms;
        self.batch_pause_ms = batch_ms;
        self
    }

    /// Set the source size limit
    pub fn with_max_source_bytes(mut self, bytes: u64) -> Self {
        self.max_source_bytes = bytes;
        self
    }

    pub fn source_pause(&self) -> Duration {
        Duration::from_millis(self.source_pause_ms)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

/// Hand control back to the scheduler, sleeping for `pause` when non-zero
pub async fn cooperative_pause(pause: Duration) {
    if pause.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(pause).await;
    }
}
