//! Conversion job definitions

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::archive::Archive;
use crate::formats::{OutputKind, TargetFormat};
use crate::source::{SourceHandle, admit_sources};

/// Album identifier; the unit of exclusivity
pub type JobKey = String;

/// One album to convert
#[derive(Debug, Clone)]
pub struct ConversionJob {
    /// Album key
    pub key: JobKey,

    /// Sources in album order
    pub sources: Vec<Arc<dyn SourceHandle>>,

    /// Requested target
    pub format: TargetFormat,
}

impl ConversionJob {
    pub fn new(
        key: impl Into<JobKey>,
        sources: Vec<Arc<dyn SourceHandle>>,
        format: TargetFormat,
    ) -> Self {
        Self {
            key: key.into(),
            sources,
            format,
        }
    }

    /// Number of sources handed in
    ///
    /// The progress denominator is the count left after the size check in
    /// [`Transcoder::convert`](crate::Transcoder::convert), see
    /// [`ConversionJob::admitted_count`].
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Number of sources within `max_source_bytes`
    pub fn admitted_count(&self, max_source_bytes: u64) -> usize {
        self.sources
            .iter()
            .filter(|s| s.size() <= max_source_bytes)
            .count()
    }
}

/// Job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Not started
    Idle,
    /// Encoding sources
    Converting,
    /// Bundling outputs
    ArchiveAssembling,
    /// Archive produced
    Completed,
    /// Archive assembly failed
    Failed,
}

impl Default for JobState {
    fn default() -> Self {
        Self::Idle
    }
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One encoded file destined for the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedOutput {
    /// Entry name inside the album folder
    pub file_name: String,
    /// Encoded bytes
    pub bytes: Vec<u8>,
    /// Content kind
    pub kind: OutputKind,
}

impl EncodedOutput {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>, kind: OutputKind) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
            kind,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        self.kind.mime_type()
    }
}

/// A source dropped from a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedSource {
    pub name: String,
    pub reason: String,
}

/// Result of a job that reached `Completed`
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub key: JobKey,
    pub state: JobState,
    pub archive: Archive,
    /// Sources that produced every requested output
    pub converted: usize,
    pub skipped: Vec<SkippedSource>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ALBUM LIBRARY
// ═══════════════════════════════════════════════════════════════════════════════

/// Albums known to the driver, in registration order
#[derive(Debug, Default, Clone)]
pub struct AlbumLibrary {
    albums: Vec<(JobKey, Vec<Arc<dyn SourceHandle>>)>,
}

impl AlbumLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an album from its flattened file list
    ///
    /// Files are admitted by size and extension first. Returns the number of
    /// admitted sources, or `None` when nothing was admissible and the album
    /// was not registered. Re-registering a key replaces its sources in place.
    pub fn register(
        &mut self,
        key: impl Into<JobKey>,
        files: Vec<Arc<dyn SourceHandle>>,
        max_source_bytes: u64,
    ) -> Option<usize> {
        let key = key.into();
        let admitted = admit_sources(files, max_source_bytes);
        if admitted.is_empty() {
            log::info!("[Library] {}: no convertible files, not registered", key);
            return None;
        }

        let count = admitted.len();
        match self.albums.iter_mut().find(|(k, _)| *k == key) {
            Some((_, sources)) => {
                log::warn!(
                    "[Library] {}: already registered, replacing {} sources with {}",
                    key,
                    sources.len(),
                    count
                );
                *sources = admitted;
            }
            None => self.albums.push((key, admitted)),
        }
        Some(count)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.albums.iter().any(|(k, _)| k == key)
    }

    /// `key`, or `key (n)` with the lowest `n` not yet registered
    pub fn unique_key(&self, key: &str) -> JobKey {
        if !self.contains(key) {
            return key.to_string();
        }
        (2..)
            .map(|n| format!("{} ({})", key, n))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or_else(|| key.to_string())
    }

    pub fn sources(&self, key: &str) -> Option<&[Arc<dyn SourceHandle>]> {
        self.albums
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, sources)| sources.as_slice())
    }

    /// Build a job for a registered album
    pub fn job(&self, key: &str, format: TargetFormat) -> Option<ConversionJob> {
        self.sources(key)
            .map(|sources| ConversionJob::new(key, sources.to_vec(), format))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.albums.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.albums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.albums.is_empty()
    }

    /// Batch conversion is offered once more than one album is loaded
    pub fn supports_batch(&self) -> bool {
        self.albums.len() > 1
    }
}
