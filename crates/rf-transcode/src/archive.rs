//! Archive assembly
//!
//! Bundles a job's encoded outputs under one folder named after the album
//! and deflates them into a single zip, reporting progress by bytes written.

use std::collections::HashSet;
use std::io::{Cursor, Write};

use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::config::TranscodeConfig;
use crate::error::{TranscodeError, TranscodeResult};
use crate::formats::{TargetFormat, archive_file_name};
use crate::job::{EncodedOutput, JobKey};

/// Ordered outputs of one job
#[derive(Debug, Clone)]
pub struct ArchiveManifest {
    pub job_key: JobKey,
    pub format: TargetFormat,
    outputs: Vec<EncodedOutput>,
    names: HashSet<String>,
}

impl ArchiveManifest {
    pub fn new(job_key: impl Into<JobKey>, format: TargetFormat) -> Self {
        Self {
            job_key: job_key.into(),
            format,
            outputs: Vec::new(),
            names: HashSet::new(),
        }
    }

    /// Append an output, renaming it `stem (n).ext` if the name is taken
    ///
    /// Sources `a.mp3` and `a.wav` both map to `a.mp3` when converting to
    /// MP3; the second becomes `a (1).mp3`.
    pub fn push(&mut self, mut output: EncodedOutput) {
        if self.names.contains(&output.file_name) {
            let (stem, ext) = match output.file_name.rsplit_once('.') {
                Some((stem, ext)) => (stem.to_string(), format!(".{}", ext)),
                None => (output.file_name.clone(), String::new()),
            };
            let mut n = 1;
            while self.names.contains(&format!("{} ({}){}", stem, n, ext)) {
                n += 1;
            }
            let renamed = format!("{} ({}){}", stem, n, ext);
            log::warn!(
                "[Archive] {}: duplicate entry {}, stored as {}",
                self.job_key,
                output.file_name,
                renamed
            );
            output.file_name = renamed;
        }
        self.names.insert(output.file_name.clone());
        self.outputs.push(output);
    }

    pub fn outputs(&self) -> &[EncodedOutput] {
        &self.outputs
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Payload bytes across all outputs
    pub fn total_bytes(&self) -> u64 {
        self.outputs.iter().map(|o| o.bytes.len() as u64).sum()
    }

    /// Entry path inside the archive
    pub fn entry_path(&self, output: &EncodedOutput) -> String {
        format!("{}/{}", self.job_key, output.file_name)
    }

    /// Suggested download name, `{key}_{mp3|wav|all}.zip`
    pub fn file_name(&self) -> String {
        archive_file_name(&self.job_key, self.format)
    }
}

/// Assembled archive
#[derive(Debug, Clone)]
pub struct Archive {
    /// Suggested file name
    pub file_name: String,
    /// Zip bytes
    pub bytes: Vec<u8>,
    /// Entry paths in write order, folder first
    pub entries: Vec<String>,
}

impl Archive {
    /// Number of file entries, excluding the album folder
    pub fn file_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.ends_with('/')).count()
    }
}

/// Builds the archive for a finished job
pub trait Archiver: Send + Sync {
    /// Bundle the manifest; `progress` receives 0-100 as bytes are written
    fn build(
        &self,
        manifest: &ArchiveManifest,
        progress: &mut dyn FnMut(u8),
    ) -> TranscodeResult<Archive>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// ZIP ARCHIVER
// ═══════════════════════════════════════════════════════════════════════════════

/// Deflate zip writer
#[derive(Debug, Clone)]
pub struct ZipArchiver {
    compression_level: i64,
    write_block: usize,
}

impl ZipArchiver {
    pub fn new(compression_level: i64, write_block: usize) -> Self {
        Self {
            compression_level,
            write_block: write_block.max(1),
        }
    }

    pub fn from_config(config: &TranscodeConfig) -> Self {
        Self::new(config.compression_level, config.archive_write_block)
    }

    fn options(&self, size: u64) -> SimpleFileOptions {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(self.compression_level))
            .large_file(size >= u32::MAX as u64)
    }
}

impl Default for ZipArchiver {
    fn default() -> Self {
        Self::from_config(&TranscodeConfig::default())
    }
}

impl Archiver for ZipArchiver {
    fn build(
        &self,
        manifest: &ArchiveManifest,
        progress: &mut dyn FnMut(u8),
    ) -> TranscodeResult<Archive> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let mut entries = Vec::with_capacity(manifest.len() + 1);

        let folder = format!("{}/", manifest.job_key);
        zip.add_directory(folder.as_str(), self.options(0))?;
        entries.push(folder);

        let total = manifest.total_bytes();
        let mut written = 0u64;
        progress(0);

        for output in manifest.outputs() {
            let path = manifest.entry_path(output);
            zip.start_file(path.as_str(), self.options(output.bytes.len() as u64))?;

            for block in output.bytes.chunks(self.write_block) {
                zip.write_all(block)
                    .map_err(|e| TranscodeError::Archive(format!("{}: {}", path, e)))?;
                written += block.len() as u64;
                progress(((written as f64 / total as f64) * 100.0).round() as u8);
            }
            entries.push(path);
        }

        let bytes = zip.finish()?.into_inner();
        progress(100);

        log::info!(
            "[Archive] {}: {} entries, {} -> {} bytes",
            manifest.job_key,
            manifest.len(),
            total,
            bytes.len()
        );

        Ok(Archive {
            file_name: manifest.file_name(),
            bytes,
            entries,
        })
    }
}
