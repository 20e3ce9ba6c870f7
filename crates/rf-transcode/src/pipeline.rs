//! Conversion orchestrator
//!
//! Runs one album job end to end:
//! 1. Claim the album key in the registry
//! 2. Read, decode and encode each source in order, skipping faulty ones
//! 3. Bundle whatever was produced into an archive
//! 4. Release the key, on every exit path
//!
//! Everything runs on the caller's task. The encoders yield once per chunk
//! and the orchestrator pauses once per source, so several jobs started on
//! the same single-threaded runtime interleave instead of blocking each other.

use std::sync::Arc;

use crate::archive::{ArchiveManifest, Archiver, ZipArchiver};
use crate::config::{TranscodeConfig, cooperative_pause};
use crate::decoder::{SourceDecoder, SymphoniaDecoder};
use crate::encoder::{ChunkedEncoder, encode_chunked, encoders_for};
use crate::error::{TranscodeError, TranscodeResult};
use crate::job::{ConversionJob, EncodedOutput, JobOutcome, JobState, SkippedSource};
use crate::progress::{JobEvent, Phase, ProgressSink, ProgressTracker, publish};
use crate::registry::ActiveJobRegistry;
use crate::source::{SourceHandle, check_size};

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSCODER
// ═══════════════════════════════════════════════════════════════════════════════

/// Album conversion orchestrator
///
/// Cheap to clone; clones share the registry, collaborators and progress sink.
///
/// The future returned by [`Transcoder::convert`] is not `Send` (encode
/// sessions live across its yield points): drive jobs with `tokio::join!`,
/// `block_on` or `spawn_local` on a `LocalSet`, not `tokio::spawn`.
#[derive(Clone)]
pub struct Transcoder {
    config: TranscodeConfig,
    registry: ActiveJobRegistry,
    decoder: Arc<dyn SourceDecoder>,
    archiver: Arc<dyn Archiver>,
    sink: Option<ProgressSink>,
}

impl Transcoder {
    /// Create with the symphonia decoder, the zip archiver and a fresh registry
    pub fn new(config: TranscodeConfig) -> Self {
        let archiver = ZipArchiver::from_config(&config);
        Self {
            config,
            registry: ActiveJobRegistry::new(),
            decoder: Arc::new(SymphoniaDecoder::new()),
            archiver: Arc::new(archiver),
            sink: None,
        }
    }

    /// Share an existing registry
    pub fn with_registry(mut self, registry: ActiveJobRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the decoder
    pub fn with_decoder(mut self, decoder: Arc<dyn SourceDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Replace the archiver
    pub fn with_archiver(mut self, archiver: Arc<dyn Archiver>) -> Self {
        self.archiver = archiver;
        self
    }

    /// Publish job events to `sink`
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &TranscodeConfig {
        &self.config
    }

    pub fn registry(&self) -> &ActiveJobRegistry {
        &self.registry
    }

    /// Convert one album
    ///
    /// Fails with [`TranscodeError::Concurrency`] when the key is already
    /// being converted, and with [`TranscodeError::Archive`] when bundling
    /// fails. Faulty sources never fail the job; they are listed in
    /// [`JobOutcome::skipped`].
    pub async fn convert(&self, job: &ConversionJob) -> TranscodeResult<JobOutcome> {
        let _guard = self.registry.acquire(&job.key).inspect_err(|e| {
            log::warn!("[Transcoder] Rejected: {}", e);
        })?;
        let key = job.key.as_str();

        let sources: Vec<&dyn SourceHandle> = job
            .sources
            .iter()
            .map(|s| &**s)
            .filter(|s| match check_size(*s, self.config.max_source_bytes) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("[Transcoder] {}: excluded {}", key, e);
                    false
                }
            })
            .collect();
        let total = sources.len();

        log::info!(
            "[Transcoder] {}: converting {} sources to {}",
            key,
            total,
            job.format
        );
        self.emit(JobEvent::Started {
            key: key.to_string(),
            sources: total,
        });
        self.set_state(key, JobState::Converting);

        let encoders = encoders_for(job.format, &self.config);
        let mut tracker = ProgressTracker::new(key, Phase::Encoding, self.sink.as_ref());
        tracker.report_source(0, 0.0, total);

        let mut manifest = ArchiveManifest::new(key, job.format);
        let mut skipped = Vec::new();
        let mut converted = 0;

        for (index, source) in sources.iter().enumerate() {
            match self
                .convert_source(*source, &encoders, index, total, &mut tracker)
                .await
            {
                Ok(outputs) => {
                    outputs.into_iter().for_each(|o| manifest.push(o));
                    converted += 1;
                }
                Err(e) => {
                    log::warn!("[Transcoder] {}: skipped {}", key, e);
                    self.emit(JobEvent::SourceSkipped {
                        key: key.to_string(),
                        name: source.name().to_string(),
                        reason: e.to_string(),
                    });
                    skipped.push(SkippedSource {
                        name: source.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }

            tracker.report_source(index + 1, 0.0, total);
            cooperative_pause(self.config.source_pause()).await;
        }
        tracker.report(100);

        self.set_state(key, JobState::ArchiveAssembling);
        let mut archive_tracker = ProgressTracker::new(key, Phase::Archiving, self.sink.as_ref());
        let built = self
            .archiver
            .build(&manifest, &mut |percent| {
                archive_tracker.report(percent);
            })
            .map_err(|e| match e {
                TranscodeError::Archive(_) => e,
                other => TranscodeError::Archive(other.to_string()),
            });

        let archive = match built {
            Ok(archive) => archive,
            Err(e) => {
                log::error!("[Transcoder] {}: {}", key, e);
                self.set_state(key, JobState::Failed);
                self.emit(JobEvent::Failed {
                    key: key.to_string(),
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        log::info!(
            "[Transcoder] {}: {} converted, {} skipped -> {}",
            key,
            converted,
            skipped.len(),
            archive.file_name
        );
        self.set_state(key, JobState::Completed);
        self.emit(JobEvent::Completed {
            key: key.to_string(),
            file_name: archive.file_name.clone(),
            entries: archive.file_count(),
        });

        Ok(JobOutcome {
            key: key.to_string(),
            state: JobState::Completed,
            archive,
            converted,
            skipped,
        })
    }

    /// Read, decode and encode one source into every requested output
    ///
    /// With several targets the source's share of the encode sweep is split
    /// evenly between them, in target order.
    async fn convert_source(
        &self,
        source: &dyn SourceHandle,
        encoders: &[Box<dyn ChunkedEncoder>],
        index: usize,
        total: usize,
        tracker: &mut ProgressTracker<'_>,
    ) -> TranscodeResult<Vec<EncodedOutput>> {
        let name = source.name();
        let bytes = source.read().map_err(|e| TranscodeError::FileRead {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        let audio = self.decoder.decode(name, bytes).map_err(|e| {
            if e.is_source_fault() {
                e
            } else {
                TranscodeError::decode(name, e)
            }
        })?;
        log::debug!(
            "[Transcoder] {}: {} ch, {} Hz, {:.2}s",
            name,
            audio.channel_count(),
            audio.sample_rate(),
            audio.duration()
        );

        let targets = encoders.len().max(1) as f64;
        let mut outputs = Vec::with_capacity(encoders.len());
        for (slot, encoder) in encoders.iter().enumerate() {
            let output = encode_chunked(encoder.as_ref(), &audio, |fraction| {
                tracker.report_source(index, (slot as f64 + fraction) / targets, total);
            })
            .await
            .map_err(|e| match e {
                TranscodeError::Encode(reason) => {
                    TranscodeError::Encode(format!("{}: {}", name, reason))
                }
                other => other,
            })?;
            outputs.push(output);
        }
        Ok(outputs)
    }

    fn set_state(&self, key: &str, state: JobState) {
        log::debug!("[Transcoder] {}: {:?}", key, state);
        self.emit(JobEvent::State {
            key: key.to_string(),
            state,
        });
    }

    fn emit(&self, event: JobEvent) {
        publish(self.sink.as_ref(), event);
    }
}

impl std::fmt::Debug for Transcoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcoder")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("progress", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}
