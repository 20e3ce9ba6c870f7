//! Batch driver
//!
//! Converts several albums one after another. Failures stay local to their
//! album, busy albums are passed over, and external triggers for new work
//! are suspended until the batch returns.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::config::cooperative_pause;
use crate::error::{TranscodeError, TranscodeResult};
use crate::formats::TargetFormat;
use crate::job::{AlbumLibrary, JobKey, JobOutcome};
use crate::pipeline::Transcoder;

/// What happened to each album in a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Albums whose archive was produced and delivered
    pub completed: Vec<JobKey>,
    /// Albums that failed, with the reason
    pub failed: Vec<(JobKey, String)>,
    /// Albums passed over because they were already converting
    pub skipped: Vec<JobKey>,
}

impl BatchReport {
    /// Albums that were looked at
    pub fn total(&self) -> usize {
        self.completed.len() + self.failed.len() + self.skipped.len()
    }

    pub fn all_completed(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Sequential multi-album driver
///
/// Clones share the trigger gate; triggers stay off while any of them is
/// running a batch.
#[derive(Debug, Clone)]
pub struct BatchDriver {
    transcoder: Transcoder,
    running: Arc<AtomicUsize>,
}

impl BatchDriver {
    pub fn new(transcoder: Transcoder) -> Self {
        Self {
            transcoder,
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn transcoder(&self) -> &Transcoder {
        &self.transcoder
    }

    /// Whether new work may be started from outside (off while a batch runs)
    pub fn triggers_enabled(&self) -> bool {
        self.running.load(Ordering::Acquire) == 0
    }

    /// Convert every album in the library, in registration order
    pub async fn run<F>(&self, library: &AlbumLibrary, format: TargetFormat, deliver: F) -> BatchReport
    where
        F: FnMut(JobOutcome) -> TranscodeResult<()>,
    {
        let keys: Vec<JobKey> = library.keys().map(str::to_string).collect();
        self.run_keys(library, &keys, format, deliver).await
    }

    /// Convert the given albums in order
    ///
    /// Each finished archive is handed to `deliver`; a delivery error counts
    /// as a failure of that album only.
    pub async fn run_keys<F>(
        &self,
        library: &AlbumLibrary,
        keys: &[JobKey],
        format: TargetFormat,
        mut deliver: F,
    ) -> BatchReport
    where
        F: FnMut(JobOutcome) -> TranscodeResult<()>,
    {
        let _suspended = TriggerSuspension::engage(&self.running);
        let registry = self.transcoder.registry();
        let mut report = BatchReport::default();

        log::info!("[Batch] Starting {} albums as {}", keys.len(), format);

        for key in keys {
            if registry.is_active(key) {
                log::info!("[Batch] {}: already converting, skipped", key);
                report.skipped.push(key.clone());
            } else if let Some(job) = library.job(key, format) {
                match self.transcoder.convert(&job).await.and_then(&mut deliver) {
                    Ok(()) => report.completed.push(key.clone()),
                    Err(TranscodeError::Concurrency(_)) => {
                        log::info!("[Batch] {}: already converting, skipped", key);
                        report.skipped.push(key.clone());
                    }
                    Err(e) => {
                        log::error!("[Batch] {}: {}", key, e);
                        report.failed.push((key.clone(), e.to_string()));
                    }
                }
            } else {
                log::warn!("[Batch] {}: not in library", key);
                report.failed.push((key.clone(), "unknown album".to_string()));
            }

            cooperative_pause(self.transcoder.config().batch_pause()).await;
        }

        log::info!(
            "[Batch] Done: {} completed, {} failed, {} skipped",
            report.completed.len(),
            report.failed.len(),
            report.skipped.len()
        );
        report
    }
}

/// Counts one running batch for its lifetime
struct TriggerSuspension<'a> {
    running: &'a AtomicUsize,
}

impl<'a> TriggerSuspension<'a> {
    fn engage(running: &'a AtomicUsize) -> Self {
        running.fetch_add(1, Ordering::AcqRel);
        Self { running }
    }
}

impl Drop for TriggerSuspension<'_> {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranscodeConfig;

    #[test]
    fn test_trigger_suspension_restores() {
        let driver = BatchDriver::new(Transcoder::new(TranscodeConfig::immediate()));
        {
            let _s = TriggerSuspension::engage(&driver.running);
            assert!(!driver.triggers_enabled());
        }
        assert!(driver.triggers_enabled());
    }

    #[test]
    fn test_overlapping_batches_keep_triggers_off() {
        let driver = BatchDriver::new(Transcoder::new(TranscodeConfig::immediate()));
        let other = driver.clone();

        let first = TriggerSuspension::engage(&driver.running);
        let second = TriggerSuspension::engage(&other.running);
        drop(second);
        assert!(!driver.triggers_enabled());
        assert!(!other.triggers_enabled());

        drop(first);
        assert!(driver.triggers_enabled());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_clone_batch_finishing_first_keeps_gate_closed() {
        let driver = BatchDriver::new(Transcoder::new(TranscodeConfig::immediate()));
        let other = driver.clone();
        let library = AlbumLibrary::new();

        let _outer = TriggerSuspension::engage(&driver.running);
        let keys = vec!["ghost".to_string()];
        other
            .run_keys(&library, &keys, TargetFormat::Wav, |_| Ok(()))
            .await;
        assert!(!driver.triggers_enabled());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_unknown_and_busy_keys() {
        let driver = BatchDriver::new(Transcoder::new(TranscodeConfig::immediate()));
        let _busy = driver.transcoder().registry().acquire("busy").unwrap();

        let keys = vec!["busy".to_string(), "ghost".to_string()];
        let report = driver
            .run_keys(&AlbumLibrary::new(), &keys, TargetFormat::Mp3, |_| Ok(()))
            .await;

        assert_eq!(report.skipped, vec!["busy".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "ghost");
        assert_eq!(report.total(), 2);
        assert!(driver.triggers_enabled());
    }
}
