//! Job progress reporting
//!
//! Two independent 0-100 sweeps per job: the encode phase, aggregated from
//! (source index, chunk fraction), then the archive phase reported by the
//! archiver. Both are published as [`JobEvent`]s on an unbounded channel;
//! presentation layers subscribe to the receiving end.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::job::{JobKey, JobState};

/// Encode-phase percentage for source `index` of `total` at chunk `fraction`
///
/// `round(((index + fraction) / total) * 100)`, clamped to 0-100. A job with
/// no sources is complete by definition.
pub fn encode_percent(index: usize, fraction: f64, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let fraction = fraction.clamp(0.0, 1.0);
    let value = ((index as f64 + fraction) / total as f64) * 100.0;
    value.round().clamp(0.0, 100.0) as u8
}

/// Progress phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Encoding,
    Archiving,
}

/// Events published while a job runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobEvent {
    /// Guard acquired, conversion begins
    Started { key: JobKey, sources: usize },
    /// Lifecycle transition
    State { key: JobKey, state: JobState },
    /// Percent within a phase
    Progress { key: JobKey, phase: Phase, percent: u8 },
    /// A source was dropped and the job continues
    SourceSkipped { key: JobKey, name: String, reason: String },
    /// Archive ready
    Completed { key: JobKey, file_name: String, entries: usize },
    /// Job-level failure
    Failed { key: JobKey, reason: String },
}

impl JobEvent {
    pub fn key(&self) -> &str {
        match self {
            Self::Started { key, .. }
            | Self::State { key, .. }
            | Self::Progress { key, .. }
            | Self::SourceSkipped { key, .. }
            | Self::Completed { key, .. }
            | Self::Failed { key, .. } => key,
        }
    }
}

/// Sending half of the progress channel
pub type ProgressSink = mpsc::UnboundedSender<JobEvent>;

/// Receiving half of the progress channel
pub type ProgressStream = mpsc::UnboundedReceiver<JobEvent>;

/// Create a progress channel
pub fn progress_channel() -> (ProgressSink, ProgressStream) {
    mpsc::unbounded_channel()
}

/// Publish an event; a closed channel is not an error for the job
pub(crate) fn publish(sink: Option<&ProgressSink>, event: JobEvent) {
    if let Some(sink) = sink {
        let _ = sink.send(event);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRACKER
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-job, per-phase progress emitter
///
/// Only publishes when the percentage moves forward, so subscribers see a
/// non-decreasing sequence without repeats.
#[derive(Debug)]
pub struct ProgressTracker<'a> {
    key: &'a str,
    phase: Phase,
    sink: Option<&'a ProgressSink>,
    last: Option<u8>,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(key: &'a str, phase: Phase, sink: Option<&'a ProgressSink>) -> Self {
        Self {
            key,
            phase,
            sink,
            last: None,
        }
    }

    /// Report a percentage; returns true when it was published
    pub fn report(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        if self.last.is_some_and(|last| percent <= last) {
            return false;
        }
        self.last = Some(percent);
        publish(
            self.sink,
            JobEvent::Progress {
                key: self.key.to_string(),
                phase: self.phase,
                percent,
            },
        );
        true
    }

    /// Report an encode-phase position
    pub fn report_source(&mut self, index: usize, fraction: f64, total: usize) -> bool {
        self.report(encode_percent(index, fraction, total))
    }

    /// Last published percentage
    pub fn last(&self) -> Option<u8> {
        self.last
    }
}
