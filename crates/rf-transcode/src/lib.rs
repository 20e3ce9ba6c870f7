//! RF-Transcode: Album Transcoding Pipeline
//!
//! Converts albums of MP3/WAV files into downloadable zip archives:
//! - MP3 output (LAME, 128 kbps CBR)
//! - WAV output (32-bit float)
//! - Or both, side by side in one archive
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          BatchDriver                              │
//! │                                                                   │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │                       Transcoder                            │  │
//! │  │                                                             │  │
//! │  │  ┌────────┐   ┌─────────┐   ┌───────────┐   ┌───────────┐  │  │
//! │  │  │ Source │ → │ Decoder │ → │ Chunked   │ → │ Archiver  │  │  │
//! │  │  │ Handle │   │         │   │ Encoders  │   │ (zip)     │  │  │
//! │  │  └────────┘   └─────────┘   └───────────┘   └───────────┘  │  │
//! │  │        ActiveJobRegistry ── one job per album key           │  │
//! │  └────────────────────────────────────────────────────────────┘  │
//! │                 JobEvent channel → subscribers                    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All work runs cooperatively on one thread: encoders yield once per
//! chunk, the transcoder pauses once per source and the batch driver once
//! per album.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rf_transcode::{AlbumLibrary, TargetFormat, TranscodeConfig, Transcoder, progress_channel};
//!
//! let (sink, mut events) = progress_channel();
//! let transcoder = Transcoder::new(TranscodeConfig::default()).with_progress(sink);
//!
//! let job = library.job("Album", TargetFormat::All).unwrap();
//! let outcome = transcoder.convert(&job).await?;
//! std::fs::write(&outcome.archive.file_name, &outcome.archive.bytes)?;
//! ```

mod archive;
mod batch;
mod config;
mod decoder;
mod encoder;
mod error;
mod formats;
mod job;
mod pipeline;
mod progress;
mod registry;
mod source;

pub use archive::*;
pub use batch::*;
pub use config::*;
pub use decoder::*;
pub use encoder::*;
pub use error::*;
pub use formats::*;
pub use job::*;
pub use pipeline::*;
pub use progress::*;
pub use registry::*;
pub use source::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
