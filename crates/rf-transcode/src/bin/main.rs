//! rf-transcode: convert album folders into zip archives
//!
//! Usage:
//!   rf-transcode <DIR>...                  - Convert each folder to MP3 + WAV
//!   rf-transcode -f mp3 -o out <DIR>...    - MP3 only, archives written to `out`
//!
//! Each folder is one album. Files are collected recursively; anything that
//! is not `.mp3`/`.wav` or exceeds the size limit is left out.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use walkdir::WalkDir;

use rf_transcode::{
    AlbumLibrary, BatchDriver, FsSource, JobEvent, JobOutcome, Phase, ProgressStream,
    SourceHandle, TargetFormat, TranscodeConfig, TranscodeError, Transcoder, progress_channel,
};

#[derive(Parser)]
#[command(name = "rf-transcode", version, about = "Album transcoding to zip archives")]
struct Cli {
    /// Album folders
    #[arg(required = true)]
    dirs: Vec<PathBuf>,

    /// Target format: mp3, wav or all
    #[arg(short, long, default_value = "all", value_parser = parse_format)]
    format: TargetFormat,

    /// Directory receiving the archives
    #[arg(short, long, default_value = ".")]
    out: PathBuf,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pause after each source, in milliseconds
    #[arg(long)]
    source_pause_ms: Option<u64>,

    /// Pause after each album of a batch, in milliseconds
    #[arg(long)]
    batch_pause_ms: Option<u64>,
}

fn parse_format(value: &str) -> Result<TargetFormat, String> {
    TargetFormat::from_marker(value).ok_or_else(|| format!("unknown format '{}'", value))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => TranscodeConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TranscodeConfig::default(),
    };
    if let Some(ms) = cli.source_pause_ms {
        config.source_pause_ms = ms;
    }
    if let Some(ms) = cli.batch_pause_ms {
        config.batch_pause_ms = ms;
    }

    std::fs::create_dir_all(&cli.out)
        .with_context(|| format!("Failed to create {}", cli.out.display()))?;

    let library = load_library(&cli.dirs, config.max_source_bytes)?;
    if library.is_empty() {
        bail!("No convertible audio found");
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;

    runtime.block_on(run(config, library, cli.format, cli.out))
}

async fn run(
    config: TranscodeConfig,
    library: AlbumLibrary,
    format: TargetFormat,
    out: PathBuf,
) -> Result<()> {
    let (sink, events) = progress_channel();
    let printer = tokio::spawn(print_events(events));

    let transcoder = Transcoder::new(config).with_progress(sink);
    let failures = if library.supports_batch() {
        let driver = BatchDriver::new(transcoder);
        let report = driver
            .run(&library, format, |outcome| write_archive(&out, &outcome))
            .await;
        report.failed.len()
    } else {
        let mut failures = 0;
        for key in library.keys() {
            let Some(job) = library.job(key, format) else {
                continue;
            };
            let result = transcoder
                .convert(&job)
                .await
                .and_then(|outcome| write_archive(&out, &outcome));
            if let Err(e) = result {
                log::error!("{}: {}", key, e);
                failures += 1;
            }
        }
        drop(transcoder);
        failures
    };

    printer.await.context("Progress printer panicked")?;

    if failures > 0 {
        bail!("{} album(s) failed", failures);
    }
    Ok(())
}

/// Collect each folder's files, in path order, into the library
fn load_library(dirs: &[PathBuf], max_source_bytes: u64) -> Result<AlbumLibrary> {
    let mut library = AlbumLibrary::new();

    for dir in dirs {
        let name = album_key(dir)?;
        let key = library.unique_key(&name);
        if key != name {
            log::warn!("{}: folder name already used, registering as {}", dir.display(), key);
        }
        let mut files: Vec<Arc<dyn SourceHandle>> = Vec::new();

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            match FsSource::open(entry.path()) {
                Ok(source) => files.push(Arc::new(source)),
                Err(e) => log::warn!("Skipping {}: {}", entry.path().display(), e),
            }
        }

        match library.register(key.clone(), files, max_source_bytes) {
            Some(count) => log::info!("{}: {} sources", key, count),
            None => log::warn!("{}: nothing to convert", key),
        }
    }

    Ok(library)
}

fn album_key(dir: &Path) -> Result<String> {
    let dir = dir
        .canonicalize()
        .with_context(|| format!("Failed to open {}", dir.display()))?;
    let name = dir
        .file_name()
        .with_context(|| format!("{} has no folder name", dir.display()))?;
    Ok(name.to_string_lossy().into_owned())
}

fn write_archive(out: &Path, outcome: &JobOutcome) -> Result<(), TranscodeError> {
    let path = out.join(&outcome.archive.file_name);
    std::fs::write(&path, &outcome.archive.bytes)?;
    log::info!(
        "{}: wrote {} ({} files, {} skipped)",
        outcome.key,
        path.display(),
        outcome.archive.file_count(),
        outcome.skipped.len()
    );
    Ok(())
}

async fn print_events(mut events: ProgressStream) {
    while let Some(event) = events.recv().await {
        match event {
            JobEvent::Started { key, sources } => {
                log::info!("{}: started ({} sources)", key, sources)
            }
            JobEvent::Progress { key, phase, percent } => {
                let label = match phase {
                    Phase::Encoding => "encoding",
                    Phase::Archiving => "archiving",
                };
                log::info!("{}: {} {}%", key, label, percent)
            }
            JobEvent::SourceSkipped { key, name, reason } => {
                log::warn!("{}: skipped {} ({})", key, name, reason)
            }
            JobEvent::Completed { key, file_name, entries } => {
                log::info!("{}: ready {} ({} files)", key, file_name, entries)
            }
            JobEvent::Failed { key, reason } => log::error!("{}: failed ({})", key, reason),
            JobEvent::State { key, state } => log::debug!("{}: {:?}", key, state),
        }
    }
}
