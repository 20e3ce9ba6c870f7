//! Pipeline Test Suite
//!
//! Drives whole jobs and batches through the transcoder with in-memory WAV
//! fixtures and the real symphonia decoder. Tests cover:
//! - Encode/archive progress sweeps
//! - Per-source fault isolation
//! - Size-limit admission
//! - Registry exclusivity and release on every path
//! - Batch continuation after a failed album
//! - Empty and all-failing jobs

use std::io::{Cursor, Read};
use std::sync::Arc;

use approx::assert_relative_eq;
use parking_lot::Mutex;

use rf_transcode::{
    AlbumLibrary, Archive, ArchiveManifest, Archiver, AudioSource, BatchDriver, ConversionJob,
    JobEvent, JobState, MemorySource, OutputKind, Phase, ProgressStream, SourceDecoder,
    SourceHandle, SymphoniaDecoder, TargetFormat, TranscodeConfig, TranscodeError,
    TranscodeResult, Transcoder, WavContainerEncoder, ZipArchiver, encode_chunked,
    progress_channel, read_container_info,
};

// ═══════════════════════════════════════════════════════════════════════════════
// TEST FIXTURES
// ═══════════════════════════════════════════════════════════════════════════════

/// 16-bit PCM WAV with a quiet sine on every channel
fn wav_bytes(channels: u16, sample_rate: u32, frames: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames {
            let value = ((i as f32 * 0.05).sin() * 8000.0) as i16;
            for _ in 0..channels {
                writer.write_sample(value).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

fn wav_source(name: &str, frames: usize) -> Arc<dyn SourceHandle> {
    Arc::new(MemorySource::new(name, wav_bytes(2, 44100, frames)))
}

fn corrupt_source(name: &str) -> Arc<dyn SourceHandle> {
    Arc::new(MemorySource::new(name, b"definitely not RIFF data".to_vec()))
}

fn config() -> TranscodeConfig {
    TranscodeConfig::immediate().with_chunk_samples(4096)
}

/// Encode-phase percentages published for `key`
fn encode_percents(events: &[JobEvent], key: &str) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Progress {
                key: k,
                phase: Phase::Encoding,
                percent,
            } if k == key => Some(*percent),
            _ => None,
        })
        .collect()
}

fn drain(stream: &mut ProgressStream) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(event) = stream.try_recv() {
        events.push(event);
    }
    events
}

/// Entry names in archive order
fn zip_names(archive: &Archive) -> Vec<String> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive.bytes.clone())).unwrap();
    (0..zip.len())
        .map(|i| zip.by_index(i).unwrap().name().to_string())
        .collect()
}

/// Symphonia decoder that records what it was asked to decode
#[derive(Default)]
struct RecordingDecoder {
    seen: Mutex<Vec<String>>,
}

impl SourceDecoder for RecordingDecoder {
    fn decode(&self, name: &str, bytes: Vec<u8>) -> TranscodeResult<AudioSource> {
        self.seen.lock().push(name.to_string());
        SymphoniaDecoder::new().decode(name, bytes)
    }
}

/// Zip archiver that refuses one album
struct RefusingArchiver {
    refuse: &'static str,
}

impl Archiver for RefusingArchiver {
    fn build(
        &self,
        manifest: &ArchiveManifest,
        progress: &mut dyn FnMut(u8),
    ) -> TranscodeResult<Archive> {
        if manifest.job_key == self.refuse {
            return Err(TranscodeError::Archive("disk full".to_string()));
        }
        ZipArchiver::default().build(manifest, progress)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROGRESS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "current_thread")]
async fn test_encode_progress_is_monotonic_and_ends_at_100() {
    let (sink, mut stream) = progress_channel();
    let transcoder = Transcoder::new(config()).with_progress(sink);
    let job = ConversionJob::new(
        "Album",
        vec![
            wav_source("01.wav", 10_000),
            wav_source("02.wav", 3_000),
            wav_source("03.wav", 7_000),
        ],
        TargetFormat::All,
    );

    transcoder.convert(&job).await.unwrap();
    let events = drain(&mut stream);

    let percents = encode_percents(&events, "Album");
    assert!(percents.len() > 3);
    assert!(percents.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(percents.last(), Some(&100));

    // Archive sweep starts over from 0 after encoding finishes
    let archive: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Progress {
                phase: Phase::Archiving,
                percent,
                ..
            } => Some(*percent),
            _ => None,
        })
        .collect();
    assert_eq!(archive.first(), Some(&0));
    assert_eq!(archive.last(), Some(&100));
}

// ═══════════════════════════════════════════════════════════════════════════════
// FAULT ISOLATION
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "current_thread")]
async fn test_corrupt_source_skipped_with_both_targets() {
    let (sink, mut stream) = progress_channel();
    let transcoder = Transcoder::new(config()).with_progress(sink);
    let job = ConversionJob::new(
        "Album",
        vec![
            wav_source("A.wav", 5_000),
            corrupt_source("B.wav"),
            wav_source("C.wav", 5_000),
        ],
        TargetFormat::All,
    );

    let outcome = transcoder.convert(&job).await.unwrap();

    assert_eq!(outcome.state, JobState::Completed);
    assert_eq!(outcome.converted, 2);
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!(outcome.skipped[0].name, "B.wav");
    assert_eq!(outcome.archive.file_name, "Album_all.zip");
    assert_eq!(
        zip_names(&outcome.archive),
        vec!["Album/", "Album/A.mp3", "Album/A.wav", "Album/C.mp3", "Album/C.wav"]
    );
    assert!(!transcoder.registry().is_active("Album"));

    let events = drain(&mut stream);
    assert!(events.iter().any(|e| matches!(
        e,
        JobEvent::SourceSkipped { name, .. } if name == "B.wav"
    )));
    assert_eq!(encode_percents(&events, "Album").last(), Some(&100));
}

#[tokio::test(flavor = "current_thread")]
async fn test_oversized_source_never_decoded() {
    let decoder = Arc::new(RecordingDecoder::default());
    let small = wav_source("small.wav", 1_000);
    let limit = small.size();
    let transcoder = Transcoder::new(config().with_max_source_bytes(limit))
        .with_decoder(decoder.clone());

    // Direct job: excluded before the denominator is fixed
    let job = ConversionJob::new(
        "Album",
        vec![small.clone(), wav_source("big.wav", 50_000)],
        TargetFormat::Wav,
    );
    let outcome = transcoder.convert(&job).await.unwrap();
    assert_eq!(zip_names(&outcome.archive), vec!["Album/", "Album/small.wav"]);
    assert!(outcome.skipped.is_empty());
    assert_eq!(*decoder.seen.lock(), vec!["small.wav".to_string()]);

    // Library admission: never registered in the first place
    let mut library = AlbumLibrary::new();
    library.register("Album", vec![small, wav_source("big.wav", 50_000)], limit);
    assert_eq!(library.sources("Album").map(|s| s.len()), Some(1));
}

#[tokio::test(flavor = "current_thread")]
async fn test_oversized_source_not_in_progress_denominator() {
    let (sink, mut stream) = progress_channel();
    let small = wav_source("small.wav", 1_000);
    let limit = small.size();
    let transcoder = Transcoder::new(config().with_max_source_bytes(limit)).with_progress(sink);

    let job = ConversionJob::new(
        "Album",
        vec![small, wav_source("big.wav", 50_000)],
        TargetFormat::Wav,
    );
    assert_eq!(job.source_count(), 2);
    assert_eq!(job.admitted_count(limit), 1);

    transcoder.convert(&job).await.unwrap();
    let events = drain(&mut stream);

    assert!(events.iter().any(|e| matches!(
        e,
        JobEvent::Started { sources: 1, .. }
    )));
    // One single-chunk source: a counted big.wav would show up as 50
    assert_eq!(encode_percents(&events, "Album"), vec![0, 100]);
}

#[tokio::test(flavor = "current_thread")]
async fn test_unreadable_source_is_skipped() {
    #[derive(Debug)]
    struct Vanished;

    impl SourceHandle for Vanished {
        fn name(&self) -> &str {
            "gone.wav"
        }

        fn size(&self) -> u64 {
            10
        }

        fn read(&self) -> std::io::Result<Vec<u8>> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))
        }
    }

    let transcoder = Transcoder::new(config());
    let job = ConversionJob::new(
        "Album",
        vec![Arc::new(Vanished) as Arc<dyn SourceHandle>, wav_source("ok.wav", 2_000)],
        TargetFormat::Wav,
    );
    let outcome = transcoder.convert(&job).await.unwrap();
    assert_eq!(outcome.converted, 1);
    assert!(outcome.skipped[0].reason.contains("gone"));
}

// ═══════════════════════════════════════════════════════════════════════════════
// EMPTY RESULTS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "current_thread")]
async fn test_empty_job_completes_with_empty_folder() {
    let (sink, mut stream) = progress_channel();
    let transcoder = Transcoder::new(config()).with_progress(sink);

    let outcome = transcoder
        .convert(&ConversionJob::new("Nothing", Vec::new(), TargetFormat::Mp3))
        .await
        .unwrap();

    assert_eq!(outcome.state, JobState::Completed);
    assert_eq!(outcome.archive.file_name, "Nothing_mp3.zip");
    assert_eq!(outcome.archive.file_count(), 0);
    assert_eq!(zip_names(&outcome.archive), vec!["Nothing/"]);
    assert_eq!(encode_percents(&drain(&mut stream), "Nothing"), vec![100]);
}

#[tokio::test(flavor = "current_thread")]
async fn test_all_sources_failing_completes_with_empty_folder() {
    let (sink, mut stream) = progress_channel();
    let transcoder = Transcoder::new(config()).with_progress(sink);
    let job = ConversionJob::new(
        "Broken",
        vec![corrupt_source("1.wav"), corrupt_source("2.mp3")],
        TargetFormat::All,
    );

    let outcome = transcoder.convert(&job).await.unwrap();

    assert_eq!(outcome.state, JobState::Completed);
    assert_eq!(outcome.converted, 0);
    assert_eq!(outcome.skipped.len(), 2);
    assert_eq!(zip_names(&outcome.archive), vec!["Broken/"]);
    assert_eq!(encode_percents(&drain(&mut stream), "Broken"), vec![0, 50, 100]);
    assert!(!transcoder.registry().is_active("Broken"));
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONCURRENCY
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "current_thread")]
async fn test_same_key_runs_once() {
    let transcoder = Transcoder::new(config());
    let job = ConversionJob::new("Album", vec![wav_source("01.wav", 20_000)], TargetFormat::Wav);

    let (first, second) = tokio::join!(transcoder.convert(&job), transcoder.convert(&job));

    let results = [first, second];
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(TranscodeError::Concurrency(k)) if k == "Album"))
        .count();
    assert_eq!(rejected, 1);
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(transcoder.registry().active_count(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn test_different_keys_interleave() {
    let (sink, mut stream) = progress_channel();
    let transcoder = Transcoder::new(config()).with_progress(sink);
    let a = ConversionJob::new("A", vec![wav_source("a.wav", 40_000)], TargetFormat::Wav);
    let b = ConversionJob::new("B", vec![wav_source("b.wav", 40_000)], TargetFormat::Wav);

    let (ra, rb) = tokio::join!(transcoder.convert(&a), transcoder.convert(&b));
    assert!(ra.is_ok());
    assert!(rb.is_ok());

    let events = drain(&mut stream);
    let b_started = events
        .iter()
        .position(|e| matches!(e, JobEvent::Started { key, .. } if key == "B"))
        .unwrap();
    let a_completed = events
        .iter()
        .position(|e| matches!(e, JobEvent::Completed { key, .. } if key == "A"))
        .unwrap();
    assert!(b_started < a_completed);
    assert_eq!(transcoder.registry().active_count(), 0);
}

// ═══════════════════════════════════════════════════════════════════════════════
// BATCH
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "current_thread")]
async fn test_batch_continues_after_archive_failure() {
    let (sink, mut stream) = progress_channel();
    let transcoder = Transcoder::new(config())
        .with_archiver(Arc::new(RefusingArchiver { refuse: "J2" }))
        .with_progress(sink);
    let driver = BatchDriver::new(transcoder);

    let mut library = AlbumLibrary::new();
    library.register("J1", vec![wav_source("1.wav", 2_000)], u64::MAX);
    library.register("J2", vec![wav_source("2.wav", 2_000)], u64::MAX);
    library.register("J3", vec![wav_source("3.wav", 2_000)], u64::MAX);

    let mut delivered = Vec::new();
    let mut gate_during = Vec::new();
    let report = driver
        .run(&library, TargetFormat::Mp3, |outcome| {
            gate_during.push(driver.triggers_enabled());
            delivered.push(outcome.archive.file_name);
            Ok(())
        })
        .await;

    assert_eq!(report.completed, vec!["J1".to_string(), "J3".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "J2");
    assert!(report.failed[0].1.contains("disk full"));
    assert_eq!(delivered, vec!["J1_mp3.zip".to_string(), "J3_mp3.zip".to_string()]);

    assert!(gate_during.iter().all(|enabled| !enabled));
    assert!(driver.triggers_enabled());
    assert!(!driver.transcoder().registry().is_active("J2"));

    let events = drain(&mut stream);
    assert!(events.iter().any(|e| matches!(
        e,
        JobEvent::State { key, state: JobState::Failed } if key == "J2"
    )));
}

#[tokio::test(flavor = "current_thread")]
async fn test_batch_delivery_error_fails_only_that_album() {
    let driver = BatchDriver::new(Transcoder::new(config()));
    let mut library = AlbumLibrary::new();
    library.register("J1", vec![wav_source("1.wav", 1_000)], u64::MAX);
    library.register("J2", vec![wav_source("2.wav", 1_000)], u64::MAX);

    let report = driver
        .run(&library, TargetFormat::Wav, |outcome| {
            if outcome.key == "J1" {
                return Err(std::io::Error::other("read-only").into());
            }
            Ok(())
        })
        .await;

    assert_eq!(report.completed, vec!["J2".to_string()]);
    assert_eq!(report.failed[0].0, "J1");
    assert_eq!(report.total(), 2);
    assert!(driver.triggers_enabled());
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTAINER ROUND TRIP
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "current_thread")]
async fn test_mono_container_round_trip() {
    let samples: Vec<f32> = (0..12_345).map(|i| ((i as f32) * 0.01).sin() * 0.5).collect();
    let source = AudioSource::new("voice.mp3", 22050, vec![samples.clone()]).unwrap();

    let output = encode_chunked(&WavContainerEncoder::new(1000), &source, |_| {})
        .await
        .unwrap();
    assert_eq!(output.file_name, "voice.wav");
    assert_eq!(output.kind, OutputKind::Container);

    let info = read_container_info(&output.bytes).unwrap();
    assert_eq!(info.channels, 1);
    assert_eq!(info.sample_rate, 22050);
    assert_eq!(info.frames, 12_345);
    assert!(info.is_float);

    let mut reader = hound::WavReader::new(Cursor::new(output.bytes)).unwrap();
    let decoded: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
    assert_eq!(decoded.len(), samples.len());
    assert_relative_eq!(decoded[100], samples[100]);
    assert_relative_eq!(decoded[12_344], samples[12_344]);
}

#[tokio::test(flavor = "current_thread")]
async fn test_archived_wav_decodes_back() {
    let transcoder = Transcoder::new(config());
    let job = ConversionJob::new("Album", vec![wav_source("01.wav", 3_000)], TargetFormat::Wav);
    let outcome = transcoder.convert(&job).await.unwrap();

    let mut zip = zip::ZipArchive::new(Cursor::new(outcome.archive.bytes)).unwrap();
    let mut bytes = Vec::new();
    zip.by_name("Album/01.wav").unwrap().read_to_end(&mut bytes).unwrap();

    let decoded = SymphoniaDecoder::new().decode("01.wav", bytes).unwrap();
    assert_eq!(decoded.channel_count(), 2);
    assert_eq!(decoded.frames(), 3_000);
    assert_eq!(decoded.sample_rate(), 44100);
}
