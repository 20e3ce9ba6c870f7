//! Chunked audio encoders
//!
//! Supports:
//! - MP3 (via mp3lame-encoder), 16-bit PCM fed to LAME in frame-sized blocks
//! - WAV (via hound), interleaved 32-bit float
//!
//! Encoders are synchronous and split their work into chunks. The async
//! [`encode_chunked`] driver runs the chunks, yields to the scheduler before
//! each one and reports the completed fraction after each one.

use std::io::Cursor;
use std::ops::Range;

use crate::config::TranscodeConfig;
use crate::error::{TranscodeError, TranscodeResult};
use crate::formats::{OutputKind, TargetFormat, replace_extension};
use crate::job::EncodedOutput;
use crate::source::AudioSource;

/// Quantization scale for 16-bit PCM
pub const I16_SCALE: f32 = 32767.0;

/// Convert a float sample to 16-bit PCM
///
/// Input is clamped to [-1.0, 1.0] first, so out-of-range samples saturate
/// at ±32767 instead of wrapping.
#[inline]
pub fn quantize_sample(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * I16_SCALE) as i16
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHUNK PLAN
// ═══════════════════════════════════════════════════════════════════════════════

/// Split of `total` units into chunks of at most `chunk` units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    total: usize,
    chunk: usize,
}

impl ChunkPlan {
    pub fn new(total: usize, chunk: usize) -> Self {
        Self {
            total,
            chunk: chunk.max(1),
        }
    }

    /// Number of chunks; zero when there is nothing to process
    pub fn count(&self) -> usize {
        self.total.div_ceil(self.chunk)
    }

    /// Unit range covered by chunk `index`
    pub fn range(&self, index: usize) -> Range<usize> {
        let start = (index * self.chunk).min(self.total);
        let end = (start + self.chunk).min(self.total);
        start..end
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENCODER TRAITS
// ═══════════════════════════════════════════════════════════════════════════════

/// Encoder for one output kind
pub trait ChunkedEncoder {
    /// Content kind produced
    fn kind(&self) -> OutputKind;

    /// Prepare an encoding session for `source`
    ///
    /// Fails with [`TranscodeError::Encode`] when the codec cannot be set up
    /// for the source (channel layout, sample rate).
    fn open<'a>(&self, source: &'a AudioSource) -> TranscodeResult<Box<dyn EncodeSession + 'a>>;
}

/// An in-progress encode of one source
pub trait EncodeSession {
    fn chunk_count(&self) -> usize;

    /// Encode chunk `index`; chunks are fed in order
    fn encode_chunk(&mut self, index: usize) -> TranscodeResult<()>;

    /// Flush and return the encoded bytes
    fn finish(self: Box<Self>) -> TranscodeResult<Vec<u8>>;
}

/// Encoders for a target format, in output order
pub fn encoders_for(format: TargetFormat, config: &TranscodeConfig) -> Vec<Box<dyn ChunkedEncoder>> {
    format
        .kinds()
        .iter()
        .map(|kind| create_encoder(*kind, config))
        .collect()
}

/// Create the encoder for an output kind
pub fn create_encoder(kind: OutputKind, config: &TranscodeConfig) -> Box<dyn ChunkedEncoder> {
    match kind {
        OutputKind::Lossy => Box::new(LameMp3Encoder::new(
            config.mp3_bitrate_kbps,
            config.chunk_samples,
            config.mp3_block_size,
        )),
        OutputKind::Container => Box::new(WavContainerEncoder::new(config.chunk_samples)),
    }
}

/// Run an encoder over a source chunk by chunk
///
/// Yields to the scheduler before every chunk and calls `on_progress` with
/// `(chunks done) / (chunks total)` after every chunk.
pub async fn encode_chunked(
    encoder: &dyn ChunkedEncoder,
    source: &AudioSource,
    mut on_progress: impl FnMut(f64),
) -> TranscodeResult<EncodedOutput> {
    let mut session = encoder.open(source)?;
    let total = session.chunk_count();

    for index in 0..total {
        tokio::task::yield_now().await;
        session.encode_chunk(index)?;
        on_progress((index + 1) as f64 / total as f64);
    }

    let bytes = session.finish()?;
    let kind = encoder.kind();
    log::debug!(
        "[Encoder] {} -> {} ({} bytes, {} chunks)",
        source.name(),
        kind.extension(),
        bytes.len(),
        total
    );

    Ok(EncodedOutput::new(
        replace_extension(source.name(), kind.extension()),
        bytes,
        kind,
    ))
}

// ═══════════════════════════════════════════════════════════════════════════════
// MP3 ENCODER (LAME)
// ═══════════════════════════════════════════════════════════════════════════════

/// MP3 encoder using LAME via mp3lame-encoder, constant bitrate
///
/// LAME is always driven in stereo; mono sources are duplicated into both
/// channels.
pub struct LameMp3Encoder {
    bitrate_kbps: u32,
    chunk_samples: usize,
    block_size: usize,
}

impl LameMp3Encoder {
    pub fn new(bitrate_kbps: u32, chunk_samples: usize, block_size: usize) -> Self {
        Self {
            bitrate_kbps,
            chunk_samples,
            block_size: block_size.max(1),
        }
    }

    /// LAME bitrate at or below the configured kbps, 96 at the least
    fn lame_bitrate(&self) -> mp3lame_encoder::Bitrate {
        match self.bitrate_kbps {
            0..=111 => mp3lame_encoder::Bitrate::Kbps96,
            112..=127 => mp3lame_encoder::Bitrate::Kbps112,
            128..=159 => mp3lame_encoder::Bitrate::Kbps128,
            160..=191 => mp3lame_encoder::Bitrate::Kbps160,
            192..=223 => mp3lame_encoder::Bitrate::Kbps192,
            224..=255 => mp3lame_encoder::Bitrate::Kbps224,
            256..=319 => mp3lame_encoder::Bitrate::Kbps256,
            _ => mp3lame_encoder::Bitrate::Kbps320,
        }
    }
}

impl ChunkedEncoder for LameMp3Encoder {
    fn kind(&self) -> OutputKind {
        OutputKind::Lossy
    }

    fn open<'a>(&self, source: &'a AudioSource) -> TranscodeResult<Box<dyn EncodeSession + 'a>> {
        use mp3lame_encoder::Builder;

        let channels = source.channel_count();
        if !(1..=2).contains(&channels) {
            return Err(TranscodeError::Encode(format!(
                "{}: MP3 supports 1 or 2 channels, source has {}",
                source.name(),
                channels
            )));
        }

        let mut builder = Builder::new()
            .ok_or_else(|| TranscodeError::Encode("LAME encoder init failed".to_string()))?;

        builder.set_num_channels(2).map_err(|e| {
            TranscodeError::Encode(format!("LAME set channels failed: {:?}", e))
        })?;

        builder.set_sample_rate(source.sample_rate()).map_err(|e| {
            TranscodeError::Encode(format!(
                "LAME rejected sample rate {}: {:?}",
                source.sample_rate(),
                e
            ))
        })?;

        builder.set_brate(self.lame_bitrate()).map_err(|e| {
            TranscodeError::Encode(format!("LAME set bitrate failed: {:?}", e))
        })?;

        builder
            .set_quality(mp3lame_encoder::Quality::Good)
            .map_err(|e| TranscodeError::Encode(format!("LAME set quality failed: {:?}", e)))?;

        let encoder = builder
            .build()
            .map_err(|e| TranscodeError::Encode(format!("LAME build failed: {:?}", e)))?;

        Ok(Box::new(LameSession {
            source,
            plan: ChunkPlan::new(source.frames(), self.chunk_samples),
            block_size: self.block_size,
            encoder,
            left: Vec::with_capacity(self.block_size),
            right: Vec::with_capacity(self.block_size),
            output: Vec::new(),
        }))
    }
}

struct LameSession<'a> {
    source: &'a AudioSource,
    plan: ChunkPlan,
    block_size: usize,
    encoder: mp3lame_encoder::Encoder,
    left: Vec<i16>,
    right: Vec<i16>,
    output: Vec<u8>,
}

impl LameSession<'_> {
    fn encode_block(&mut self, frames: Range<usize>) -> TranscodeResult<()> {
        use mp3lame_encoder::DualPcm;

        let source = self.source;
        let left = &source.channel(0)[frames.clone()];
        // Mono feeds the same samples to both sides
        let right = if source.channel_count() > 1 {
            &source.channel(1)[frames.clone()]
        } else {
            left
        };

        self.left.clear();
        self.left.extend(left.iter().copied().map(quantize_sample));
        self.right.clear();
        self.right.extend(right.iter().copied().map(quantize_sample));

        self.output
            .reserve(mp3lame_encoder::max_required_buffer_size(frames.len()));

        let input = DualPcm {
            left: &self.left,
            right: &self.right,
        };

        let encoded_size = self
            .encoder
            .encode(input, self.output.spare_capacity_mut())
            .map_err(|e| TranscodeError::Encode(format!("LAME encode failed: {:?}", e)))?;

        // SAFETY: encoder wrote encoded_size bytes into spare capacity
        unsafe {
            self.output.set_len(self.output.len() + encoded_size);
        }

        Ok(())
    }
}

impl EncodeSession for LameSession<'_> {
    fn chunk_count(&self) -> usize {
        self.plan.count()
    }

    fn encode_chunk(&mut self, index: usize) -> TranscodeResult<()> {
        let range = self.plan.range(index);
        let mut start = range.start;
        while start < range.end {
            let end = (start + self.block_size).min(range.end);
            self.encode_block(start..end)?;
            start = end;
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> TranscodeResult<Vec<u8>> {
        use mp3lame_encoder::FlushNoGap;

        // Room for the trailing frames LAME still buffers
        self.output.reserve(7200);
        let flush_size = self
            .encoder
            .flush::<FlushNoGap>(self.output.spare_capacity_mut())
            .map_err(|e| TranscodeError::Encode(format!("LAME flush failed: {:?}", e)))?;

        // SAFETY: encoder wrote flush_size bytes into spare capacity
        unsafe {
            self.output.set_len(self.output.len() + flush_size);
        }

        Ok(std::mem::take(&mut self.output))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WAV CONTAINER ENCODER
// ═══════════════════════════════════════════════════════════════════════════════

/// WAV encoder writing interleaved 32-bit float samples via hound
///
/// The interleaved buffer covers the whole source and is allocated up front;
/// chunking paces the copy and progress, it does not bound memory.
pub struct WavContainerEncoder {
    chunk_samples: usize,
}

impl WavContainerEncoder {
    pub fn new(chunk_samples: usize) -> Self {
        Self { chunk_samples }
    }
}

impl ChunkedEncoder for WavContainerEncoder {
    fn kind(&self) -> OutputKind {
        OutputKind::Container
    }

    fn open<'a>(&self, source: &'a AudioSource) -> TranscodeResult<Box<dyn EncodeSession + 'a>> {
        let channels = source.channel_count();
        if channels > u16::MAX as usize {
            return Err(TranscodeError::Encode(format!(
                "{}: {} channels do not fit a WAV header",
                source.name(),
                channels
            )));
        }

        // Chunks cover whole frames, `chunk_samples` interleaved samples at most
        let frames_per_chunk = (self.chunk_samples / channels).max(1);

        Ok(Box::new(WavSession {
            source,
            plan: ChunkPlan::new(source.frames(), frames_per_chunk),
            interleaved: vec![0.0; source.total_samples()],
        }))
    }
}

struct WavSession<'a> {
    source: &'a AudioSource,
    plan: ChunkPlan,
    interleaved: Vec<f32>,
}

impl EncodeSession for WavSession<'_> {
    fn chunk_count(&self) -> usize {
        self.plan.count()
    }

    fn encode_chunk(&mut self, index: usize) -> TranscodeResult<()> {
        let frames = self.plan.range(index);
        let channels = self.source.channel_count();

        for ch in 0..channels {
            let data = &self.source.channel(ch)[frames.clone()];
            for (offset, &sample) in data.iter().enumerate() {
                self.interleaved[(frames.start + offset) * channels + ch] = sample;
            }
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> TranscodeResult<Vec<u8>> {
        let mut output = Vec::new();
        let cursor = Cursor::new(&mut output);

        let spec = hound::WavSpec {
            channels: self.source.channel_count() as u16,
            sample_rate: self.source.sample_rate(),
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };

        let mut writer = hound::WavWriter::new(cursor, spec)
            .map_err(|e| TranscodeError::Encode(e.to_string()))?;

        for &sample in &self.interleaved {
            writer
                .write_sample(sample)
                .map_err(|e| TranscodeError::Encode(e.to_string()))?;
        }

        writer
            .finalize()
            .map_err(|e| TranscodeError::Encode(e.to_string()))?;

        Ok(output)
    }
}

/// Format descriptor recovered from a WAV byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerInfo {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub is_float: bool,
    /// Samples per channel
    pub frames: u32,
}

/// Parse the header of a WAV byte stream
pub fn read_container_info(bytes: &[u8]) -> TranscodeResult<ContainerInfo> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| TranscodeError::decode("container", e))?;
    let spec = reader.spec();
    Ok(ContainerInfo {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        bits_per_sample: spec.bits_per_sample,
        is_float: spec.sample_format == hound::SampleFormat::Float,
        frames: reader.duration(),
    })
}
