//! Audio decoding module
//!
//! Decoding sits outside the transcoding core: the pipeline only needs
//! something that turns encoded bytes into an [`AudioSource`]. The default
//! implementation uses symphonia for MP3 and WAV.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{TranscodeError, TranscodeResult};
use crate::source::AudioSource;

/// Turns a source's encoded bytes into planar samples
pub trait SourceDecoder: Send + Sync {
    fn decode(&self, name: &str, bytes: Vec<u8>) -> TranscodeResult<AudioSource>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// SYMPHONIA DECODER
// ═══════════════════════════════════════════════════════════════════════════════

/// Decoder for MP3 and WAV using symphonia
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl SourceDecoder for SymphoniaDecoder {
    fn decode(&self, name: &str, bytes: Vec<u8>) -> TranscodeResult<AudioSource> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let mut hint = Hint::new();
        if let Some((_, ext)) = name.rsplit_once('.') {
            hint.with_extension(&ext.to_ascii_lowercase());
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| TranscodeError::decode(name, format!("probe failed: {}", e)))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| TranscodeError::decode(name, "no audio track found"))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| TranscodeError::decode(name, "unknown sample rate"))?;
        let mut channel_count = codec_params.channels.map(|c| c.count()).unwrap_or(0);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| TranscodeError::decode(name, format!("no decoder: {}", e)))?;

        let mut channels: Vec<Vec<f32>> = Vec::new();
        let mut sample_buf: Option<(SampleBuffer<f32>, usize)> = None;
        let mut packet_errors = 0usize;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => {
                    return Err(TranscodeError::decode(name, format!("packet read: {}", e)));
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::debug!("[Decoder] {}: skipping bad packet: {}", name, e);
                    packet_errors += 1;
                    continue;
                }
                Err(e) => return Err(TranscodeError::decode(name, e)),
            };

            let spec = *decoded.spec();
            let capacity = decoded.capacity();
            if sample_buf.is_none() {
                channel_count = spec.channels.count();
                channels = vec![Vec::new(); channel_count];
            }
            if sample_buf.as_ref().is_none_or(|(_, frames)| *frames < capacity) {
                sample_buf = Some((SampleBuffer::new(capacity as u64, spec), capacity));
            }

            if let Some((buf, _)) = sample_buf.as_mut() {
                let frames = decoded.frames();
                buf.copy_planar_ref(decoded);
                for (ch, plane) in buf.samples().chunks(frames.max(1)).enumerate() {
                    if let Some(channel) = channels.get_mut(ch) {
                        channel.extend_from_slice(plane);
                    }
                }
            }
        }

        if sample_buf.is_none() {
            if packet_errors > 0 {
                return Err(TranscodeError::decode(
                    name,
                    format!("all {} packets failed to decode", packet_errors),
                ));
            }
            // Header-only file: a valid, empty source
            channels = vec![Vec::new(); channel_count.max(1)];
        }

        log::debug!(
            "[Decoder] {}: {} ch, {} Hz, {} frames",
            name,
            channels.len(),
            sample_rate,
            channels.first().map(|c| c.len()).unwrap_or(0)
        );

        AudioSource::new(name, sample_rate, channels)
    }
}
