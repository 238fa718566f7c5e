//! Audio Decoding
//!
//! Whole-resource decode into planar f32 buffers. Runs on the loader's
//! blocking worker, never on the media thread.

use std::io::Cursor;

use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::audio::AudioBuffer;

// Isolated bad packets are skipped; this many in a row fails the decode.
const MAX_DECODE_RETRIES: usize = 3;

/// Decode capability used by the resource loader
pub trait Decoder: Send + Sync {
    /// Decode a complete resource. `hint` is a file extension, if known.
    fn decode(&self, bytes: Vec<u8>, hint: Option<&str>) -> Result<AudioBuffer, DecodeError>;
}

/// Decode error
#[derive(Debug, Clone, thiserror::Error)]
pub enum DecodeError {
    #[error("Empty resource")]
    Empty,

    #[error("Unsupported format: {0}")]
    Unsupported(String),

    #[error("No audio track found")]
    NoTrack,

    #[error("Missing stream parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Malformed stream: {0}")]
    Malformed(String),
}

/// Decoder for every format symphonia's default registry knows
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaDecoder;

impl Decoder for SymphoniaDecoder {
    fn decode(&self, bytes: Vec<u8>, hint: Option<&str>) -> Result<AudioBuffer, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        let size = bytes.len();

        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
        let mut format_hint = Hint::new();
        if let Some(ext) = hint {
            format_hint.with_extension(ext);
        }

        let opened = symphonia::default::get_probe()
            .format(&format_hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| DecodeError::Unsupported(e.to_string()))?;
        let mut format = opened.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoTrack)?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or(DecodeError::MissingParameter("sample rate"))?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Unsupported(e.to_string()))?;

        let mut channels: Vec<Vec<f32>> = Vec::new();
        let mut failures = 0;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(DecodeError::Malformed(e.to_string())),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    failures = 0;
                    append_planar(decoded, &mut channels);
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    failures += 1;
                    tracing::warn!("Skipping bad packet: {}", e);
                    if failures > MAX_DECODE_RETRIES {
                        return Err(DecodeError::Malformed(e.to_string()));
                    }
                }
                Err(e) => return Err(DecodeError::Malformed(e.to_string())),
            }
        }

        if channels.is_empty() {
            return Err(DecodeError::Malformed("no audio frames".into()));
        }

        let buffer = AudioBuffer::from_channels(channels, sample_rate as f32);
        tracing::debug!(
            "Decoded {} bytes: {} ch, {} Hz, {:.3}s",
            size,
            buffer.number_of_channels,
            sample_rate,
            buffer.duration()
        );
        Ok(buffer)
    }
}

/// Append one decoded packet to per-channel sample vectors
fn append_planar(decoded: AudioBufferRef<'_>, channels: &mut Vec<Vec<f32>>) {
    let spec = *decoded.spec();
    let frames = decoded.frames();
    if frames == 0 {
        return;
    }

    let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
    samples.copy_planar_ref(decoded);

    let count = spec.channels.count();
    if channels.len() < count {
        channels.resize_with(count, Vec::new);
    }
    for (channel, plane) in samples.samples().chunks(frames).take(count).enumerate() {
        channels[channel].extend_from_slice(plane);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav(sample_rate: u32, channels: u16, frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames * channels as usize {
                writer.write_sample(((i % 64) as i16 - 32) * 256).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_mono_wav() {
        let buffer = SymphoniaDecoder.decode(wav(8000, 1, 8000), Some("wav")).unwrap();
        assert_eq!(buffer.number_of_channels, 1);
        assert_eq!(buffer.sample_rate, 8000.0);
        assert!((buffer.duration() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_stereo_wav_without_hint() {
        let buffer = SymphoniaDecoder.decode(wav(16000, 2, 4000), None).unwrap();
        assert_eq!(buffer.number_of_channels, 2);
        assert!((buffer.duration() - 0.25).abs() < 1e-6);
        let left = buffer.get_channel_data(0).unwrap();
        assert!(left.iter().any(|s| *s != 0.0));
    }

    #[test]
    fn test_decode_empty() {
        assert!(matches!(SymphoniaDecoder.decode(Vec::new(), None), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_decode_garbage() {
        let result = SymphoniaDecoder.decode(b"definitely not audio".to_vec(), Some("mp3"));
        assert!(result.is_err());
    }
}
