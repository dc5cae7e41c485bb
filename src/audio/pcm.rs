// PCM wire codec for the live service
//
// Outbound audio is float32 microphone samples packed as little-endian
// 16-bit PCM and base64-encoded. Inbound audio is the same wire format at
// the output rate, decoded back into normalized float samples.

use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mime type prefix shared by every PCM payload
pub const PCM_MIME_PREFIX: &str = "audio/pcm";

/// Scale between normalized float samples and 16-bit PCM
const I16_SCALE: f32 = 32768.0;

/// Encoded audio payload, as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedAudioBlob {
    /// Base64-encoded little-endian 16-bit PCM bytes
    pub data: String,
    /// e.g. "audio/pcm;rate=16000"
    pub mime_type: String,
}

/// Decoded audio ready for playback
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    /// Normalized samples in [-1.0, 1.0], interleaved when `channels > 1`
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmBuffer {
    /// Number of sample frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / f64::from(self.sample_rate)
    }

    /// Samples of the first channel
    pub fn first_channel(&self) -> impl Iterator<Item = f32> + '_ {
        self.samples
            .iter()
            .step_by(self.channels.max(1) as usize)
            .copied()
    }
}

/// Why an inbound chunk could not be decoded
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload is not valid base64: {0}")]
    InvalidBase64(String),

    #[error("truncated PCM frame: {len} bytes is not a whole number of samples")]
    TruncatedFrame { len: usize },

    #[error("unsupported mime type: {0}")]
    UnsupportedMimeType(String),
}

/// Mime type for 16-bit PCM at the given rate
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("{};rate={}", PCM_MIME_PREFIX, sample_rate)
}

/// Sample rate advertised by a PCM mime type, if any
pub fn mime_sample_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
}

/// Convert one float sample to 16-bit PCM, clamping out-of-range input
pub fn f32_to_i16(sample: f32) -> i16 {
    // NaN falls through both clamps and casts to 0
    (sample.clamp(-1.0, 1.0) * I16_SCALE)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Convert one 16-bit PCM sample to a normalized float
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / I16_SCALE
}

/// Encode float samples as a base64 PCM blob tagged with `sample_rate`
///
/// Never fails: out-of-range samples are clipped.
pub fn encode_pcm(samples: &[f32], sample_rate: u32) -> EncodedAudioBlob {
    let pcm_bytes: Vec<u8> = samples
        .iter()
        .flat_map(|&s| f32_to_i16(s).to_le_bytes())
        .collect();

    EncodedAudioBlob {
        data: base64::engine::general_purpose::STANDARD.encode(pcm_bytes),
        mime_type: pcm_mime_type(sample_rate),
    }
}

/// Decode raw little-endian 16-bit PCM bytes at `sample_rate`
pub fn decode_pcm(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<PcmBuffer, DecodeError> {
    let frame_bytes = 2 * channels.max(1) as usize;
    if bytes.len() % frame_bytes != 0 {
        return Err(DecodeError::TruncatedFrame { len: bytes.len() });
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16_to_f32(i16::from_le_bytes([pair[0], pair[1]])))
        .collect();

    Ok(PcmBuffer {
        samples,
        sample_rate,
        channels: channels.max(1),
    })
}

/// Decode a wire blob into a playable buffer at `sample_rate`
pub fn decode_blob(blob: &EncodedAudioBlob, sample_rate: u32) -> Result<PcmBuffer, DecodeError> {
    if !blob.mime_type.starts_with(PCM_MIME_PREFIX) {
        return Err(DecodeError::UnsupportedMimeType(blob.mime_type.clone()));
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&blob.data)
        .map_err(|e| DecodeError::InvalidBase64(e.to_string()))?;

    decode_pcm(&bytes, sample_rate, 1)
}
