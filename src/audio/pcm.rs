//! PCM16 codec
//!
//! Little-endian 16-bit samples on the wire, normalized `f32` inside the
//! audio graph. Everything here is pure and safe to call from the render
//! callback.

use base64::Engine;

use crate::error::PcmError;

/// Bytes per PCM16 sample
pub const SAMPLE_WIDTH: usize = 2;

/// Serialize samples as little-endian bytes
pub fn encode_pcm(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Parse little-endian bytes back into samples.
///
/// Exact inverse of [`encode_pcm`].
pub fn decode_pcm(bytes: &[u8]) -> Result<Vec<i16>, PcmError> {
    if bytes.len() % SAMPLE_WIDTH != 0 {
        return Err(PcmError::OddLength(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(SAMPLE_WIDTH)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Convert one normalized sample, clamping first so out-of-range input
/// saturates instead of wrapping.
#[inline]
pub fn sample_to_pcm16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

pub fn float32_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples.iter().copied().map(sample_to_pcm16).collect()
}

pub fn pcm16_to_float32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// PCM16 samples → base64 string for the `data` field
pub fn encode_base64_pcm(samples: &[i16]) -> String {
    base64::engine::general_purpose::STANDARD.encode(encode_pcm(samples))
}

/// `data` field → PCM16 samples
pub fn decode_base64_pcm(data: &str) -> Result<Vec<i16>, PcmError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| PcmError::Base64(e.to_string()))?;
    decode_pcm(&bytes)
}

/// Duration in seconds of `sample_count` mono samples
pub fn duration_secs(sample_count: usize, sample_rate: u32) -> f64 {
    sample_count as f64 / sample_rate as f64
}
