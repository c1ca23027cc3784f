//! # Audio Decoding
//!
//! Decodes uploaded audio into a 16 kHz mono f32 waveform. WAV uploads
//! are parsed from their header (any channel count and sample rate,
//! 8/16/24-bit integer or 32-bit float samples); anything without a RIFF
//! magic is treated as raw 16-bit little-endian PCM already at the
//! target rate.

use crate::error::{AsrError, AsrResult};
use byteorder::{ByteOrder, LittleEndian};
use std::io::Cursor;
use tracing::debug;

/// Sample rate the inference kernel expects.
pub const SAMPLE_RATE: u32 = 16_000;

/// Decode uploaded bytes into a 16 kHz mono waveform.
pub fn decode_upload(bytes: &[u8]) -> AsrResult<Vec<f32>> {
    if bytes.is_empty() {
        return Err(AsrError::BadRequest("Empty audio upload".to_string()));
    }

    if bytes.len() >= 4 && &bytes[..4] == b"RIFF" {
        decode_wav(bytes)
    } else {
        Ok(decode_raw_pcm(bytes))
    }
}

fn decode_wav(bytes: &[u8]) -> AsrResult<Vec<f32>> {
    let mut reader = Cursor::new(bytes);
    let (header, data) = wav::read(&mut reader)
        .map_err(|e| AsrError::BadRequest(format!("Invalid WAV file: {}", e)))?;

    let samples: Vec<f32> = match data {
        wav::BitDepth::Eight(samples) => samples
            .into_iter()
            .map(|s| (s as f32 - 128.0) / 128.0)
            .collect(),
        wav::BitDepth::Sixteen(samples) => {
            samples.into_iter().map(|s| s as f32 / 32768.0).collect()
        }
        wav::BitDepth::TwentyFour(samples) => samples
            .into_iter()
            .map(|s| s as f32 / 8_388_608.0)
            .collect(),
        wav::BitDepth::ThirtyTwoFloat(samples) => samples,
        wav::BitDepth::Empty => {
            return Err(AsrError::BadRequest("WAV file contains no samples".to_string()))
        }
    };

    let channels = header.channel_count.max(1) as usize;
    let mono = downmix(&samples, channels);

    debug!(
        channels,
        source_rate = header.sampling_rate,
        samples = mono.len(),
        "Decoded WAV upload"
    );

    Ok(resample(&mono, header.sampling_rate, SAMPLE_RATE))
}

/// Interpret bytes as raw 16-bit LE PCM at the target rate.
///
/// A trailing odd byte is dropped.
fn decode_raw_pcm(bytes: &[u8]) -> Vec<f32> {
    let n = bytes.len() / 2;
    let mut samples = Vec::with_capacity(n);
    for i in 0..n {
        let value = LittleEndian::read_i16(&bytes[i * 2..i * 2 + 2]);
        samples.push(value as f32 / 32768.0);
    }
    samples
}

/// Average interleaved channels down to mono.
fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Linear resampling. Identity when the rates already match.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let a = samples[idx];
        let b = samples.get(idx + 1).copied().unwrap_or(a);
        out.push(a + (b - a) * frac);
    }
    out
}
