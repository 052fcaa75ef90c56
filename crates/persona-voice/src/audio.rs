//! Audio frame primitives shared by capture, VAD, encoding and playback.
//!
//! Capture produces mono f32 frames (normalized to -1.0..1.0). The wire and the
//! STT upload both use 16-bit little-endian PCM; synthesized speech arrives either
//! as raw PCM16 or as a compressed container that rodio decodes.

use crate::error::{VoiceError, VoiceResult};
use std::io::Cursor;
use std::time::Duration;
use tokio::time::Instant;

/// A fixed-size block of mono samples at a known rate.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Audio samples (f32, normalized to -1.0 to 1.0)
    pub samples: Vec<f32>,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// When the frame was captured
    pub captured_at: Instant,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            captured_at: Instant::now(),
        }
    }

    /// Root-mean-square energy of the frame. Zero for an empty frame.
    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }

    pub fn duration(&self) -> Duration {
        samples_duration(self.samples.len(), self.sample_rate)
    }
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

fn samples_duration(len: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(len as f64 / sample_rate as f64)
}

/// Accumulates device callbacks of arbitrary length into fixed-size frames.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        Self {
            frame_size: frame_size.max(1),
            sample_rate,
            pending: Vec::with_capacity(frame_size.max(1)),
        }
    }

    /// Feed raw samples, calling `emit` for every completed frame in order.
    pub fn push(&mut self, data: &[f32], mut emit: impl FnMut(AudioFrame)) {
        for &sample in data {
            self.pending.push(sample);
            if self.pending.len() >= self.frame_size {
                let samples = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                emit(AudioFrame::new(samples, self.sample_rate));
            }
        }
    }

    /// Drop a partially filled frame (used when muting).
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Encode f32 samples as 16-bit little-endian PCM (clamped).
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode 16-bit little-endian PCM into normalized f32 samples.
pub fn decode_pcm16(bytes: &[u8]) -> VoiceResult<Vec<f32>> {
    if bytes.is_empty() {
        return Err(VoiceError::Decode("empty PCM payload".to_string()));
    }
    if bytes.len() % 2 != 0 {
        return Err(VoiceError::Decode(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect())
}

/// Wrap PCM16 mono bytes in a WAV container for upload.
pub fn wav_from_pcm16(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    let data_len = pcm.len() as u32;
    let mut buf = Vec::with_capacity(44 + pcm.len());
    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    // fmt subchunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    buf.extend_from_slice(&2u16.to_le_bytes()); // block align
    buf.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    // data subchunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    buf.extend_from_slice(pcm);
    buf
}

/// Mono samples ready for scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration(&self) -> Duration {
        samples_duration(self.samples.len(), self.sample_rate)
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration().as_secs_f64()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Format of a synthesized payload. Providers differ; the caller decodes either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioFormat {
    /// Raw 16-bit little-endian mono PCM.
    Pcm16 { sample_rate: u32 },
    /// A compressed or containerized payload (`audio/mpeg`, `audio/wav`, ...).
    Encoded { mime: String },
}

/// Audio bytes returned by a text-to-speech provider.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
}

impl SynthesizedAudio {
    pub fn pcm16(bytes: Vec<u8>, sample_rate: u32) -> Self {
        Self {
            bytes,
            format: AudioFormat::Pcm16 { sample_rate },
        }
    }

    pub fn encoded(bytes: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            bytes,
            format: AudioFormat::Encoded { mime: mime.into() },
        }
    }

    /// Decode into mono samples. Malformed or empty payloads are `Decode` errors.
    pub fn decode(&self) -> VoiceResult<DecodedAudio> {
        if self.bytes.is_empty() {
            return Err(VoiceError::Decode("empty synthesized payload".to_string()));
        }
        match &self.format {
            AudioFormat::Pcm16 { sample_rate } => {
                Ok(DecodedAudio::new(decode_pcm16(&self.bytes)?, *sample_rate))
            }
            AudioFormat::Encoded { mime } => decode_container(self.bytes.clone(), mime),
        }
    }
}

fn decode_container(bytes: Vec<u8>, mime: &str) -> VoiceResult<DecodedAudio> {
    use rodio::Source;

    let decoder = rodio::Decoder::new(Cursor::new(bytes))
        .map_err(|e| VoiceError::Decode(format!("{mime}: {e}")))?;
    let channels = decoder.channels().max(1) as usize;
    let sample_rate = decoder.sample_rate();
    let interleaved: Vec<f32> = decoder.convert_samples::<f32>().collect();
    if interleaved.is_empty() {
        return Err(VoiceError::Decode(format!("{mime}: no samples decoded")));
    }

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|c| c.iter().sum::<f32>() / c.len() as f32)
            .collect()
    };
    Ok(DecodedAudio::new(samples, sample_rate))
}

#[cfg(test)]
pub(crate) fn sine(freq: f32, amplitude: f32, len: usize, sample_rate: u32) -> Vec<f32> {
    (0..len)
        .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
        .collect()
}
