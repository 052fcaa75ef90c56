//! Lip-sync driver
//!
//! On every visual tick the driver takes the window of samples currently audible
//! on the playback timeline, runs it through a byte-spectrum analyser and maps the
//! average bin energy to a `talking` flag and a playback-rate multiplier.
//!
//! The analyser mirrors a browser `AnalyserNode`: Hann window, magnitude scaled by
//! 1/N, exponential smoothing across ticks, then decibels mapped linearly from
//! [-100 dB, -30 dB] onto 0..=255.

use crate::config::LipSyncConfig;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::Serialize;
use std::sync::Arc;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// One visual update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LipSyncFrame {
    /// Mouth/video should animate.
    pub talking: bool,
    /// Video playback-rate multiplier (1.0 when idle).
    pub playback_rate: f32,
    /// Average byte-spectrum energy, 0..=255.
    pub energy: f32,
}

impl LipSyncFrame {
    pub fn idle() -> Self {
        Self {
            talking: false,
            playback_rate: 1.0,
            energy: 0.0,
        }
    }
}

impl Default for LipSyncFrame {
    fn default() -> Self {
        Self::idle()
    }
}

pub fn hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / len as f32).cos()))
        .collect()
}

/// Smoothed byte spectrum over a fixed FFT size.
pub struct SpectrumAnalyser {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothing: f32,
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl SpectrumAnalyser {
    pub fn new(fft_size: usize, smoothing: f32) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        Self {
            fft: planner.plan_fft_forward(fft_size),
            window: hann_window(fft_size),
            smoothing,
            smoothed: vec![0.0; fft_size / 2],
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.window.len()
    }

    /// Analyse `samples` (zero-padded or truncated to the FFT size) and return
    /// the byte spectrum of the first N/2 bins.
    pub fn byte_frequency_data(&mut self, samples: &[f32]) -> Vec<u8> {
        let n = self.window.len();
        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let s = samples.get(i).copied().unwrap_or(0.0);
            *slot = Complex::new(s * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let scale = 1.0 / n as f32;
        self.smoothed
            .iter_mut()
            .zip(self.scratch.iter())
            .map(|(prev, bin)| {
                let magnitude = bin.norm() * scale;
                *prev = self.smoothing * *prev + (1.0 - self.smoothing) * magnitude;
                to_byte(*prev)
            })
            .collect()
    }

    /// Average of the byte spectrum, 0..=255.
    pub fn average_energy(&mut self, samples: &[f32]) -> f32 {
        let bytes = self.byte_frequency_data(samples);
        if bytes.is_empty() {
            return 0.0;
        }
        bytes.iter().map(|&b| b as f32).sum::<f32>() / bytes.len() as f32
    }

    /// Forget smoothing history.
    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|v| *v = 0.0);
    }
}

fn to_byte(magnitude: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
    scaled.clamp(0.0, 255.0) as u8
}

/// Maps audible energy to avatar animation on a fixed cadence.
pub struct LipSyncDriver {
    analyser: SpectrumAnalyser,
    threshold: f32,
    rate_divisor: f32,
    max_playback_rate: f32,
}

impl LipSyncDriver {
    pub fn new(config: &LipSyncConfig) -> Self {
        Self {
            analyser: SpectrumAnalyser::new(config.fft_size, config.smoothing),
            threshold: config.threshold,
            rate_divisor: config.rate_divisor,
            max_playback_rate: config.max_playback_rate,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.analyser.fft_size()
    }

    /// One tick. `audible` is `None` when nothing is playing; the driver then
    /// idles instead of failing.
    pub fn tick(&mut self, audible: Option<&[f32]>) -> LipSyncFrame {
        let Some(samples) = audible else {
            self.analyser.reset();
            return LipSyncFrame::idle();
        };

        let energy = self.analyser.average_energy(samples);
        if energy > self.threshold {
            LipSyncFrame {
                talking: true,
                playback_rate: (1.0 + energy / self.rate_divisor).min(self.max_playback_rate),
                energy,
            }
        } else {
            LipSyncFrame {
                talking: false,
                playback_rate: 1.0,
                energy,
            }
        }
    }

    /// Drop smoothing state so the next tick reflects a cancelled output at once.
    pub fn reset(&mut self) {
        self.analyser.reset();
    }
}

#[cfg(test)]
pub(crate) fn noise(amplitude: f32, len: usize, seed: u32) -> Vec<f32> {
    let mut state = seed.max(1);
    (0..len)
        .map(|_| {
            // xorshift32
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            amplitude * ((state as f32 / u32::MAX as f32) * 2.0 - 1.0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> LipSyncDriver {
        LipSyncDriver::new(&LipSyncConfig::default())
    }

    #[test]
    fn idle_tick_without_audio() {
        let mut d = driver();
        for _ in 0..10 {
            assert_eq!(d.tick(None), LipSyncFrame::idle());
        }
    }

    #[test]
    fn silence_is_not_talking() {
        let mut d = driver();
        let frame = d.tick(Some(&[0.0; 256]));
        assert!(!frame.talking);
        assert_eq!(frame.energy, 0.0);
        assert_eq!(frame.playback_rate, 1.0);
    }

    #[test]
    fn loud_audio_talks_with_bounded_rate() {
        let mut d = driver();
        let samples = noise(0.3, 256, 7);
        let mut frame = LipSyncFrame::idle();
        for _ in 0..5 {
            frame = d.tick(Some(&samples));
        }
        assert!(frame.talking, "energy was {}", frame.energy);
        assert!(frame.playback_rate > 1.0);
        assert!(frame.playback_rate <= 2.0);
        assert!((frame.playback_rate - (1.0 + frame.energy / 300.0)).abs() < 1e-4);
    }

    #[test]
    fn rate_is_capped() {
        let config = LipSyncConfig {
            rate_divisor: 1.0,
            max_playback_rate: 1.5,
            ..LipSyncConfig::default()
        };
        let mut d = LipSyncDriver::new(&config);
        let frame = d.tick(Some(&noise(0.5, 256, 3)));
        assert!(frame.talking);
        assert_eq!(frame.playback_rate, 1.5);
    }

    #[test]
    fn byte_mapping_bounds() {
        assert_eq!(to_byte(0.0), 0);
        assert_eq!(to_byte(1e-6), 0); // -120 dB
        assert_eq!(to_byte(1.0), 255); // 0 dB
        let mid = to_byte(10f32.powf(-65.0 / 20.0));
        assert!((126..=128).contains(&mid), "mid was {mid}");
    }

    #[test]
    fn hann_window_shape() {
        let w = hann_window(256);
        assert!(w[0].abs() < 1e-6);
        assert!((w[128] - 1.0).abs() < 1e-6);
    }
}
