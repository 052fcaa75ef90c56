//! Energy-based Voice Activity Detection
//!
//! Each frame's RMS energy is compared against a fixed threshold. Speech after
//! silence emits `SpeechStarted` (the barge-in trigger). Silence that outlasts
//! `silence_ms` arms a short confirmation timer; when it expires without new
//! speech, `SilenceConfirmed` fires exactly once.
//!
//! The detector holds no timer of its own. The owner arms a sleep on
//! [`EnergyVad::pending_deadline`] and calls [`EnergyVad::poll`] when it elapses,
//! so frame evaluation and timer expiry mutate the state from one task only.

use crate::audio::AudioFrame;
use crate::config::VadConfig;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Boundary events emitted by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// Energy rose above the threshold after silence.
    SpeechStarted,
    /// Silence after speech outlasted the silence duration plus confirmation delay.
    SilenceConfirmed,
}

/// Speaking/silent state machine for one session.
#[derive(Debug)]
pub struct EnergyVad {
    threshold: f32,
    silence: Duration,
    confirm: Duration,

    is_speaking: bool,
    last_speech: Option<Instant>,
    pending_silence: Option<Instant>,
}

impl EnergyVad {
    pub fn new(config: &VadConfig) -> Self {
        info!(
            "🎙️ Energy VAD (threshold: {}, silence: {}ms, confirm: {}ms)",
            config.threshold, config.silence_ms, config.confirm_ms
        );
        Self {
            threshold: config.threshold,
            silence: config.silence(),
            confirm: config.confirm(),
            is_speaking: false,
            last_speech: None,
            pending_silence: None,
        }
    }

    /// Evaluate one captured frame at its capture time.
    pub fn observe_frame(&mut self, frame: &AudioFrame) -> Option<VadEvent> {
        self.observe(frame.rms(), frame.captured_at)
    }

    /// Evaluate one frame's RMS energy at `now`.
    pub fn observe(&mut self, energy: f32, now: Instant) -> Option<VadEvent> {
        if energy > self.threshold {
            let started = !self.is_speaking;
            self.is_speaking = true;
            self.last_speech = Some(now);
            self.pending_silence = None;
            if started {
                debug!(energy, "speech started");
                return Some(VadEvent::SpeechStarted);
            }
            return None;
        }

        if !self.is_speaking {
            return None;
        }

        if self.pending_silence.is_some() {
            return self.poll(now);
        }

        let elapsed = self
            .last_speech
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default();
        if elapsed > self.silence {
            let deadline = now + self.confirm;
            debug!(elapsed_ms = elapsed.as_millis() as u64, "silence timer armed");
            self.pending_silence = Some(deadline);
            return self.poll(now);
        }
        None
    }

    /// Fire the confirmation timer if it has expired by `now`.
    pub fn poll(&mut self, now: Instant) -> Option<VadEvent> {
        match self.pending_silence {
            Some(deadline) if now >= deadline => {
                self.pending_silence = None;
                self.is_speaking = false;
                debug!("silence confirmed");
                Some(VadEvent::SilenceConfirmed)
            }
            _ => None,
        }
    }

    /// Deadline of the armed confirmation timer, if any.
    pub fn pending_deadline(&self) -> Option<Instant> {
        self.pending_silence
    }

    pub fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    /// Forget speech and disarm the timer (mute, session restart).
    pub fn reset(&mut self) {
        self.is_speaking = false;
        self.last_speech = None;
        self.pending_silence = None;
    }
}
