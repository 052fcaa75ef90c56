//! Session configuration.
//!
//! Loaded from an optional TOML file layered under `PERSONA_VOICE__*` environment
//! variables. Every section falls back to defaults so an empty environment yields a
//! working batch-mode session.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | PERSONA_VOICE_CONFIG | config/persona-voice.toml | Path of the TOML file (optional). |
//! | PERSONA_VOICE__MODE | batch | `batch` (turn-based) or `duplex` (streaming). |
//! | PERSONA_VOICE__VAD__THRESHOLD | 0.02 | RMS above this counts as speech. |
//! | PERSONA_VOICE__VAD__SILENCE_MS | 2000 | Silence after speech before confirmation is armed. |
//! | PERSONA_VOICE__TURN__HISTORY_WINDOW | 10 | Past turns (question + reply) forwarded to response generation. |

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config/persona-voice.toml";

/// Which controller variant drives the session. Fixed for the session lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Record, transcribe, respond, synthesize, speak.
    #[default]
    #[serde(alias = "batch_turn")]
    Batch,
    /// Persistent bidirectional stream; the remote side owns turn-taking.
    #[serde(alias = "duplex_stream")]
    Duplex,
}

/// Where duplex replies get their audio from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyAudioSource {
    /// Play audio frames streamed by the remote endpoint.
    #[default]
    Native,
    /// Ignore streamed audio; synthesize the transcript on turn completion.
    Synthesized,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    /// System persona description handed to response generation.
    pub description: String,
    /// Voice name passed to TTS providers and the duplex setup.
    pub voice: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            description: "You are a friendly conversational persona. Keep replies short and spoken-style."
                .to_string(),
            voice: "alloy".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Microphone sample rate in Hz (default: 16000)
    pub sample_rate: u32,
    /// Samples per frame delivered to VAD and sinks (default: 480 = 30ms at 16kHz)
    pub frame_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_size: 480,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// RMS threshold on normalized [-1, 1] samples (default: 0.02)
    pub threshold: f32,
    /// Silence after speech before the confirmation timer is armed (default: 2000ms)
    pub silence_ms: u64,
    /// Confirmation delay before SilenceConfirmed fires (default: 100ms)
    pub confirm_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.02,
            silence_ms: 2000,
            confirm_ms: 100,
        }
    }
}

impl VadConfig {
    pub fn silence(&self) -> Duration {
        Duration::from_millis(self.silence_ms)
    }

    pub fn confirm(&self) -> Duration {
        Duration::from_millis(self.confirm_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Turns with less voiced audio than this never reach STT (default: 250ms)
    pub min_utterance_ms: u64,
    /// Transcripts shorter than this are discarded (default: 2 chars)
    pub min_transcript_chars: usize,
    /// Past turns, each a user entry and its replies, forwarded to response generation (default: 10)
    pub history_window: usize,
    /// Most recent audio kept in the turn buffer (default: 30s)
    pub max_buffer_ms: u64,
    /// Wait after exhausted rate-limit retries before listening again (default: 10s)
    pub rate_limit_cooldown_ms: u64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            min_utterance_ms: 250,
            min_transcript_chars: 2,
            history_window: 10,
            max_buffer_ms: 30_000,
            rate_limit_cooldown_ms: 10_000,
        }
    }
}

impl TurnConfig {
    pub fn min_utterance(&self) -> Duration {
        Duration::from_millis(self.min_utterance_ms)
    }

    pub fn max_buffer(&self) -> Duration {
        Duration::from_millis(self.max_buffer_ms)
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_millis(self.rate_limit_cooldown_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Sample rate of streamed reply audio in Hz (default: 24000)
    pub sample_rate: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { sample_rate: 24000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LipSyncConfig {
    /// Visual update period (default: 16ms, ~60 Hz)
    pub tick_ms: u64,
    /// Analyser FFT size, power of two (default: 256)
    pub fft_size: usize,
    /// Temporal smoothing of bin magnitudes, 0..1 (default: 0.8)
    pub smoothing: f32,
    /// Average byte energy above which the avatar is talking (default: 10)
    pub threshold: f32,
    /// Playback rate is `1 + energy / rate_divisor` (default: 300)
    pub rate_divisor: f32,
    /// Upper bound on the playback rate multiplier (default: 2.0)
    pub max_playback_rate: f32,
}

impl Default for LipSyncConfig {
    fn default() -> Self {
        Self {
            tick_ms: 16,
            fft_size: 256,
            smoothing: 0.8,
            threshold: 10.0,
            rate_divisor: 300.0,
            max_playback_rate: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per network call including the first (default: 3)
    pub max_attempts: u32,
    /// First backoff, doubled each retry (default: 500ms)
    pub initial_backoff_ms: u64,
    /// Backoff ceiling (default: 4000ms)
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 4000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplexConfig {
    /// WebSocket endpoint of the bidirectional voice service.
    pub endpoint: String,
    /// Model requested in the setup message.
    pub model: String,
    /// Whether replies play streamed audio or a synthesized transcript.
    pub reply_audio: ReplyAudioSource,
}

impl Default for DuplexConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            model: "models/gemini-2.0-flash-exp".to_string(),
            reply_audio: ReplyAudioSource::Native,
        }
    }
}

/// Complete session configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub mode: SessionMode,
    pub persona: PersonaConfig,
    pub capture: CaptureConfig,
    pub vad: VadConfig,
    pub turn: TurnConfig,
    pub playback: PlaybackConfig,
    pub lipsync: LipSyncConfig,
    pub retry: RetryConfig,
    pub duplex: DuplexConfig,
}

impl VoiceConfig {
    /// Load config from file and environment. Precedence: env `PERSONA_VOICE__*` >
    /// file at `PERSONA_VOICE_CONFIG` (or `config/persona-voice.toml`) > defaults.
    pub fn load() -> VoiceResult<Self> {
        let config_path =
            std::env::var("PERSONA_VOICE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let builder = config::Config::builder();

        let path = Path::new(&config_path);
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("PERSONA_VOICE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = built.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> VoiceResult<()> {
        if self.capture.sample_rate == 0 || self.playback.sample_rate == 0 {
            return Err(VoiceError::Config("sample rates must be non-zero".to_string()));
        }
        if self.capture.frame_size == 0 {
            return Err(VoiceError::Config("capture.frame_size must be non-zero".to_string()));
        }
        if !(self.vad.threshold > 0.0 && self.vad.threshold < 1.0) {
            return Err(VoiceError::Config(format!(
                "vad.threshold must be within (0, 1), got {}",
                self.vad.threshold
            )));
        }
        if !self.lipsync.fft_size.is_power_of_two() || self.lipsync.fft_size < 32 {
            return Err(VoiceError::Config(format!(
                "lipsync.fft_size must be a power of two >= 32, got {}",
                self.lipsync.fft_size
            )));
        }
        if !(0.0..1.0).contains(&self.lipsync.smoothing) {
            return Err(VoiceError::Config("lipsync.smoothing must be within [0, 1)".to_string()));
        }
        if self.lipsync.tick_ms == 0 || self.lipsync.rate_divisor <= 0.0 {
            return Err(VoiceError::Config(
                "lipsync.tick_ms and lipsync.rate_divisor must be positive".to_string(),
            ));
        }
        if self.turn.history_window == 0 {
            return Err(VoiceError::Config("turn.history_window must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(VoiceError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tuned_values() {
        let c = VoiceConfig::default();
        assert_eq!(c.mode, SessionMode::Batch);
        assert!((c.vad.threshold - 0.02).abs() < 1e-6);
        assert_eq!(c.vad.silence_ms, 2000);
        assert_eq!(c.vad.confirm_ms, 100);
        assert_eq!(c.capture.sample_rate, 16000);
        assert_eq!(c.playback.sample_rate, 24000);
        assert!((c.lipsync.threshold - 10.0).abs() < 1e-6);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn turn_durations() {
        let turn = TurnConfig::default();
        assert_eq!(turn.min_utterance(), Duration::from_millis(250));
        assert_eq!(turn.max_buffer(), Duration::from_secs(30));
        assert_eq!(turn.rate_limit_cooldown(), Duration::from_secs(10));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut c = VoiceConfig::default();
        c.vad.threshold = 1.5;
        assert!(c.validate().is_err());

        let mut c = VoiceConfig::default();
        c.lipsync.fft_size = 300;
        assert!(c.validate().is_err());

        let mut c = VoiceConfig::default();
        c.turn.history_window = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn mode_parses_from_toml() {
        let parsed: VoiceConfig = toml_like("mode = \"duplex\"\n[vad]\nthreshold = 0.05\n");
        assert_eq!(parsed.mode, SessionMode::Duplex);
        assert!((parsed.vad.threshold - 0.05).abs() < 1e-6);
        assert_eq!(parsed.vad.silence_ms, 2000);
    }

    #[test]
    fn example_file_is_valid() {
        let parsed = toml_like(include_str!("../../../config/persona-voice.example.toml"));
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.mode, SessionMode::Batch);
        assert_eq!(parsed.duplex.reply_audio, ReplyAudioSource::Native);
        assert_eq!(parsed.turn.min_utterance_ms, 250);
        assert!(parsed.persona.description.starts_with("You are Nova"));
    }

    fn toml_like(src: &str) -> VoiceConfig {
        config::Config::builder()
            .add_source(config::File::from_str(src, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }
}
