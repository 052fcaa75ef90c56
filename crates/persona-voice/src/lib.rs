//! # Persona Voice - Real-time Duplex Voice Pipeline
//!
//! Lets a user talk to an avatar persona by voice. Microphone audio is segmented
//! locally by an energy VAD; replies are scheduled gaplessly on an output timeline
//! and drive a lip-sync visual from their spectral energy. User speech over the
//! avatar (barge-in) or a remote interruption cancels playback at once.
//!
//! Two modes share one session core:
//!
//! - **Batch**: record, transcribe, respond, synthesize, speak.
//! - **Duplex**: stream PCM to a remote voice model that owns turn-taking.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                          Voice Session                             │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────────┐  │
//! │  │   Audio In   │→ │  Energy VAD  │→ │ Turn Pipeline (batch)    │  │
//! │  │    (cpal)    │  │ (RMS, 2s gap)│  │ STT → Generate → TTS     │  │
//! │  └──────────────┘  └──────────────┘  └──────────────────────────┘  │
//! │         │                 │ barge-in             │                 │
//! │         ↓                 ↓                      ↓                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────────┐  │
//! │  │  Voice Link  │→ │   Playback   │→ │ Lip-Sync (FFT energy)    │  │
//! │  │ (duplex, ws) │  │  Scheduler   │  │ talking + playback rate  │  │
//! │  └──────────────┘  └──────────────┘  └──────────────────────────┘  │
//! └────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod capture;
pub mod config;
pub mod duplex;
pub mod error;
pub mod history;
pub mod lipsync;
pub mod playback;
pub mod providers;
pub mod services;
pub mod session;
pub mod status;
pub mod turn;
pub mod vad;

pub use audio::{AudioFormat, AudioFrame, DecodedAudio, SynthesizedAudio};
pub use capture::{CaptureController, CpalMicrophone, MicrophoneSource, PushMicrophone};
pub use config::{ReplyAudioSource, SessionMode, VoiceConfig};
pub use duplex::{ChannelConnector, DuplexConnector, DuplexLink, LinkEvent, LinkSetup, RemoteEnd, WebSocketConnector};
pub use error::{ErrorKind, VoiceError, VoiceResult};
pub use history::{ConversationHistory, HistoryEntry, Role};
pub use lipsync::{LipSyncDriver, LipSyncFrame};
pub use playback::{
    AudioOutput, ManualClock, MonotonicClock, OutputClock, PlaybackScheduler, RodioOutput, SilentOutput, SlotPolicy,
};
pub use providers::{ElevenLabsTts, OpenAiChat, OpenAiStt, OpenAiTts};
pub use services::{ResponseGenerator, RetryPolicy, SpeechToText, TextToSpeech, TtsChain, VoiceSpec};
pub use session::{PlaybackState, SessionDevices, SessionHandle, SessionServices, VoiceSession};
pub use status::{SessionEnd, SessionEvent, SessionStatus};
pub use turn::{TurnStage, TurnTrigger};
pub use vad::{EnergyVad, VadEvent};
