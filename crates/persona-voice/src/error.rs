//! Error types for the persona voice pipeline

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Coarse classification used by the pipeline to pick retry vs. abandon vs. terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Microphone denied or missing. Fatal to the session, surfaced once.
    Permission,
    /// Rate limiting or temporary unavailability. Retried with backoff.
    Transient,
    /// Malformed or unsupported audio payload. That turn's speech is skipped.
    Decode,
    /// Duplex link closed or failed. Terminal for the session.
    Transport,
    /// Non-retryable error reported by an external service.
    Service,
    /// Local plumbing failure (channels, config, IO, state machine).
    Internal,
}

/// Errors that can occur in the voice pipeline
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Microphone unavailable: {0}")]
    MicrophoneUnavailable(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio stream error: {0}")]
    AudioStream(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Audio decode error: {0}")]
    Decode(String),

    #[error("{service} rate limited the request")]
    RateLimited { service: &'static str },

    #[error("{service} temporarily unavailable: {message}")]
    Unavailable {
        service: &'static str,
        message: String,
    },

    #[error("STT error: {0}")]
    Stt(String),

    #[error("Response generation error: {0}")]
    Generation(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Voice link error: {0}")]
    Transport(String),

    #[error("Voice link closed")]
    TransportClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("Illegal turn transition from {from} on {trigger}")]
    IllegalTransition {
        from: &'static str,
        trigger: &'static str,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VoiceError::MicrophoneUnavailable(_) => ErrorKind::Permission,
            VoiceError::RateLimited { .. } | VoiceError::Unavailable { .. } => ErrorKind::Transient,
            VoiceError::Decode(_) => ErrorKind::Decode,
            VoiceError::Transport(_) | VoiceError::TransportClosed => ErrorKind::Transport,
            VoiceError::Stt(_) | VoiceError::Generation(_) | VoiceError::Tts(_) => ErrorKind::Service,
            VoiceError::AudioDevice(_)
            | VoiceError::AudioStream(_)
            | VoiceError::Playback(_)
            | VoiceError::Config(_)
            | VoiceError::ChannelSend(_)
            | VoiceError::IllegalTransition { .. }
            | VoiceError::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether the network-call boundary should retry this error with backoff.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, VoiceError::RateLimited { .. })
    }

    /// Map a transport-level reqwest failure for `service` into the taxonomy.
    pub fn from_http(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            return VoiceError::Unavailable {
                service,
                message: err.to_string(),
            };
        }
        if err.status().map(|s| s.as_u16()) == Some(429) {
            return VoiceError::RateLimited { service };
        }
        match service {
            "stt" => VoiceError::Stt(err.to_string()),
            "tts" => VoiceError::Tts(err.to_string()),
            _ => VoiceError::Generation(err.to_string()),
        }
    }
}

impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for VoiceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        VoiceError::MicrophoneUnavailable(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::MicrophoneUnavailable(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

impl From<config::ConfigError> for VoiceError {
    fn from(err: config::ConfigError) -> Self {
        VoiceError::Config(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for VoiceError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        VoiceError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(VoiceError::RateLimited { service: "stt" }.is_retryable());
        assert!(VoiceError::Unavailable {
            service: "tts",
            message: "503".into()
        }
        .is_retryable());
        assert!(!VoiceError::Stt("bad request".into()).is_retryable());
        assert!(!VoiceError::Decode("garbage".into()).is_retryable());
    }

    #[test]
    fn taxonomy() {
        assert_eq!(VoiceError::MicrophoneUnavailable("denied".into()).kind(), ErrorKind::Permission);
        assert_eq!(VoiceError::TransportClosed.kind(), ErrorKind::Transport);
        assert_eq!(VoiceError::Decode("x".into()).kind(), ErrorKind::Decode);
        assert!(VoiceError::RateLimited { service: "generation" }.is_rate_limited());
    }
}
