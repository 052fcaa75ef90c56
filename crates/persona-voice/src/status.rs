//! Session status, events and end reasons surfaced to the UI layer

use serde::Serialize;
use std::fmt;

/// What the UI should show right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SessionStatus {
    /// Duplex link is being established.
    Connecting,
    Listening,
    /// A turn is being transcribed, answered or synthesized.
    Thinking,
    Speaking,
    /// Rate limited; listening resumes after the cooldown.
    RateLimited { retry_in_ms: u64 },
    /// Transient failure; the session returns to listening.
    Error(String),
    Muted,
    /// Normal end.
    Closed,
    /// Terminal failure (microphone denied, transport lost).
    Failed(String),
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Connecting => write!(f, "Connecting"),
            SessionStatus::Listening => write!(f, "Listening"),
            SessionStatus::Thinking => write!(f, "Thinking"),
            SessionStatus::Speaking => write!(f, "Speaking"),
            SessionStatus::RateLimited { retry_in_ms } => {
                write!(f, "Rate limited, waiting {}s", retry_in_ms.div_ceil(1000))
            }
            SessionStatus::Error(msg) => write!(f, "Error: {msg}"),
            SessionStatus::Muted => write!(f, "Muted"),
            SessionStatus::Closed => write!(f, "Closed"),
            SessionStatus::Failed(msg) => write!(f, "Failed: {msg}"),
        }
    }
}

/// Discrete happenings, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Status(SessionStatus),
    SpeechStarted,
    /// Local barge-in cancelled `cancelled` playback segments.
    BargeIn { cancelled: usize },
    /// Remote interruption cancelled `cancelled` playback segments.
    RemoteInterrupted { cancelled: usize },
    /// A finalized turn was dropped before reaching a reply.
    TurnDiscarded { reason: String },
    UserTranscript { text: String },
    ModelReply { text: String },
    /// The last scheduled segment played out.
    AvatarFinishedSpeaking,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SessionEnd {
    /// `stop()` was called or the handle dropped.
    Stopped,
    /// The duplex link closed normally.
    RemoteClosed,
    /// The duplex link failed.
    TransportFailed(String),
    /// The microphone could not be acquired.
    MicrophoneDenied(String),
    /// The session task panicked or was aborted.
    Crashed(String),
}

impl SessionEnd {
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionEnd::Stopped | SessionEnd::RemoteClosed => SessionStatus::Closed,
            SessionEnd::TransportFailed(msg) => SessionStatus::Failed(format!("voice link lost: {msg}")),
            SessionEnd::MicrophoneDenied(msg) => SessionStatus::Failed(format!("microphone unavailable: {msg}")),
            SessionEnd::Crashed(msg) => SessionStatus::Failed(format!("session crashed: {msg}")),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SessionEnd::TransportFailed(_) | SessionEnd::MicrophoneDenied(_) | SessionEnd::Crashed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failure_is_distinct_from_closure() {
        assert_eq!(SessionEnd::RemoteClosed.status(), SessionStatus::Closed);
        assert!(matches!(
            SessionEnd::TransportFailed("reset".into()).status(),
            SessionStatus::Failed(_)
        ));
        assert!(!SessionEnd::Stopped.is_failure());
        assert!(SessionEnd::MicrophoneDenied("no".into()).is_failure());
        assert!(SessionEnd::Crashed("panic".into()).is_failure());
    }

    #[test]
    fn statuses_read_naturally() {
        assert_eq!(SessionStatus::RateLimited { retry_in_ms: 10_000 }.to_string(), "Rate limited, waiting 10s");
        assert_eq!(SessionStatus::Listening.to_string(), "Listening");
        let json = serde_json::to_value(SessionStatus::RateLimited { retry_in_ms: 5 }).unwrap();
        assert_eq!(json["status"], "rate_limited");
    }
}
