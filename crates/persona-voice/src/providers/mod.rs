//! HTTP implementations of the service seams.
//!
//! - [`openai`]: OpenAI-compatible STT, chat completion and raw-PCM TTS (default voice).
//! - [`elevenlabs`]: ElevenLabs MP3 TTS (premium voice).
//!
//! Status mapping shared by all providers: 429 is `RateLimited`, 5xx is
//! `Unavailable` (both retried), anything else non-2xx is the per-service error.

pub mod elevenlabs;
pub mod openai;

pub use elevenlabs::ElevenLabsTts;
pub use openai::{OpenAiChat, OpenAiStt, OpenAiTts};

use crate::error::{VoiceError, VoiceResult};
use reqwest::StatusCode;
use std::time::Duration;

pub(crate) fn http_client(service: &'static str, timeout: Duration) -> VoiceResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| VoiceError::from_http(service, e))
}

/// First set environment variable among `names`.
pub(crate) fn env_key(names: &[&str]) -> VoiceResult<String> {
    names
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()))
        .ok_or_else(|| VoiceError::Config(format!("missing credentials: set one of {}", names.join(", "))))
}

pub(crate) fn status_error(service: &'static str, status: StatusCode, body: &str) -> VoiceError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return VoiceError::RateLimited { service };
    }
    if status.is_server_error() {
        return VoiceError::Unavailable {
            service,
            message: format!("{status}: {body}"),
        };
    }
    let message = format!("{service} API error {status}: {body}");
    match service {
        "stt" => VoiceError::Stt(message),
        "tts" => VoiceError::Tts(message),
        _ => VoiceError::Generation(message),
    }
}

/// Pass successful responses through, map the rest with [`status_error`].
pub(crate) async fn check_status(
    service: &'static str,
    response: reqwest::Response,
) -> VoiceResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(service, status, &body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_into_the_taxonomy() {
        assert!(status_error("stt", StatusCode::TOO_MANY_REQUESTS, "").is_rate_limited());
        assert!(status_error("tts", StatusCode::SERVICE_UNAVAILABLE, "busy").is_retryable());
        let e = status_error("stt", StatusCode::BAD_REQUEST, "bad file");
        assert!(matches!(e, VoiceError::Stt(_)));
        assert!(!e.is_retryable());
        assert!(matches!(
            status_error("generation", StatusCode::UNAUTHORIZED, ""),
            VoiceError::Generation(_)
        ));
    }

    #[test]
    fn missing_keys_are_config_errors() {
        let err = env_key(&["PERSONA_VOICE_TEST_KEY_THAT_IS_NEVER_SET"]).unwrap_err();
        assert!(matches!(err, VoiceError::Config(_)));
    }
}
