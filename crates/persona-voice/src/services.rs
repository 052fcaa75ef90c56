//! External service seams: speech-to-text, response generation, text-to-speech.
//!
//! Providers implement these traits (see [`crate::providers`]); tests substitute
//! doubles. Every call made by the pipeline goes through [`retry`] so transient
//! failures are retried with exponential backoff at the network boundary.

use crate::audio::SynthesizedAudio;
use crate::config::RetryConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::history::HistoryEntry;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Transcribes one finalized utterance.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Return the transcript, or an empty string if nothing was recognized.
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> VoiceResult<String>;
}

/// Produces the persona's reply from a bounded history window.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn respond(
        &self,
        persona: &str,
        recent_history: &[HistoryEntry],
        user_text: &str,
    ) -> VoiceResult<String>;
}

/// Voice selection passed to text-to-speech providers.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSpec {
    pub voice: String,
    /// Preferred output rate. Providers with a fixed output format ignore it;
    /// the returned audio always states its real rate.
    pub sample_rate: u32,
}

impl VoiceSpec {
    pub fn new(voice: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            voice: voice.into(),
            sample_rate,
        }
    }
}

/// Turns reply text into audio.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    fn name(&self) -> &str;

    async fn synthesize(&self, text: &str, voice: &VoiceSpec) -> VoiceResult<SynthesizedAudio>;
}

/// Retry schedule for one network call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// Run `op`, retrying retryable errors with exponential backoff.
/// Non-retryable errors and the last failure are returned as-is.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> VoiceResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = VoiceResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    "{} failed, retrying in {:?} (attempt {}/{}): {}",
                    label, delay, attempt, policy.max_attempts, e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Preferred provider first, default provider on any failure.
#[derive(Clone)]
pub struct TtsChain {
    preferred: Option<Arc<dyn TextToSpeech>>,
    fallback: Arc<dyn TextToSpeech>,
}

impl TtsChain {
    pub fn new(fallback: Arc<dyn TextToSpeech>) -> Self {
        Self {
            preferred: None,
            fallback,
        }
    }

    pub fn with_preferred(mut self, preferred: Arc<dyn TextToSpeech>) -> Self {
        self.preferred = Some(preferred);
        self
    }

    pub async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceSpec,
        policy: RetryPolicy,
    ) -> VoiceResult<SynthesizedAudio> {
        if let Some(preferred) = &self.preferred {
            match retry(policy, preferred.name(), || preferred.synthesize(text, voice)).await {
                Ok(audio) => return Ok(audio),
                Err(e) => warn!(
                    "{} synthesis failed, falling back to {}: {}",
                    preferred.name(),
                    self.fallback.name(),
                    e
                ),
            }
        }
        retry(policy, self.fallback.name(), || self.fallback.synthesize(text, voice)).await
    }
}

/// Check that a provider returned something usable.
pub(crate) fn non_empty_audio(provider: &str, audio: SynthesizedAudio) -> VoiceResult<SynthesizedAudio> {
    if audio.bytes.is_empty() {
        return Err(VoiceError::Tts(format!("{provider} returned no audio")));
    }
    Ok(audio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 6,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(4000),
        };
        assert_eq!(p.backoff(1), Duration::from_millis(500));
        assert_eq!(p.backoff(2), Duration::from_millis(1000));
        assert_eq!(p.backoff(3), Duration::from_millis(2000));
        assert_eq!(p.backoff(5), Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_retry_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry(fast(), "stt", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(VoiceError::RateLimited { service: "stt" })
            } else {
                Ok("hello")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "hello");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_last_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: VoiceResult<()> = retry(fast(), "generation", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(VoiceError::RateLimited { service: "generation" })
        })
        .await;
        assert!(result.unwrap_err().is_rate_limited());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: VoiceResult<()> = retry(fast(), "stt", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(VoiceError::Stt("bad audio".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct FixedTts {
        name: &'static str,
        fail: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl TextToSpeech for FixedTts {
        fn name(&self) -> &str {
            self.name
        }

        async fn synthesize(&self, _text: &str, _voice: &VoiceSpec) -> VoiceResult<SynthesizedAudio> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(VoiceError::Tts(format!("{} down", self.name)))
            } else {
                Ok(SynthesizedAudio::pcm16(vec![0; 480], 24000))
            }
        }
    }

    #[tokio::test]
    async fn chain_falls_back_when_preferred_fails() {
        let premium = Arc::new(FixedTts { name: "premium", fail: true, calls: AtomicU32::new(0) });
        let default = Arc::new(FixedTts { name: "default", fail: false, calls: AtomicU32::new(0) });
        let chain = TtsChain::new(default.clone()).with_preferred(premium.clone());

        let audio = chain
            .synthesize("hi", &VoiceSpec::new("alloy", 24000), fast())
            .await
            .unwrap();
        assert_eq!(audio.bytes.len(), 480);
        assert_eq!(premium.calls.load(Ordering::SeqCst), 1);
        assert_eq!(default.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn chain_prefers_premium() {
        let premium = Arc::new(FixedTts { name: "premium", fail: false, calls: AtomicU32::new(0) });
        let default = Arc::new(FixedTts { name: "default", fail: false, calls: AtomicU32::new(0) });
        let chain = TtsChain::new(default.clone()).with_preferred(premium.clone());
        chain.synthesize("hi", &VoiceSpec::new("alloy", 24000), fast()).await.unwrap();
        assert_eq!(premium.calls.load(Ordering::SeqCst), 1);
        assert_eq!(default.calls.load(Ordering::SeqCst), 0);
    }
}
