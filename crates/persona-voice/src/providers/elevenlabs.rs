//! ElevenLabs text-to-speech (premium voice, MP3 output).
//!
//! Env: `ELEVENLABS_API_KEY`, `ELEVENLABS_VOICE_ID` (overrides the persona voice),
//! `ELEVENLABS_MODEL` (default eleven_turbo_v2_5).

use super::{check_status, env_key, http_client};
use crate::audio::SynthesizedAudio;
use crate::error::{VoiceError, VoiceResult};
use crate::services::{non_empty_audio, TextToSpeech, VoiceSpec};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

const API_BASE: &str = "https://api.elevenlabs.io";
const XI_API_KEY_HEADER: &str = "xi-api-key";

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Debug, Clone)]
pub struct ElevenLabsTts {
    base_url: String,
    api_key: String,
    model: String,
    voice_id: Option<String>,
    client: reqwest::Client,
}

impl ElevenLabsTts {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> VoiceResult<Self> {
        Ok(Self {
            base_url: API_BASE.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            voice_id: None,
            client: http_client("tts", Duration::from_secs(60))?,
        })
    }

    pub fn from_env() -> VoiceResult<Self> {
        let api_key = env_key(&["ELEVENLABS_API_KEY"])?;
        let model = std::env::var("ELEVENLABS_MODEL").unwrap_or_else(|_| "eleven_turbo_v2_5".to_string());
        let mut tts = Self::new(api_key, model)?;
        tts.voice_id = std::env::var("ELEVENLABS_VOICE_ID").ok();
        Ok(tts)
    }

    /// Pin a voice id instead of using the persona's voice name.
    pub fn with_voice_id(mut self, voice_id: impl Into<String>) -> Self {
        self.voice_id = Some(voice_id.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self, voice: &VoiceSpec) -> String {
        let voice_id = self.voice_id.as_deref().unwrap_or(&voice.voice);
        format!(
            "{}/v1/text-to-speech/{}?output_format=mp3_44100_128",
            self.base_url.trim_end_matches('/'),
            voice_id
        )
    }
}

#[async_trait]
impl TextToSpeech for ElevenLabsTts {
    fn name(&self) -> &str {
        "elevenlabs"
    }

    async fn synthesize(&self, text: &str, voice: &VoiceSpec) -> VoiceResult<SynthesizedAudio> {
        let request = SpeechRequest {
            text,
            model_id: &self.model,
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.75,
            },
        };
        let response = self
            .client
            .post(self.url(voice))
            .header(XI_API_KEY_HEADER, &self.api_key)
            .header(reqwest::header::ACCEPT, "audio/mpeg")
            .json(&request)
            .send()
            .await
            .map_err(|e| VoiceError::from_http("tts", e))?;
        let response = check_status("tts", response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| VoiceError::from_http("tts", e))?;
        non_empty_audio(self.name(), SynthesizedAudio::encoded(bytes.to_vec(), "audio/mpeg"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_prefers_pinned_voice() {
        let tts = ElevenLabsTts::new("k", "m").unwrap().with_base_url("http://localhost:9/");
        let spec = VoiceSpec::new("alloy", 24000);
        assert_eq!(
            tts.url(&spec),
            "http://localhost:9/v1/text-to-speech/alloy?output_format=mp3_44100_128"
        );
        let tts = tts.with_voice_id("21m00Tcm4TlvDq8ikWAM");
        assert!(tts.url(&spec).contains("/21m00Tcm4TlvDq8ikWAM?"));
    }
}
