//! OpenAI-compatible providers (OpenAI, OpenRouter, local gateways).
//!
//! Env: `OPENAI_BASE_URL` (default https://api.openai.com/v1), `OPENAI_API_KEY`
//! (or `STT_API_KEY` / `TTS_API_KEY` / `LLM_API_KEY`), `STT_MODEL`, `LLM_MODEL`, `TTS_MODEL`.

use super::{check_status, env_key, http_client};
use crate::audio::SynthesizedAudio;
use crate::error::{VoiceError, VoiceResult};
use crate::history::{HistoryEntry, Role};
use crate::services::{non_empty_audio, ResponseGenerator, SpeechToText, TextToSpeech, VoiceSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI `/audio/speech` emits raw PCM at this fixed rate.
pub const OPENAI_PCM_RATE: u32 = 24000;

fn base_url_from_env() -> String {
    std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

/// Transcription via `/audio/transcriptions` (multipart upload).
#[derive(Debug, Clone)]
pub struct OpenAiStt {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiStt {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> VoiceResult<Self> {
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client: http_client("stt", Duration::from_secs(30))?,
        })
    }

    pub fn from_env() -> VoiceResult<Self> {
        let api_key = env_key(&["STT_API_KEY", "OPENAI_API_KEY"])?;
        let model = std::env::var("STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        Self::new(base_url_from_env(), api_key, model)
    }
}

fn file_name_for(mime_type: &str) -> &'static str {
    match mime_type {
        "audio/mpeg" | "audio/mp3" => "audio.mp3",
        "audio/webm" => "audio.webm",
        "audio/ogg" => "audio.ogg",
        _ => "audio.wav",
    }
}

#[async_trait]
impl SpeechToText for OpenAiStt {
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> VoiceResult<String> {
        if audio.is_empty() {
            return Ok(String::new());
        }
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name(file_name_for(mime_type))
            .mime_str(mime_type)
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let response = self
            .client
            .post(endpoint(&self.base_url, "audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::from_http("stt", e))?;
        let response = check_status("stt", response).await?;

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        let text = json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        debug!(chars = text.len(), "transcribed");
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Build the chat transcript: persona as system, windowed history, new user turn.
fn chat_messages<'a>(persona: &'a str, history: &'a [HistoryEntry], user_text: &'a str) -> Vec<ChatMessage<'a>> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage {
        role: "system",
        content: persona,
    });
    for entry in history {
        messages.push(ChatMessage {
            role: match entry.role {
                Role::User => "user",
                Role::Model => "assistant",
            },
            content: &entry.text,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: user_text,
    });
    messages
}

/// Reply generation via `/chat/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> VoiceResult<Self> {
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 300,
            client: http_client("generation", Duration::from_secs(60))?,
        })
    }

    pub fn from_env() -> VoiceResult<Self> {
        let api_key = env_key(&["LLM_API_KEY", "OPENAI_API_KEY"])?;
        let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Self::new(base_url_from_env(), api_key, model)
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl ResponseGenerator for OpenAiChat {
    async fn respond(
        &self,
        persona: &str,
        recent_history: &[HistoryEntry],
        user_text: &str,
    ) -> VoiceResult<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: chat_messages(persona, recent_history, user_text),
            max_tokens: self.max_tokens,
        };
        let response = self
            .client
            .post(endpoint(&self.base_url, "chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| VoiceError::from_http("generation", e))?;
        let response = check_status("generation", response).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Generation(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .ok_or_else(|| VoiceError::Generation("empty completion".to_string()))
    }
}

/// Default voice via `/audio/speech` with raw PCM output.
#[derive(Debug, Clone)]
pub struct OpenAiTts {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiTts {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> VoiceResult<Self> {
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client: http_client("tts", Duration::from_secs(60))?,
        })
    }

    pub fn from_env() -> VoiceResult<Self> {
        let api_key = env_key(&["TTS_API_KEY", "OPENAI_API_KEY"])?;
        let model = std::env::var("TTS_MODEL").unwrap_or_else(|_| "tts-1".to_string());
        Self::new(base_url_from_env(), api_key, model)
    }
}

#[async_trait]
impl TextToSpeech for OpenAiTts {
    fn name(&self) -> &str {
        "openai-tts"
    }

    async fn synthesize(&self, text: &str, voice: &VoiceSpec) -> VoiceResult<SynthesizedAudio> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": voice.voice,
            "response_format": "pcm",
        });
        let response = self
            .client
            .post(endpoint(&self.base_url, "audio/speech"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::from_http("tts", e))?;
        let response = check_status("tts", response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| VoiceError::from_http("tts", e))?;
        non_empty_audio(self.name(), pcm_reply(bytes.to_vec(), voice))
    }
}

/// `response_format: pcm` has no rate parameter, so `voice.sample_rate` cannot be
/// honoured. The reply keeps its real rate and playback resamples.
fn pcm_reply(bytes: Vec<u8>, voice: &VoiceSpec) -> SynthesizedAudio {
    if voice.sample_rate != OPENAI_PCM_RATE {
        debug!(
            requested = voice.sample_rate,
            actual = OPENAI_PCM_RATE,
            "openai-tts ignores the requested sample rate"
        );
    }
    SynthesizedAudio::pcm16(bytes, OPENAI_PCM_RATE)
}
