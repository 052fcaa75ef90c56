//! Duplex voice link
//!
//! A persistent bidirectional session with a remote voice model. Outbound, every
//! captured frame is sent as 16-bit little-endian PCM; inbound, the remote side
//! streams reply audio and control events and owns turn-taking.
//!
//! [`DuplexConnector`] is the seam. [`WebSocketConnector`] speaks the JSON
//! protocol below over tokio-tungstenite; [`ChannelConnector`] hands the remote
//! end to the caller (custom transports, tests).
//!
//! ```text
//! -> {"setup": {"model", "generationConfig", "systemInstruction", "outputAudioTranscription"}}
//! <- {"setupComplete": {}}                                     Opened
//! -> {"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": b64}]}}
//! <- {"serverContent": {"modelTurn": {"parts": [{"inlineData": {...}}]}}}   Audio
//! <- {"serverContent": {"outputTranscription": {"text": "..."}}}          Transcript
//! <- {"serverContent": {"interrupted": true}}                             Interrupted
//! <- {"serverContent": {"turnComplete": true}}                            TurnComplete
//! ```

use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

/// Parameters sent when the link opens.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSetup {
    pub model: String,
    pub voice: String,
    pub persona: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    /// Ask the remote side to stream a transcript of its spoken reply.
    pub transcribe_output: bool,
}

/// Inbound events, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Remote acknowledged setup; the microphone may be armed.
    Opened,
    /// PCM16 reply audio at the output sample rate.
    Audio(Vec<u8>),
    /// Incremental transcript of the reply.
    Transcript(String),
    /// Remote detected the user talking over the reply.
    Interrupted,
    TurnComplete,
    /// Normal closure.
    Closed,
    /// Abnormal closure or transport failure.
    Error(String),
}

/// A live link: PCM frames go out, events come in.
pub struct DuplexLink {
    pub outbound: mpsc::UnboundedSender<Vec<u8>>,
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

#[async_trait]
pub trait DuplexConnector: Send + Sync {
    async fn connect(&self, setup: LinkSetup) -> VoiceResult<DuplexLink>;
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupMessage<'a> {
    setup: SetupBody<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupBody<'a> {
    model: &'a str,
    generation_config: GenerationConfig<'a>,
    system_instruction: Content<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_audio_transcription: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: [&'static str; 1],
    speech_config: SpeechConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig<'a> {
    voice_config: VoiceConfigWire<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfigWire<'a> {
    prebuilt_voice_config: PrebuiltVoice<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoice<'a> {
    voice_name: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [TextPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage {
    realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    media_chunks: [MediaChunk; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaChunk {
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
    output_transcription: Option<Transcription>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
struct Transcription {
    #[serde(default)]
    text: String,
}

pub fn setup_message(setup: &LinkSetup) -> VoiceResult<String> {
    let message = SetupMessage {
        setup: SetupBody {
            model: &setup.model,
            generation_config: GenerationConfig {
                response_modalities: ["AUDIO"],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfigWire {
                        prebuilt_voice_config: PrebuiltVoice {
                            voice_name: &setup.voice,
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: [TextPart {
                    text: &setup.persona,
                }],
            },
            output_audio_transcription: setup
                .transcribe_output
                .then(|| serde_json::json!({})),
        },
    };
    serde_json::to_string(&message).map_err(|e| VoiceError::Transport(e.to_string()))
}

/// Wrap one PCM16 frame for the wire.
pub fn realtime_input_message(pcm: &[u8], sample_rate: u32) -> VoiceResult<String> {
    let message = RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: [MediaChunk {
                mime_type: format!("audio/pcm;rate={sample_rate}"),
                data: BASE64.encode(pcm),
            }],
        },
    };
    serde_json::to_string(&message).map_err(|e| VoiceError::Transport(e.to_string()))
}

/// Map one server message to link events. Undecodable audio parts are skipped.
pub fn parse_server_message(text: &str) -> VoiceResult<Vec<LinkEvent>> {
    let message: ServerMessage =
        serde_json::from_str(text).map_err(|e| VoiceError::Transport(format!("bad server message: {e}")))?;
    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        events.push(LinkEvent::Opened);
    }
    if let Some(content) = message.server_content {
        if content.interrupted {
            events.push(LinkEvent::Interrupted);
        }
        for part in content.model_turn.map(|t| t.parts).unwrap_or_default() {
            let Some(inline) = part.inline_data else { continue };
            if let Some(mime) = &inline.mime_type {
                if !mime.starts_with("audio/pcm") {
                    debug!(mime = %mime, "ignoring non-PCM inline data");
                    continue;
                }
            }
            match BASE64.decode(inline.data.as_bytes()) {
                Ok(bytes) if !bytes.is_empty() => events.push(LinkEvent::Audio(bytes)),
                Ok(_) => {}
                Err(e) => warn!("Skipping undecodable audio part: {}", e),
            }
        }
        if let Some(t) = content.output_transcription {
            if !t.text.is_empty() {
                events.push(LinkEvent::Transcript(t.text));
            }
        }
        if content.turn_complete {
            events.push(LinkEvent::TurnComplete);
        }
    }
    Ok(events)
}

// ---------------------------------------------------------------------------
// WebSocket transport
// ---------------------------------------------------------------------------

/// Connects to a remote voice model over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    endpoint: String,
    api_key: Option<String>,
}

impl WebSocketConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Endpoint from config, key from `VOICE_LINK_API_KEY` (or `GEMINI_API_KEY`).
    pub fn from_env(endpoint: impl Into<String>) -> VoiceResult<Self> {
        let key = crate::providers::env_key(&["VOICE_LINK_API_KEY", "GEMINI_API_KEY"])?;
        Ok(Self::new(endpoint).with_api_key(key))
    }

    fn url(&self) -> String {
        match &self.api_key {
            Some(key) => {
                let sep = if self.endpoint.contains('?') { '&' } else { '?' };
                format!("{}{}key={}", self.endpoint, sep, key)
            }
            None => self.endpoint.clone(),
        }
    }
}

#[async_trait]
impl DuplexConnector for WebSocketConnector {
    async fn connect(&self, setup: LinkSetup) -> VoiceResult<DuplexLink> {
        info!("🔌 Connecting voice link to {}", self.endpoint);
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url()).await?;
        let (mut writer, mut reader) = ws_stream.split();

        writer.send(Message::Text(setup_message(&setup)?.into())).await?;

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<LinkEvent>();
        let input_rate = setup.input_sample_rate;

        tokio::spawn(async move {
            while let Some(pcm) = out_rx.recv().await {
                let text = match realtime_input_message(&pcm, input_rate) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Dropping outbound frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = writer.send(Message::Text(text.into())).await {
                    warn!("Voice link send failed: {}", e);
                    break;
                }
            }
            let _ = writer.close().await;
            debug!("voice link writer finished");
        });

        tokio::spawn(async move {
            let mut terminal = None;
            while let Some(msg) = reader.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text.as_str().to_owned(),
                    Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                        Ok(text) => text.to_owned(),
                        Err(_) => {
                            debug!(len = bytes.len(), "ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        terminal = Some(match frame {
                            Some(f) if f.code != CloseCode::Normal => {
                                LinkEvent::Error(format!("closed with {}: {}", f.code, f.reason))
                            }
                            _ => LinkEvent::Closed,
                        });
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        terminal = Some(LinkEvent::Error(e.to_string()));
                        break;
                    }
                };
                match parse_server_message(&text) {
                    Ok(events) => {
                        for event in events {
                            if in_tx.send(event).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => warn!("{}", e),
                }
            }
            let _ = in_tx.send(terminal.unwrap_or(LinkEvent::Closed));
        });

        Ok(DuplexLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// In-process transport
// ---------------------------------------------------------------------------

/// The far side of a [`ChannelConnector`] link.
pub struct RemoteEnd {
    /// Push events as if the remote model sent them.
    pub events: mpsc::UnboundedSender<LinkEvent>,
    /// PCM frames the session sent.
    pub frames: mpsc::UnboundedReceiver<Vec<u8>>,
    setups: mpsc::UnboundedReceiver<LinkSetup>,
}

impl RemoteEnd {
    /// The setup the session connected with, once it has connected.
    pub async fn setup(&mut self) -> Option<LinkSetup> {
        self.setups.recv().await
    }
}

/// A one-shot connector backed by in-memory channels.
pub struct ChannelConnector {
    link: Mutex<Option<DuplexLink>>,
    setups: mpsc::UnboundedSender<LinkSetup>,
}

impl ChannelConnector {
    pub fn pair() -> (Self, RemoteEnd) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (setup_tx, setup_rx) = mpsc::unbounded_channel();
        let connector = Self {
            link: Mutex::new(Some(DuplexLink {
                outbound: out_tx,
                inbound: in_rx,
            })),
            setups: setup_tx,
        };
        let remote = RemoteEnd {
            events: in_tx,
            frames: out_rx,
            setups: setup_rx,
        };
        (connector, remote)
    }
}

#[async_trait]
impl DuplexConnector for ChannelConnector {
    async fn connect(&self, setup: LinkSetup) -> VoiceResult<DuplexLink> {
        let link = self.link.lock().take().ok_or(VoiceError::TransportClosed)?;
        let _ = self.setups.send(setup);
        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> LinkSetup {
        LinkSetup {
            model: "models/test".into(),
            voice: "Puck".into(),
            persona: "be brief".into(),
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            transcribe_output: true,
        }
    }

    #[test]
    fn setup_message_shape() {
        let json: serde_json::Value = serde_json::from_str(&setup_message(&setup()).unwrap()).unwrap();
        assert_eq!(json["setup"]["model"], "models/test");
        assert_eq!(json["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Puck"
        );
        assert_eq!(json["setup"]["systemInstruction"]["parts"][0]["text"], "be brief");
        assert!(json["setup"]["outputAudioTranscription"].is_object());
    }

    #[test]
    fn realtime_input_carries_base64_pcm() {
        let json: serde_json::Value =
            serde_json::from_str(&realtime_input_message(&[1, 2, 3, 4], 16000).unwrap()).unwrap();
        let chunk = &json["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(BASE64.decode(chunk["data"].as_str().unwrap()).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn server_messages_map_to_events() {
        assert_eq!(parse_server_message(r#"{"setupComplete":{}}"#).unwrap(), vec![LinkEvent::Opened]);

        let audio = BASE64.encode([0u8, 1, 2, 3]);
        let text = format!(
            r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{audio}"}}}}]}}}}}}"#
        );
        assert_eq!(parse_server_message(&text).unwrap(), vec![LinkEvent::Audio(vec![0, 1, 2, 3])]);

        assert_eq!(
            parse_server_message(r#"{"serverContent":{"interrupted":true}}"#).unwrap(),
            vec![LinkEvent::Interrupted]
        );
        assert_eq!(
            parse_server_message(r#"{"serverContent":{"outputTranscription":{"text":"Hi"},"turnComplete":true}}"#)
                .unwrap(),
            vec![LinkEvent::Transcript("Hi".into()), LinkEvent::TurnComplete]
        );
        assert!(parse_server_message(r#"{"usageMetadata":{}}"#).unwrap().is_empty());
        assert!(parse_server_message("not json").is_err());
    }

    #[test]
    fn bad_audio_parts_are_skipped() {
        let text = r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm","data":"%%%"}}]},"turnComplete":true}}"#;
        assert_eq!(parse_server_message(text).unwrap(), vec![LinkEvent::TurnComplete]);
    }

    #[test]
    fn api_key_goes_in_the_query() {
        let c = WebSocketConnector::new("wss://host/ws").with_api_key("k");
        assert_eq!(c.url(), "wss://host/ws?key=k");
        let c = WebSocketConnector::new("wss://host/ws?alt=1").with_api_key("k");
        assert_eq!(c.url(), "wss://host/ws?alt=1&key=k");
    }

    #[tokio::test]
    async fn channel_connector_is_one_shot() {
        let (connector, mut remote) = ChannelConnector::pair();
        let link = connector.connect(setup()).await.unwrap();
        assert_eq!(remote.setup().await.unwrap().voice, "Puck");
        link.outbound.send(vec![9, 9]).unwrap();
        assert_eq!(remote.frames.recv().await.unwrap(), vec![9, 9]);
        assert!(matches!(
            connector.connect(setup()).await,
            Err(VoiceError::TransportClosed)
        ));
    }
}
