//! Persona Voice Daemon
//!
//! Runs one voice session against the default microphone and speaker until
//! CTRL-C or until the session ends on its own. Status, transcripts and the
//! avatar's talking flag go to the log; type `m` + Enter to toggle mute and
//! `q` + Enter to quit.
//!
//! `persona-voice-daemon --list-devices` prints the available input devices.

use anyhow::{bail, Context};
use persona_voice::{
    AudioOutput, CpalMicrophone, DuplexConnector, ElevenLabsTts, MonotonicClock, OpenAiChat, OpenAiStt, OpenAiTts,
    RodioOutput, SessionDevices, SessionEvent, SessionMode, SessionServices, SilentOutput, TtsChain, VoiceConfig,
    VoiceSession, WebSocketConnector,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[persona-voice-daemon] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if std::env::args().any(|a| a == "--list-devices") {
        for name in CpalMicrophone::list_input_devices()? {
            println!("{name}");
        }
        return Ok(());
    }

    let config = VoiceConfig::load().context("load persona voice config")?;
    info!(mode = ?config.mode, voice = %config.persona.voice, "Persona voice daemon starting");

    let services = build_services(&config)?;
    let devices = open_devices(&config);
    let mut session = VoiceSession::start(config, services, devices)?;

    let mut lipsync = session.lipsync();
    let mut talking = false;
    let mut muted = false;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = session.next_event() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
            changed = lipsync.changed() => {
                if changed.is_err() {
                    break;
                }
                let frame = *lipsync.borrow_and_update();
                if frame.talking != talking {
                    talking = frame.talking;
                    info!(talking, playback_rate = frame.playback_rate, "👄 Avatar");
                }
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match line.trim() {
                    "m" => {
                        muted = !muted;
                        session.set_muted(muted);
                    }
                    "q" => break,
                    _ => {}
                },
                Ok(None) | Err(_) => stdin_open = false,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("CTRL-C received; ending voice session");
                break;
            }
        }
    }

    let end = session.stop().await;
    info!(?end, "Persona voice daemon stopped");
    if end.is_failure() {
        bail!("voice session failed: {}", end.status());
    }
    Ok(())
}

fn build_services(config: &VoiceConfig) -> anyhow::Result<SessionServices> {
    let stt = OpenAiStt::from_env().context("speech-to-text credentials")?;
    let generator = OpenAiChat::from_env().context("response generation credentials")?;
    let default_tts = OpenAiTts::from_env().context("text-to-speech credentials")?;

    let mut tts = TtsChain::new(Arc::new(default_tts));
    match ElevenLabsTts::from_env() {
        Ok(premium) => {
            info!("🎙️ ElevenLabs voice enabled");
            tts = tts.with_preferred(Arc::new(premium));
        }
        Err(e) => debug!("ElevenLabs not configured: {}", e),
    }

    let connector: Option<Arc<dyn DuplexConnector>> = match config.mode {
        SessionMode::Duplex => Some(Arc::new(
            WebSocketConnector::from_env(config.duplex.endpoint.clone()).context("voice link credentials")?,
        )),
        SessionMode::Batch => None,
    };

    Ok(SessionServices {
        stt: Arc::new(stt),
        generator: Arc::new(generator),
        tts,
        connector,
    })
}

fn open_devices(config: &VoiceConfig) -> SessionDevices {
    let microphone = match std::env::var("PERSONA_VOICE_INPUT_DEVICE") {
        Ok(name) => CpalMicrophone::new(&config.capture).with_device(name),
        Err(_) => CpalMicrophone::new(&config.capture),
    };

    let output: Box<dyn AudioOutput> = match RodioOutput::open_default() {
        Ok(output) => Box::new(output),
        Err(e) => {
            warn!("🔈 No audio output ({}); replies will be silent", e);
            Box::new(SilentOutput)
        }
    };

    SessionDevices {
        microphone: Box::new(microphone),
        output,
        clock: Arc::new(MonotonicClock::new()),
    }
}

fn log_event(event: &SessionEvent) {
    debug!(event = %serde_json::to_string(event).unwrap_or_default(), "session event");
    match event {
        SessionEvent::UserTranscript { text } => info!("🗣️ You: {}", text),
        SessionEvent::ModelReply { text } => info!("🤖 Persona: {}", text),
        SessionEvent::TurnDiscarded { reason } => info!("🗑️ Turn discarded: {}", reason),
        SessionEvent::RemoteInterrupted { cancelled } => {
            info!(cancelled, "⚡ Voice model interrupted its reply")
        }
        SessionEvent::Status(_)
        | SessionEvent::SpeechStarted
        | SessionEvent::BargeIn { .. }
        | SessionEvent::AvatarFinishedSpeaking => {}
    }
}
