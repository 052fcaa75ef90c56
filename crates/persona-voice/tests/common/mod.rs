//! Test doubles shared by the session integration tests.
//!
//! Every session runs on a paused tokio clock: frames are pushed one at a time
//! with a 30ms sleep between them, so VAD timing is exact and deterministic.

#![allow(dead_code)]

use async_trait::async_trait;
use persona_voice::audio::encode_pcm16;
use persona_voice::{
    AudioOutput, DecodedAudio, HistoryEntry, LipSyncFrame, PushMicrophone, ResponseGenerator, SessionEvent,
    SessionHandle, SessionStatus, SpeechToText, SynthesizedAudio, TextToSpeech, VoiceError, VoiceResult, VoiceSpec,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CAPTURE_RATE: u32 = 16000;
pub const FRAME: usize = 480;
pub const FRAME_MS: u64 = 30;
pub const REPLY_RATE: u32 = 24000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// One 30ms frame of a 220 Hz tone (RMS ~0.21, well above the 0.02 threshold).
pub fn voiced_frame() -> Vec<f32> {
    (0..FRAME)
        .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / CAPTURE_RATE as f32).sin())
        .collect()
}

pub fn silent_frame() -> Vec<f32> {
    vec![0.0; FRAME]
}

/// Deterministic broadband audio that keeps the lip-sync analyser busy.
pub fn noise(amplitude: f32, len: usize) -> Vec<f32> {
    let mut state: u32 = 0x9e37_79b9;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state as f32 / u32::MAX as f32 * 2.0 - 1.0) * amplitude
        })
        .collect()
}

/// Push `ms` of tone, one frame per 30ms of (paused) time.
pub async fn speak(mic: &PushMicrophone, ms: u64) {
    push_frames(mic, voiced_frame(), ms).await;
}

pub async fn stay_silent(mic: &PushMicrophone, ms: u64) {
    push_frames(mic, silent_frame(), ms).await;
}

async fn push_frames(mic: &PushMicrophone, frame: Vec<f32>, ms: u64) {
    for _ in 0..ms.div_ceil(FRAME_MS) {
        mic.push(&frame);
        tokio::time::sleep(Duration::from_millis(FRAME_MS)).await;
    }
}

pub async fn wait_for_status(handle: &SessionHandle, want: impl Fn(&SessionStatus) -> bool) -> SessionStatus {
    let mut rx = handle.status_watch();
    let status = tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| want(s)))
        .await
        .expect("timed out waiting for status")
        .expect("session ended while waiting for status")
        .clone();
    status
}

pub async fn wait_for_lipsync(handle: &SessionHandle, want: impl Fn(&LipSyncFrame) -> bool) -> LipSyncFrame {
    let mut rx = handle.lipsync();
    let frame = *tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|f| want(f)))
        .await
        .expect("timed out waiting for lip-sync")
        .expect("session ended while waiting for lip-sync");
    frame
}

pub fn drain_events(handle: &mut SessionHandle) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Some(event) = handle.try_next_event() {
        events.push(event);
    }
    events
}

pub fn statuses(events: &[SessionEvent]) -> Vec<SessionStatus> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Status(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

type SttReply = Box<dyn Fn(usize) -> VoiceResult<String> + Send + Sync>;

/// Speech-to-text whose answer is chosen by call number.
pub struct ScriptedStt {
    reply: SttReply,
    latency: Duration,
    calls: AtomicUsize,
    audio: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedStt {
    pub fn new(reply: impl Fn(usize) -> VoiceResult<String> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            reply: Box::new(reply),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            audio: Mutex::new(Vec::new()),
        })
    }

    pub fn saying(text: &'static str) -> Arc<Self> {
        Self::new(move |_| Ok(text.to_string()))
    }

    /// Answers `text` after `latency` of (paused) time.
    pub fn slow(text: &'static str, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: Box::new(move |_| Ok(text.to_string())),
            latency,
            calls: AtomicUsize::new(0),
            audio: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn audio(&self) -> Vec<Vec<u8>> {
        self.audio.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechToText for ScriptedStt {
    async fn transcribe(&self, audio: &[u8], _mime_type: &str) -> VoiceResult<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.audio.lock().unwrap().push(audio.to_vec());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        (self.reply)(n)
    }
}

/// Replies with a fixed line and remembers how much history it was given.
#[derive(Default)]
pub struct RecordingGenerator {
    history_sizes: Mutex<Vec<usize>>,
}

impl RecordingGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.history_sizes.lock().unwrap().len()
    }

    pub fn history_sizes(&self) -> Vec<usize> {
        self.history_sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResponseGenerator for RecordingGenerator {
    async fn respond(&self, _persona: &str, recent_history: &[HistoryEntry], user_text: &str) -> VoiceResult<String> {
        self.history_sizes.lock().unwrap().push(recent_history.len());
        Ok(format!("You said: {user_text}"))
    }
}

/// Synthesizes `secs` of noise for any text.
pub struct NoiseTts {
    secs: f32,
    texts: Mutex<Vec<String>>,
}

impl NoiseTts {
    pub fn new(secs: f32) -> Arc<Self> {
        Arc::new(Self {
            secs,
            texts: Mutex::new(Vec::new()),
        })
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextToSpeech for NoiseTts {
    fn name(&self) -> &str {
        "noise"
    }

    async fn synthesize(&self, text: &str, _voice: &VoiceSpec) -> VoiceResult<SynthesizedAudio> {
        self.texts.lock().unwrap().push(text.to_string());
        let samples = noise(0.3, (self.secs * REPLY_RATE as f32) as usize);
        Ok(SynthesizedAudio::pcm16(encode_pcm16(&samples), REPLY_RATE))
    }
}

/// Text-to-speech that never yields playable audio.
pub struct BrokenTts {
    garbled: bool,
    calls: AtomicUsize,
}

impl BrokenTts {
    /// Answers with bytes that claim to be MP3 but are not.
    pub fn garbled() -> Arc<Self> {
        Arc::new(Self {
            garbled: true,
            calls: AtomicUsize::new(0),
        })
    }

    /// Fails every request with a permanent error.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            garbled: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextToSpeech for BrokenTts {
    fn name(&self) -> &str {
        "broken"
    }

    async fn synthesize(&self, _text: &str, _voice: &VoiceSpec) -> VoiceResult<SynthesizedAudio> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.garbled {
            Ok(SynthesizedAudio::encoded(vec![0x5a; 64], "audio/mpeg"))
        } else {
            Err(VoiceError::Tts("voice not found".into()))
        }
    }
}

// ---------------------------------------------------------------------------
// Output device
// ---------------------------------------------------------------------------

/// Counters observed through a [`RecordingOutput`].
#[derive(Clone, Default)]
pub struct OutputCounters {
    plays: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl OutputCounters {
    pub fn plays(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn output(&self) -> Box<dyn AudioOutput> {
        Box::new(RecordingOutput { counters: self.clone() })
    }

    /// An output whose driver panics on the first play.
    pub fn crashing_output(&self) -> Box<dyn AudioOutput> {
        Box::new(CrashingOutput)
    }
}

struct CrashingOutput;

impl AudioOutput for CrashingOutput {
    fn play(&mut self, _audio: &DecodedAudio) -> VoiceResult<()> {
        panic!("output driver crashed");
    }

    fn stop_all(&mut self) {}
}

struct RecordingOutput {
    counters: OutputCounters,
}

impl AudioOutput for RecordingOutput {
    fn play(&mut self, _audio: &DecodedAudio) -> VoiceResult<()> {
        self.counters.plays.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop_all(&mut self) {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
    }
}
