//! Voice session orchestrator
//!
//! One actor task owns every piece of mutable session state (VAD, turn buffer,
//! stage, playback scheduler, lip-sync driver, history) and reacts to messages:
//!
//! ```text
//!   commands ──┐
//!   link events┤        ┌────────────────────────────┐
//!   mic frames ┼──────▶ │ select! (biased, in order) │ ──▶ status / events / lip-sync watches
//!   turn progress       └────────────────────────────┘
//!   VAD timer ─┤
//!   visual tick┘
//! ```
//!
//! Network calls never run on the actor: batch turns and duplex re-synthesis are
//! spawned and report back through the progress channel, so a slow provider can
//! not delay frame processing. Teardown runs on every exit path.

use crate::audio::{decode_pcm16, encode_pcm16, AudioFrame, DecodedAudio};
use crate::capture::{CaptureController, MicrophoneSource};
use crate::config::{ReplyAudioSource, SessionMode, VoiceConfig};
use crate::duplex::{DuplexConnector, LinkEvent, LinkSetup};
use crate::error::{ErrorKind, VoiceError, VoiceResult};
use crate::history::{ConversationHistory, Role};
use crate::lipsync::{LipSyncDriver, LipSyncFrame};
use crate::playback::{AudioOutput, OutputClock, PlaybackEvent, PlaybackScheduler, SlotPolicy};
use crate::services::{ResponseGenerator, RetryPolicy, SpeechToText, TtsChain, VoiceSpec};
use crate::status::{SessionEnd, SessionEvent, SessionStatus};
use crate::turn::{run_turn, TurnBuffer, TurnContext, TurnProgress, TurnRequest, TurnStage, TurnTrigger};
use crate::vad::{EnergyVad, VadEvent};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// External services a session talks to.
pub struct SessionServices {
    pub stt: Arc<dyn SpeechToText>,
    pub generator: Arc<dyn ResponseGenerator>,
    pub tts: TtsChain,
    /// Required in duplex mode.
    pub connector: Option<Arc<dyn DuplexConnector>>,
}

/// Devices singly owned by a session.
pub struct SessionDevices {
    pub microphone: Box<dyn MicrophoneSource>,
    pub output: Box<dyn AudioOutput>,
    pub clock: Arc<dyn OutputClock>,
}

/// Snapshot of the playback timeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlaybackState {
    /// Segments scheduled or playing.
    pub active: usize,
    /// Output-clock time the next segment would start at.
    pub next_start: f64,
}

#[derive(Debug)]
enum Command {
    SetMuted(bool),
    Stop,
}

/// Caller's side of a running session.
pub struct SessionHandle {
    mode: SessionMode,
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    status: watch::Receiver<SessionStatus>,
    lipsync: watch::Receiver<LipSyncFrame>,
    playback: watch::Receiver<PlaybackState>,
    task: JoinHandle<SessionEnd>,
}

impl SessionHandle {
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Drop microphone frames (and freeze the VAD) while muted.
    pub fn set_muted(&self, muted: bool) {
        if self.commands.send(Command::SetMuted(muted)).is_err() {
            debug!("mute ignored, session already ended");
        }
    }

    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn status_watch(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub fn lipsync(&self) -> watch::Receiver<LipSyncFrame> {
        self.lipsync.clone()
    }

    pub fn playback(&self) -> watch::Receiver<PlaybackState> {
        self.playback.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the session and wait for teardown.
    pub async fn stop(self) -> SessionEnd {
        let _ = self.commands.send(Command::Stop);
        Self::join(self.task).await
    }

    /// Wait for the session to end on its own (remote close, fatal error).
    pub async fn finished(self) -> SessionEnd {
        Self::join(self.task).await
    }

    async fn join(task: JoinHandle<SessionEnd>) -> SessionEnd {
        match task.await {
            Ok(end) => end,
            Err(e) => {
                error!("💥 Voice session task crashed: {}", e);
                SessionEnd::Crashed(e.to_string())
            }
        }
    }
}

/// Entry point: validates config and spawns the session actor.
pub struct VoiceSession;

impl VoiceSession {
    pub fn start(
        config: VoiceConfig,
        services: SessionServices,
        devices: SessionDevices,
    ) -> VoiceResult<SessionHandle> {
        config.validate()?;
        let connector = match config.mode {
            SessionMode::Duplex => Some(services.connector.clone().ok_or_else(|| {
                VoiceError::Config("duplex mode requires a voice link connector".to_string())
            })?),
            SessionMode::Batch => None,
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::Connecting);
        let (lipsync_tx, lipsync_rx) = watch::channel(LipSyncFrame::idle());

        let policy = match config.mode {
            SessionMode::Batch => SlotPolicy::Single,
            SessionMode::Duplex => SlotPolicy::Queue,
        };
        let scheduler = PlaybackScheduler::new(policy, devices.clock, devices.output);
        let (playback_tx, playback_rx) = watch::channel(PlaybackState {
            active: 0,
            next_start: scheduler.next_start(),
        });

        let turn_ctx = TurnContext {
            stt: services.stt,
            generator: services.generator,
            tts: services.tts,
            persona: config.persona.description.clone(),
            voice: VoiceSpec::new(config.persona.voice.clone(), config.playback.sample_rate),
            retry: RetryPolicy::from(&config.retry),
            min_transcript_chars: config.turn.min_transcript_chars,
            rate_limit_cooldown: config.turn.rate_limit_cooldown(),
        };

        let core = SessionCore {
            mode: config.mode,
            capture: CaptureController::new(config.capture.clone(), devices.microphone),
            frame_tx,
            vad: EnergyVad::new(&config.vad),
            scheduler,
            lipsync: LipSyncDriver::new(&config.lipsync),
            stage: TurnStage::Listening,
            buffer: TurnBuffer::new(
                config.capture.sample_rate,
                config.turn.max_buffer(),
                config.vad.threshold,
            ),
            min_utterance: config.turn.min_utterance(),
            history: ConversationHistory::new(config.turn.history_window),
            turn_ctx,
            progress_tx,
            tasks: Vec::new(),
            link_out: None,
            transcript: String::new(),
            muted: false,
            events: event_tx,
            status: status_tx,
            lipsync_out: lipsync_tx,
            playback_out: playback_tx,
            config,
        };
        let mode = core.mode;

        let actor = SessionActor {
            core,
            connector,
            commands: command_rx,
            frames: frame_rx,
            progress: progress_rx,
            link: None,
        };
        let task = tokio::spawn(actor.run());
        info!(?mode, "🎧 Voice session started");

        Ok(SessionHandle {
            mode,
            commands: command_tx,
            events: event_rx,
            status: status_rx,
            lipsync: lipsync_rx,
            playback: playback_rx,
            task,
        })
    }
}

struct SessionActor {
    core: SessionCore,
    connector: Option<Arc<dyn DuplexConnector>>,
    commands: mpsc::UnboundedReceiver<Command>,
    frames: mpsc::UnboundedReceiver<AudioFrame>,
    progress: mpsc::UnboundedReceiver<TurnProgress>,
    link: Option<mpsc::UnboundedReceiver<LinkEvent>>,
}

impl SessionActor {
    async fn run(mut self) -> SessionEnd {
        let end = match self.open().await {
            Ok(()) => self.event_loop().await,
            Err(end) => end,
        };
        self.core.teardown(&end);
        end
    }

    /// Acquire the microphone (batch) or the voice link (duplex).
    async fn open(&mut self) -> Result<(), SessionEnd> {
        match self.core.mode {
            SessionMode::Batch => {
                self.core.arm_microphone()?;
                self.core.set_status(SessionStatus::Listening);
                Ok(())
            }
            SessionMode::Duplex => {
                let Some(connector) = self.connector.clone() else {
                    return Err(SessionEnd::TransportFailed("no connector".to_string()));
                };
                self.core.set_status(SessionStatus::Connecting);
                let setup = self.core.link_setup();
                let connect = connector.connect(setup);
                tokio::pin!(connect);
                loop {
                    tokio::select! {
                        biased;
                        command = self.commands.recv() => match command {
                            Some(Command::SetMuted(muted)) => self.core.set_muted(muted),
                            Some(Command::Stop) | None => return Err(SessionEnd::Stopped),
                        },
                        result = &mut connect => {
                            let link = result.map_err(|e| SessionEnd::TransportFailed(e.to_string()))?;
                            self.core.link_out = Some(link.outbound);
                            self.link = Some(link.inbound);
                            info!("🔗 Voice link connected, waiting for setup ack");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn event_loop(&mut self) -> SessionEnd {
        let mut tick = tokio::time::interval(Duration::from_millis(self.core.config.lipsync.tick_ms));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let vad_deadline = self.core.vad.pending_deadline();
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::SetMuted(muted)) => self.core.set_muted(muted),
                    Some(Command::Stop) | None => return SessionEnd::Stopped,
                },
                event = recv_opt(&mut self.link) => match event {
                    Some(event) => {
                        if let Some(end) = self.core.on_link_event(event) {
                            return end;
                        }
                    }
                    None => return SessionEnd::TransportFailed("voice link dropped".to_string()),
                },
                Some(frame) = self.frames.recv() => self.core.on_frame(frame),
                Some(progress) = self.progress.recv() => self.core.on_progress(progress),
                _ = sleep_until_opt(vad_deadline) => self.core.on_vad_timer(),
                _ = tick.tick() => self.core.on_tick(),
            }
        }
    }
}

async fn recv_opt<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// All mutable session state. Only the actor touches it.
struct SessionCore {
    config: VoiceConfig,
    mode: SessionMode,

    capture: CaptureController,
    frame_tx: mpsc::UnboundedSender<AudioFrame>,
    vad: EnergyVad,
    scheduler: PlaybackScheduler,
    lipsync: LipSyncDriver,

    // batch pipeline
    stage: TurnStage,
    buffer: TurnBuffer,
    min_utterance: Duration,
    history: ConversationHistory,
    turn_ctx: TurnContext,
    progress_tx: mpsc::UnboundedSender<TurnProgress>,
    tasks: Vec<JoinHandle<()>>,

    // duplex link
    link_out: Option<mpsc::UnboundedSender<Vec<u8>>>,
    transcript: String,

    muted: bool,
    events: mpsc::UnboundedSender<SessionEvent>,
    status: watch::Sender<SessionStatus>,
    lipsync_out: watch::Sender<LipSyncFrame>,
    playback_out: watch::Sender<PlaybackState>,
}

impl SessionCore {
    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("event dropped, no listener");
        }
    }

    fn set_status(&self, status: SessionStatus) {
        let status = if self.muted && status == SessionStatus::Listening {
            SessionStatus::Muted
        } else {
            status
        };
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status.clone();
                true
            }
        });
        if changed {
            info!("📣 Status: {}", status);
            self.emit(SessionEvent::Status(status));
        }
    }

    /// Status the session settles into when nothing transient is showing.
    /// Audible playback wins over the batch stage: a turn finalized while a
    /// reply is still playing must not report Listening or Thinking.
    fn resting_status(&self) -> SessionStatus {
        if self.scheduler.is_playing() {
            return SessionStatus::Speaking;
        }
        match self.mode {
            SessionMode::Batch => match self.stage {
                TurnStage::Listening => SessionStatus::Listening,
                TurnStage::Speaking => SessionStatus::Speaking,
                _ => SessionStatus::Thinking,
            },
            SessionMode::Duplex => SessionStatus::Listening,
        }
    }

    fn publish_playback(&self) {
        let state = PlaybackState {
            active: self.scheduler.active_len(),
            next_start: self.scheduler.next_start(),
        };
        self.playback_out.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    fn publish_lipsync(&self, frame: LipSyncFrame) {
        self.lipsync_out.send_if_modified(|current| {
            if *current == frame {
                false
            } else {
                *current = frame;
                true
            }
        });
    }

    fn arm_microphone(&mut self) -> Result<(), SessionEnd> {
        self.capture.start(self.frame_tx.clone()).map_err(|e| {
            error!("🎤 Microphone unavailable: {}", e);
            SessionEnd::MicrophoneDenied(e.to_string())
        })
    }

    fn link_setup(&self) -> LinkSetup {
        LinkSetup {
            model: self.config.duplex.model.clone(),
            voice: self.config.persona.voice.clone(),
            persona: self.config.persona.description.clone(),
            input_sample_rate: self.config.capture.sample_rate,
            output_sample_rate: self.config.playback.sample_rate,
            transcribe_output: true,
        }
    }

    fn set_muted(&mut self, muted: bool) {
        if self.muted == muted {
            return;
        }
        self.muted = muted;
        self.capture.set_muted(muted);
        // No silence countdown may complete while muted.
        self.vad.reset();
        info!(muted, "🔇 Mute toggled");
        if muted {
            self.set_status(SessionStatus::Muted);
        } else {
            self.set_status(self.resting_status());
        }
    }

    /// Move the batch stage; illegal transitions are logged and ignored.
    fn advance(&mut self, trigger: TurnTrigger) -> bool {
        match self.stage.next(trigger) {
            Ok(next) => {
                self.stage = next;
                true
            }
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    // --- microphone -------------------------------------------------------

    fn on_frame(&mut self, frame: AudioFrame) {
        if self.muted {
            return;
        }
        match self.mode {
            SessionMode::Batch => self.buffer.push(&frame),
            SessionMode::Duplex => {
                if let Some(out) = &self.link_out {
                    if out.send(encode_pcm16(&frame.samples)).is_err() {
                        debug!("voice link writer gone, frame dropped");
                    }
                }
            }
        }
        if let Some(event) = self.vad.observe_frame(&frame) {
            self.on_vad(event);
        }
    }

    fn on_vad_timer(&mut self) {
        if let Some(event) = self.vad.poll(Instant::now()) {
            self.on_vad(event);
        }
    }

    fn on_vad(&mut self, event: VadEvent) {
        match event {
            VadEvent::SpeechStarted => {
                self.emit(SessionEvent::SpeechStarted);
                self.barge_in();
            }
            VadEvent::SilenceConfirmed => match self.mode {
                SessionMode::Batch => self.finalize_turn(),
                SessionMode::Duplex => debug!("silence confirmed, remote owns turn-taking"),
            },
        }
    }

    /// Local speech while the avatar talks cancels everything that is playing.
    /// In-flight network calls are left to finish.
    fn barge_in(&mut self) {
        if !self.scheduler.is_playing() {
            return;
        }
        let cancelled = self.cancel_playback();
        info!(cancelled, "⚡ Barge-in");
        self.emit(SessionEvent::BargeIn { cancelled });
        if self.mode == SessionMode::Batch && self.stage == TurnStage::Speaking {
            self.advance(TurnTrigger::BargeIn);
        }
        self.set_status(self.resting_status());
    }

    fn cancel_playback(&mut self) -> usize {
        let cancelled = self.scheduler.cancel_all();
        self.lipsync.reset();
        self.publish_lipsync(LipSyncFrame::idle());
        self.publish_playback();
        cancelled
    }

    fn schedule(&mut self, audio: DecodedAudio) {
        match self.scheduler.schedule(audio) {
            Ok(_) => {
                self.publish_playback();
                self.set_status(SessionStatus::Speaking);
            }
            Err(e) => {
                warn!("Playback failed: {}", e);
                self.set_status(SessionStatus::Error(e.to_string()));
                if self.stage == TurnStage::Speaking {
                    self.advance(TurnTrigger::PlaybackFinished);
                }
                self.set_status(self.resting_status());
            }
        }
    }

    // --- batch pipeline ---------------------------------------------------

    fn finalize_turn(&mut self) {
        if self.stage.is_busy() {
            debug!(stage = self.stage.as_str(), "turn in progress, silence ignored");
            return;
        }
        if !self.advance(TurnTrigger::SilenceConfirmed) {
            return;
        }

        let turn = self.buffer.take();
        if turn.voiced < self.min_utterance {
            debug!(
                voiced_ms = turn.voiced.as_millis() as u64,
                min_ms = self.min_utterance.as_millis() as u64,
                "utterance too short"
            );
            self.advance(TurnTrigger::BufferDiscarded);
            self.emit(SessionEvent::TurnDiscarded {
                reason: "utterance too short".to_string(),
            });
            self.set_status(self.resting_status());
            return;
        }

        self.advance(TurnTrigger::BufferAccepted);
        info!(
            bytes = turn.pcm.len(),
            voiced_ms = turn.voiced.as_millis() as u64,
            "🎯 Turn finalized"
        );
        self.set_status(self.resting_status());

        let request = TurnRequest {
            pcm: turn.pcm,
            sample_rate: self.buffer.sample_rate(),
            history: self.history.recent().to_vec(),
        };
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(tokio::spawn(run_turn(
            self.turn_ctx.clone(),
            request,
            self.progress_tx.clone(),
        )));
    }

    fn on_progress(&mut self, progress: TurnProgress) {
        if self.mode == SessionMode::Duplex {
            self.on_duplex_progress(progress);
            return;
        }
        match progress {
            TurnProgress::TranscriptDiscarded { transcript } => {
                self.advance(TurnTrigger::TranscriptDiscarded);
                self.emit(SessionEvent::TurnDiscarded {
                    reason: format!("transcript too short: {transcript:?}"),
                });
                self.set_status(self.resting_status());
            }
            TurnProgress::Transcribed(text) => {
                self.advance(TurnTrigger::Transcribed);
                self.history.push(Role::User, text.clone());
                self.emit(SessionEvent::UserTranscript { text });
            }
            TurnProgress::Generated(text) => {
                self.advance(TurnTrigger::Generated);
                self.history.push(Role::Model, text.clone());
                self.emit(SessionEvent::ModelReply { text });
            }
            TurnProgress::Synthesized(audio) => {
                if self.advance(TurnTrigger::Synthesized) {
                    self.schedule(audio);
                }
            }
            TurnProgress::Cooling { cooldown } => {
                self.set_status(SessionStatus::RateLimited {
                    retry_in_ms: cooldown.as_millis() as u64,
                });
            }
            TurnProgress::Failed { kind, message } => {
                self.advance(TurnTrigger::Failed);
                let cooled_down = matches!(*self.status.borrow(), SessionStatus::RateLimited { .. });
                if kind != ErrorKind::Decode && !cooled_down {
                    self.set_status(SessionStatus::Error(message));
                }
                self.set_status(self.resting_status());
            }
        }
    }

    // --- duplex link ------------------------------------------------------

    fn on_link_event(&mut self, event: LinkEvent) -> Option<SessionEnd> {
        match event {
            LinkEvent::Opened => {
                if !self.capture.is_active() {
                    if let Err(end) = self.arm_microphone() {
                        return Some(end);
                    }
                }
                info!("🔗 Voice link open, microphone armed");
                self.set_status(self.resting_status());
            }
            LinkEvent::Audio(bytes) => {
                if self.config.duplex.reply_audio != ReplyAudioSource::Native {
                    return None;
                }
                match decode_pcm16(&bytes) {
                    Ok(samples) => {
                        self.schedule(DecodedAudio::new(samples, self.config.playback.sample_rate))
                    }
                    Err(e) => warn!("Skipping reply frame: {}", e),
                }
            }
            LinkEvent::Transcript(text) => self.transcript.push_str(&text),
            LinkEvent::Interrupted => {
                let cancelled = self.cancel_playback();
                self.transcript.clear();
                info!(cancelled, "⚡ Remote interruption");
                self.emit(SessionEvent::RemoteInterrupted { cancelled });
                self.set_status(self.resting_status());
            }
            LinkEvent::TurnComplete => self.complete_remote_turn(),
            LinkEvent::Closed => {
                info!("🔌 Voice link closed");
                return Some(SessionEnd::RemoteClosed);
            }
            LinkEvent::Error(message) => {
                error!("🔌 Voice link failed: {}", message);
                return Some(SessionEnd::TransportFailed(message));
            }
        }
        None
    }

    fn complete_remote_turn(&mut self) {
        let text = std::mem::take(&mut self.transcript);
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.history.push(Role::Model, text);
        self.emit(SessionEvent::ModelReply {
            text: text.to_string(),
        });

        if self.config.duplex.reply_audio == ReplyAudioSource::Synthesized {
            let ctx = self.turn_ctx.clone();
            let progress = self.progress_tx.clone();
            let text = text.to_string();
            self.tasks.retain(|t| !t.is_finished());
            self.tasks.push(tokio::spawn(async move {
                let result = ctx
                    .tts
                    .synthesize(&text, &ctx.voice, ctx.retry)
                    .await
                    .and_then(|audio| audio.decode());
                let message = match result {
                    Ok(audio) => TurnProgress::Synthesized(audio),
                    Err(e) => TurnProgress::Failed {
                        kind: e.kind(),
                        message: e.to_string(),
                    },
                };
                let _ = progress.send(message);
            }));
        }
    }

    fn on_duplex_progress(&mut self, progress: TurnProgress) {
        match progress {
            TurnProgress::Synthesized(audio) => {
                // The synthesized reply replaces anything still queued for this turn.
                self.cancel_playback();
                self.schedule(audio);
            }
            TurnProgress::Failed { kind, message } => {
                warn!("Reply synthesis failed: {}", message);
                if kind != ErrorKind::Decode {
                    self.set_status(SessionStatus::Error(message));
                }
                self.set_status(self.resting_status());
            }
            other => debug!(?other, "ignoring batch progress in duplex mode"),
        }
    }

    // --- visual tick ------------------------------------------------------

    fn on_tick(&mut self) {
        let events = self.scheduler.reap();
        if !events.is_empty() {
            self.publish_playback();
        }
        for event in events {
            if event == PlaybackEvent::Drained {
                self.on_drained();
            }
        }

        let window = self.scheduler.sample_window(self.lipsync.fft_size());
        let frame = self.lipsync.tick(window.as_ref().map(|(samples, _)| samples.as_slice()));
        self.publish_lipsync(frame);
    }

    fn on_drained(&mut self) {
        debug!("avatar finished speaking");
        self.emit(SessionEvent::AvatarFinishedSpeaking);
        if self.mode == SessionMode::Batch && self.stage == TurnStage::Speaking {
            self.advance(TurnTrigger::PlaybackFinished);
        }
        self.set_status(self.resting_status());
    }

    // --- teardown ---------------------------------------------------------

    fn teardown(&mut self, end: &SessionEnd) {
        self.capture.stop();
        self.scheduler.cancel_all();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.link_out = None;
        self.lipsync.reset();
        self.publish_lipsync(LipSyncFrame::idle());
        self.publish_playback();
        // Mute must not mask the terminal status.
        self.muted = false;
        self.set_status(end.status());
        info!(?end, "🛑 Voice session ended");
    }
}
