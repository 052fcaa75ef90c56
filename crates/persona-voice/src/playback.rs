//! Playback scheduling on a gapless output timeline
//!
//! The scheduler owns the output device and the set of in-flight segments. Each
//! segment starts at `max(next_start, clock.now())` and pushes `next_start` forward
//! by its duration, so frames that arrive irregularly still play back-to-back.
//! `cancel_all` stops the device, empties the set and snaps `next_start` to the
//! current clock value.

use crate::audio::DecodedAudio;
use crate::error::{VoiceError, VoiceResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Output timeline clock in seconds.
pub trait OutputClock: Send + Sync {
    fn now(&self) -> f64;
}

/// Seconds elapsed since creation, on the tokio clock.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputClock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock for tests and offline rendering.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, secs: f64) {
        *self.now.lock() = secs;
    }

    pub fn advance(&self, secs: f64) {
        *self.now.lock() += secs;
    }
}

impl OutputClock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}

/// A device that plays decoded segments in submission order.
pub trait AudioOutput: Send {
    fn play(&mut self, audio: &DecodedAudio) -> VoiceResult<()>;

    /// Stop everything queued or playing. Must be safe to call repeatedly.
    fn stop_all(&mut self);
}

/// Discards audio. For headless runs.
#[derive(Debug, Default)]
pub struct SilentOutput;

impl AudioOutput for SilentOutput {
    fn play(&mut self, audio: &DecodedAudio) -> VoiceResult<()> {
        debug!(samples = audio.samples.len(), "silent output dropped segment");
        Ok(())
    }

    fn stop_all(&mut self) {}
}

enum OutputCommand {
    Play(DecodedAudio),
    Stop,
}

/// Speaker output using Rodio.
///
/// The rodio output stream is not `Send`, so a dedicated thread owns it and
/// receives commands over a channel. Stopping replaces the sink outright.
pub struct RodioOutput {
    commands: std_mpsc::Sender<OutputCommand>,
}

impl RodioOutput {
    /// Open the default output device.
    pub fn open_default() -> VoiceResult<Self> {
        info!("🔊 Initializing audio playback");
        let (commands, command_rx) = std_mpsc::channel::<OutputCommand>();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<VoiceResult<()>>(1);

        std::thread::Builder::new()
            .name("persona-voice-output".to_string())
            .spawn(move || {
                let (_stream, handle) = match rodio::OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(VoiceError::Playback(e.to_string())));
                        return;
                    }
                };
                let mut sink = match rodio::Sink::try_new(&handle) {
                    Ok(sink) => sink,
                    Err(e) => {
                        let _ = ready_tx.send(Err(VoiceError::Playback(e.to_string())));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                while let Ok(command) = command_rx.recv() {
                    match command {
                        OutputCommand::Play(audio) => {
                            sink.append(rodio::buffer::SamplesBuffer::new(
                                1,
                                audio.sample_rate,
                                audio.samples,
                            ));
                        }
                        OutputCommand::Stop => {
                            sink.stop();
                            match rodio::Sink::try_new(&handle) {
                                Ok(fresh) => sink = fresh,
                                Err(e) => {
                                    warn!("Failed to recreate output sink: {}", e);
                                    break;
                                }
                            }
                        }
                    }
                }
                debug!("output thread exiting");
            })?;

        ready_rx
            .recv()
            .map_err(|_| VoiceError::Playback("output thread exited during setup".to_string()))??;
        info!("✅ Audio playback initialized");
        Ok(Self { commands })
    }
}

impl AudioOutput for RodioOutput {
    fn play(&mut self, audio: &DecodedAudio) -> VoiceResult<()> {
        self.commands
            .send(OutputCommand::Play(audio.clone()))
            .map_err(|_| VoiceError::Playback("output thread is gone".to_string()))
    }

    fn stop_all(&mut self) {
        if self.commands.send(OutputCommand::Stop).is_err() {
            debug!("stop requested after output thread exit");
        }
    }
}

/// How many segments may be in flight at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPolicy {
    /// Batch replies: scheduling a segment cancels the previous one.
    Single,
    /// Streamed replies: segments queue back-to-back.
    Queue,
}

/// Opaque id of a scheduled segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentHandle(u64);

#[derive(Debug)]
struct PlaybackSegment {
    handle: SegmentHandle,
    audio: Arc<DecodedAudio>,
    start: f64,
    duration: f64,
}

impl PlaybackSegment {
    fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Completion notifications produced by [`PlaybackScheduler::reap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    SegmentEnded(SegmentHandle),
    /// The last active segment ended naturally.
    Drained,
}

/// Owns the output device and the in-flight segment set.
pub struct PlaybackScheduler {
    policy: SlotPolicy,
    clock: Arc<dyn OutputClock>,
    output: Box<dyn AudioOutput>,
    active: VecDeque<PlaybackSegment>,
    next_start: f64,
    next_id: u64,
}

impl PlaybackScheduler {
    pub fn new(policy: SlotPolicy, clock: Arc<dyn OutputClock>, output: Box<dyn AudioOutput>) -> Self {
        let next_start = clock.now();
        Self {
            policy,
            clock,
            output,
            active: VecDeque::new(),
            next_start,
            next_id: 0,
        }
    }

    /// Place `audio` on the timeline and hand it to the device.
    pub fn schedule(&mut self, audio: DecodedAudio) -> VoiceResult<SegmentHandle> {
        if self.policy == SlotPolicy::Single && !self.active.is_empty() {
            self.cancel_all();
        }

        let now = self.clock.now();
        let start = self.next_start.max(now);
        let duration = audio.duration_secs();

        self.output.play(&audio)?;

        let handle = SegmentHandle(self.next_id);
        self.next_id += 1;
        self.next_start = start + duration;
        debug!(
            segment = handle.0,
            start,
            duration,
            queued = self.active.len() + 1,
            "segment scheduled"
        );
        self.active.push_back(PlaybackSegment {
            handle,
            audio: Arc::new(audio),
            start,
            duration,
        });
        Ok(handle)
    }

    /// Stop every segment, clear the set and reset the timeline to now.
    /// Returns how many segments were cancelled; zero on an empty scheduler.
    pub fn cancel_all(&mut self) -> usize {
        self.output.stop_all();
        let cancelled = self.active.len();
        self.active.clear();
        self.next_start = self.clock.now();
        if cancelled > 0 {
            info!(cancelled, "⏹️ Playback cancelled");
        }
        cancelled
    }

    /// Retire segments whose end time has passed.
    pub fn reap(&mut self) -> Vec<PlaybackEvent> {
        let now = self.clock.now();
        let mut events = Vec::new();
        while let Some(front) = self.active.front() {
            if front.end() > now {
                break;
            }
            if let Some(done) = self.active.pop_front() {
                events.push(PlaybackEvent::SegmentEnded(done.handle));
            }
        }
        if !events.is_empty() && self.active.is_empty() {
            events.push(PlaybackEvent::Drained);
        }
        events
    }

    /// Up to `len` samples of whatever is audible right now, or `None` when idle.
    pub fn sample_window(&self, len: usize) -> Option<(Vec<f32>, u32)> {
        let now = self.clock.now();
        let segment = self
            .active
            .iter()
            .find(|s| s.start <= now && now < s.end())?;
        let offset = ((now - segment.start) * segment.audio.sample_rate as f64) as usize;
        let samples = &segment.audio.samples;
        let from = offset.min(samples.len());
        let to = (from + len).min(samples.len());
        let mut window = samples[from..to].to_vec();
        window.resize(len, 0.0);
        Some((window, segment.audio.sample_rate))
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn is_playing(&self) -> bool {
        !self.active.is_empty()
    }

    /// Start time the next scheduled segment would receive (before clamping to now).
    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    /// Scheduled `(start, duration)` pairs in play order.
    pub fn timeline(&self) -> Vec<(f64, f64)> {
        self.active.iter().map(|s| (s.start, s.duration)).collect()
    }

    pub fn clock(&self) -> &Arc<dyn OutputClock> {
        &self.clock
    }
}
