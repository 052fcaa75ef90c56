//! Batch turn pipeline
//!
//! `Listening -> Finalizing -> Transcribing -> Generating -> Synthesizing -> Speaking -> Listening`
//!
//! The session actor owns the [`TurnStage`] and the [`TurnBuffer`]. When a turn is
//! accepted, the network stages run in a spawned [`run_turn`] task that reports
//! [`TurnProgress`] back over a channel; only the actor advances the stage, so
//! two turns can never overlap.

use crate::audio::{encode_pcm16, wav_from_pcm16, AudioFrame, DecodedAudio};
use crate::error::{ErrorKind, VoiceError, VoiceResult};
use crate::history::HistoryEntry;
use crate::services::{retry, ResponseGenerator, RetryPolicy, SpeechToText, TtsChain, VoiceSpec};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Where the batch pipeline is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStage {
    Listening,
    Finalizing,
    Transcribing,
    Generating,
    Synthesizing,
    Speaking,
}

/// Inputs that move the pipeline between stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnTrigger {
    SilenceConfirmed,
    BufferDiscarded,
    BufferAccepted,
    TranscriptDiscarded,
    Transcribed,
    Generated,
    Synthesized,
    PlaybackFinished,
    BargeIn,
    Failed,
}

impl TurnStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnStage::Listening => "listening",
            TurnStage::Finalizing => "finalizing",
            TurnStage::Transcribing => "transcribing",
            TurnStage::Generating => "generating",
            TurnStage::Synthesizing => "synthesizing",
            TurnStage::Speaking => "speaking",
        }
    }

    /// Whether a network stage is in flight (new turns are refused).
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            TurnStage::Finalizing | TurnStage::Transcribing | TurnStage::Generating | TurnStage::Synthesizing
        )
    }

    /// The only legal transitions. Anything else is `IllegalTransition`.
    pub fn next(self, trigger: TurnTrigger) -> VoiceResult<TurnStage> {
        use TurnStage::*;
        use TurnTrigger as T;

        let next = match (self, trigger) {
            (Listening | Speaking, T::SilenceConfirmed) => Finalizing,
            (Finalizing, T::BufferDiscarded) => Listening,
            (Finalizing, T::BufferAccepted) => Transcribing,
            (Transcribing, T::TranscriptDiscarded) => Listening,
            (Transcribing, T::Transcribed) => Generating,
            (Generating, T::Generated) => Synthesizing,
            (Synthesizing, T::Synthesized) => Speaking,
            (Speaking, T::PlaybackFinished | T::BargeIn) => Listening,
            (Transcribing | Generating | Synthesizing, T::Failed) => Listening,
            (from, trigger) => {
                return Err(VoiceError::IllegalTransition {
                    from: from.as_str(),
                    trigger: trigger.as_str(),
                })
            }
        };
        debug!(from = self.as_str(), to = next.as_str(), "turn stage");
        Ok(next)
    }
}

impl TurnTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnTrigger::SilenceConfirmed => "silence_confirmed",
            TurnTrigger::BufferDiscarded => "buffer_discarded",
            TurnTrigger::BufferAccepted => "buffer_accepted",
            TurnTrigger::TranscriptDiscarded => "transcript_discarded",
            TurnTrigger::Transcribed => "transcribed",
            TurnTrigger::Generated => "generated",
            TurnTrigger::Synthesized => "synthesized",
            TurnTrigger::PlaybackFinished => "playback_finished",
            TurnTrigger::BargeIn => "barge_in",
            TurnTrigger::Failed => "failed",
        }
    }
}

/// PCM16 recording of the current utterance, capped to the most recent audio.
///
/// Also counts voiced samples (RMS above the VAD threshold): every finalized
/// buffer carries the trailing silence that confirmed the turn, so its raw size
/// says nothing about whether anything was said.
#[derive(Debug)]
pub struct TurnBuffer {
    bytes: Vec<u8>,
    voiced_samples: usize,
    max_bytes: usize,
    sample_rate: u32,
    voiced_threshold: f32,
}

/// A finalized recording.
#[derive(Debug, Clone)]
pub struct FrozenTurn {
    pub pcm: Vec<u8>,
    pub voiced: Duration,
}

impl TurnBuffer {
    pub fn new(sample_rate: u32, max_duration: Duration, voiced_threshold: f32) -> Self {
        let max_bytes = (max_duration.as_secs_f64() * sample_rate as f64) as usize * 2;
        Self {
            bytes: Vec::new(),
            voiced_samples: 0,
            max_bytes: max_bytes.max(2),
            sample_rate,
            voiced_threshold,
        }
    }

    pub fn push(&mut self, frame: &AudioFrame) {
        self.bytes.extend_from_slice(&encode_pcm16(&frame.samples));
        if frame.rms() > self.voiced_threshold {
            self.voiced_samples += frame.samples.len();
        }
        if self.bytes.len() > self.max_bytes {
            let excess = self.bytes.len() - self.max_bytes;
            self.bytes.drain(..excess);
            self.voiced_samples = self.voiced_samples.min(self.bytes.len() / 2);
        }
    }

    /// Freeze the recording and start a fresh one in its place.
    pub fn take(&mut self) -> FrozenTurn {
        let voiced = Duration::from_secs_f64(self.voiced_samples as f64 / self.sample_rate as f64);
        self.voiced_samples = 0;
        FrozenTurn {
            pcm: std::mem::take(&mut self.bytes),
            voiced,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Everything the network stages need. Cheap to clone into a task.
#[derive(Clone)]
pub struct TurnContext {
    pub stt: Arc<dyn SpeechToText>,
    pub generator: Arc<dyn ResponseGenerator>,
    pub tts: TtsChain,
    pub persona: String,
    pub voice: VoiceSpec,
    pub retry: RetryPolicy,
    pub min_transcript_chars: usize,
    pub rate_limit_cooldown: Duration,
}

/// One finalized utterance plus the history window it is answered against.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub pcm: Vec<u8>,
    pub sample_rate: u32,
    pub history: Vec<HistoryEntry>,
}

/// Messages from a running turn to the session actor.
#[derive(Debug, Clone)]
pub enum TurnProgress {
    /// Transcript too short; nothing else follows.
    TranscriptDiscarded { transcript: String },
    Transcribed(String),
    Generated(String),
    Synthesized(DecodedAudio),
    /// Rate-limit retries exhausted; the turn waits out `cooldown` before `Failed`.
    Cooling { cooldown: Duration },
    Failed { kind: ErrorKind, message: String },
}

/// Run transcription, generation and synthesis for one turn.
pub async fn run_turn(ctx: TurnContext, request: TurnRequest, progress: mpsc::UnboundedSender<TurnProgress>) {
    if let Err(e) = drive_turn(&ctx, request, &progress).await {
        if e.is_rate_limited() {
            warn!("⏳ {}; cooling down for {:?}", e, ctx.rate_limit_cooldown);
            let _ = progress.send(TurnProgress::Cooling {
                cooldown: ctx.rate_limit_cooldown,
            });
            tokio::time::sleep(ctx.rate_limit_cooldown).await;
        } else if e.kind() == ErrorKind::Decode {
            warn!("Skipping reply audio: {}", e);
        } else {
            warn!("Turn abandoned: {}", e);
        }
        let _ = progress.send(TurnProgress::Failed {
            kind: e.kind(),
            message: e.to_string(),
        });
    }
}

async fn drive_turn(
    ctx: &TurnContext,
    request: TurnRequest,
    progress: &mpsc::UnboundedSender<TurnProgress>,
) -> VoiceResult<()> {
    let send = |p: TurnProgress| {
        progress
            .send(p)
            .map_err(|e| VoiceError::ChannelSend(e.to_string()))
    };

    let wav = wav_from_pcm16(&request.pcm, request.sample_rate);
    let transcript = retry(ctx.retry, "stt", || ctx.stt.transcribe(&wav, "audio/wav")).await?;
    let transcript = transcript.trim().to_string();
    if transcript.chars().count() < ctx.min_transcript_chars {
        debug!(transcript = %transcript, "transcript too short, discarding");
        return send(TurnProgress::TranscriptDiscarded { transcript });
    }
    info!("📝 User: {}", transcript);
    send(TurnProgress::Transcribed(transcript.clone()))?;

    let reply = retry(ctx.retry, "generation", || {
        ctx.generator.respond(&ctx.persona, &request.history, &transcript)
    })
    .await?;
    info!("💬 Persona: {}", reply);
    send(TurnProgress::Generated(reply.clone()))?;

    let audio = ctx.tts.synthesize(&reply, &ctx.voice, ctx.retry).await?.decode()?;
    if audio.is_empty() {
        return Err(VoiceError::Decode("reply audio decoded to no samples".to_string()));
    }
    send(TurnProgress::Synthesized(audio))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_cycle() {
        let mut stage = TurnStage::Listening;
        for trigger in [
            TurnTrigger::SilenceConfirmed,
            TurnTrigger::BufferAccepted,
            TurnTrigger::Transcribed,
            TurnTrigger::Generated,
            TurnTrigger::Synthesized,
            TurnTrigger::PlaybackFinished,
        ] {
            stage = stage.next(trigger).unwrap();
        }
        assert_eq!(stage, TurnStage::Listening);
    }

    #[test]
    fn busy_stages_refuse_a_second_turn() {
        for stage in [
            TurnStage::Finalizing,
            TurnStage::Transcribing,
            TurnStage::Generating,
            TurnStage::Synthesizing,
        ] {
            assert!(stage.is_busy());
            let err = stage.next(TurnTrigger::SilenceConfirmed).unwrap_err();
            assert!(matches!(err, VoiceError::IllegalTransition { .. }));
        }
        assert!(!TurnStage::Listening.is_busy());
        assert!(!TurnStage::Speaking.is_busy());
    }

    #[test]
    fn discards_and_failures_return_to_listening() {
        assert_eq!(
            TurnStage::Finalizing.next(TurnTrigger::BufferDiscarded).unwrap(),
            TurnStage::Listening
        );
        assert_eq!(
            TurnStage::Transcribing.next(TurnTrigger::TranscriptDiscarded).unwrap(),
            TurnStage::Listening
        );
        assert_eq!(
            TurnStage::Generating.next(TurnTrigger::Failed).unwrap(),
            TurnStage::Listening
        );
        assert!(TurnStage::Listening.next(TurnTrigger::Failed).is_err());
        assert!(TurnStage::Listening.next(TurnTrigger::Synthesized).is_err());
    }

    #[test]
    fn buffer_take_starts_fresh() {
        let mut buffer = TurnBuffer::new(16000, Duration::from_secs(30), 0.02);
        buffer.push(&AudioFrame::new(vec![0.1; 480], 16000));
        assert_eq!(buffer.len(), 960);
        let frozen = buffer.take();
        assert_eq!(frozen.pcm.len(), 960);
        assert_eq!(frozen.voiced, Duration::from_millis(30));
        assert!(buffer.is_empty());
        buffer.push(&AudioFrame::new(vec![0.0; 480], 16000));
        assert_eq!(buffer.len(), 960);
        assert_eq!(buffer.take().voiced, Duration::ZERO);
    }

    #[test]
    fn silence_does_not_count_as_voiced() {
        let mut buffer = TurnBuffer::new(16000, Duration::from_secs(30), 0.02);
        for _ in 0..5 {
            buffer.push(&AudioFrame::new(vec![0.3; 480], 16000));
        }
        for _ in 0..70 {
            buffer.push(&AudioFrame::new(vec![0.001; 480], 16000));
        }
        let frozen = buffer.take();
        assert_eq!(frozen.pcm.len(), 75 * 960);
        assert_eq!(frozen.voiced, Duration::from_millis(150));
    }

    #[test]
    fn buffer_keeps_only_the_most_recent_audio() {
        // 100ms cap at 16kHz = 3200 bytes
        let mut buffer = TurnBuffer::new(16000, Duration::from_millis(100), 0.02);
        for _ in 0..10 {
            buffer.push(&AudioFrame::new(vec![0.5; 480], 16000));
        }
        buffer.push(&AudioFrame::new(vec![0.25; 480], 16000));
        assert_eq!(buffer.len(), 3200);
        let frozen = buffer.take();
        assert_eq!(frozen.voiced, Duration::from_millis(100));
        let tail = i16::from_le_bytes([frozen.pcm[3198], frozen.pcm[3199]]);
        assert_eq!(tail, (0.25 * i16::MAX as f32).round() as i16);
    }
}
