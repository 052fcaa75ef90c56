//! Capture controller and microphone sources
//!
//! A [`MicrophoneSource`] opens a live stream that pushes raw samples into a
//! [`FrameSink`]. The sink assembles fixed-size frames, drops them while muted and
//! forwards the rest to the session over an unbounded channel, so the device
//! callback never waits on the pipeline.

use crate::audio::{AudioFrame, FrameAssembler};
use crate::config::CaptureConfig;
use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Receives raw device samples and forwards assembled frames.
pub struct FrameSink {
    assembler: FrameAssembler,
    muted: Arc<AtomicBool>,
    frames: mpsc::UnboundedSender<AudioFrame>,
}

impl FrameSink {
    pub fn new(
        config: &CaptureConfig,
        muted: Arc<AtomicBool>,
        frames: mpsc::UnboundedSender<AudioFrame>,
    ) -> Self {
        Self {
            assembler: FrameAssembler::new(config.frame_size, config.sample_rate),
            muted,
            frames,
        }
    }

    /// Push samples from a device callback. Returns `false` once the session side
    /// has gone away.
    pub fn push_samples(&mut self, data: &[f32]) -> bool {
        if self.muted.load(Ordering::Relaxed) {
            self.assembler.clear();
            return !self.frames.is_closed();
        }
        let frames = &self.frames;
        let mut open = true;
        self.assembler.push(data, |frame| {
            if frames.send(frame).is_err() {
                open = false;
            }
        });
        open
    }
}

/// A live capture stream. Dropping or stopping it releases the device.
pub trait CaptureStream: Send {
    fn stop(&mut self);
}

/// Something that can hand out a microphone stream.
pub trait MicrophoneSource: Send {
    /// Open the device and start pushing into `sink`. Failure is a permission or
    /// availability error and is not retried.
    fn open(&mut self, sink: FrameSink) -> VoiceResult<Box<dyn CaptureStream>>;
}

/// Owns the microphone for one session: start, stop and mute.
pub struct CaptureController {
    config: CaptureConfig,
    source: Box<dyn MicrophoneSource>,
    stream: Option<Box<dyn CaptureStream>>,
    muted: Arc<AtomicBool>,
}

impl CaptureController {
    pub fn new(config: CaptureConfig, source: Box<dyn MicrophoneSource>) -> Self {
        Self {
            config,
            source,
            stream: None,
            muted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start delivering frames to `frames`. A second call while active is a no-op.
    pub fn start(&mut self, frames: mpsc::UnboundedSender<AudioFrame>) -> VoiceResult<()> {
        if self.stream.is_some() {
            debug!("capture already active");
            return Ok(());
        }
        let sink = FrameSink::new(&self.config, self.muted.clone(), frames);
        let stream = self.source.open(sink)?;
        self.stream = Some(stream);
        info!("▶️ Capture started");
        Ok(())
    }

    /// Release the microphone. Safe to call when not started.
    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            info!("⏹️ Capture stopped");
        }
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Default-host microphone via CPAL.
///
/// The cpal `Stream` is not `Send`, so it lives on a dedicated thread that
/// reports the open result back and then parks until stopped.
#[derive(Debug, Clone)]
pub struct CpalMicrophone {
    sample_rate: u32,
    device_name: Option<String>,
}

impl CpalMicrophone {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            device_name: None,
        }
    }

    /// Use a named input device instead of the host default.
    pub fn with_device(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    /// List available input devices
    pub fn list_input_devices() -> VoiceResult<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }

    fn build(
        sample_rate: u32,
        device_name: Option<&str>,
        mut sink: FrameSink,
    ) -> VoiceResult<cpal::Stream> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .input_devices()?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| VoiceError::MicrophoneUnavailable(format!("no input device named {name}")))?,
            None => host
                .default_input_device()
                .ok_or_else(|| VoiceError::MicrophoneUnavailable("No input device available".to_string()))?,
        };
        info!(
            "📱 Using input device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let default_config = device.default_input_config()?;
        debug!("🔧 Default config: {:?}", default_config);

        let stream_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                sink.push_samples(data);
            },
            move |err| {
                warn!("Audio stream error: {}", err);
            },
            None,
        )?;
        stream.play()?;
        Ok(stream)
    }
}

impl MicrophoneSource for CpalMicrophone {
    fn open(&mut self, sink: FrameSink) -> VoiceResult<Box<dyn CaptureStream>> {
        info!("🎤 Initializing audio capture ({}Hz, mono)", self.sample_rate);
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<VoiceResult<()>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let sample_rate = self.sample_rate;
        let device_name = self.device_name.clone();

        let thread = std::thread::Builder::new()
            .name("persona-voice-capture".to_string())
            .spawn(move || {
                let stream = match Self::build(sample_rate, device_name.as_deref(), sink) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Park until stopped or the controller is dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalCapture {
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(VoiceError::MicrophoneUnavailable(
                "capture thread exited during setup".to_string(),
            )),
        }
    }
}

struct CpalCapture {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureStream for CpalCapture {
    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("capture thread panicked");
            }
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A microphone fed by the caller: network clients, file playback, tests.
#[derive(Clone, Default)]
pub struct PushMicrophone {
    sink: Arc<Mutex<Option<FrameSink>>>,
    denied: Option<String>,
}

impl PushMicrophone {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose `open` always fails as if permission were refused.
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            sink: Arc::default(),
            denied: Some(reason.into()),
        }
    }

    /// Push samples. Returns `false` while the stream is not open.
    pub fn push(&self, samples: &[f32]) -> bool {
        match self.sink.lock().as_mut() {
            Some(sink) => sink.push_samples(samples),
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.sink.lock().is_some()
    }
}

impl MicrophoneSource for PushMicrophone {
    fn open(&mut self, sink: FrameSink) -> VoiceResult<Box<dyn CaptureStream>> {
        if let Some(reason) = &self.denied {
            return Err(VoiceError::MicrophoneUnavailable(reason.clone()));
        }
        *self.sink.lock() = Some(sink);
        Ok(Box::new(PushStream {
            sink: self.sink.clone(),
        }))
    }
}

struct PushStream {
    sink: Arc<Mutex<Option<FrameSink>>>,
}

impl CaptureStream for PushStream {
    fn stop(&mut self) {
        self.sink.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CaptureConfig {
        CaptureConfig {
            sample_rate: 16000,
            frame_size: 160,
        }
    }

    #[tokio::test]
    async fn push_microphone_delivers_frames() {
        let mic = PushMicrophone::new();
        let mut controller = CaptureController::new(config(), Box::new(mic.clone()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(!mic.push(&[0.1; 160]), "not open yet");

        controller.start(tx).unwrap();
        assert!(mic.push(&[0.1; 400]));
        assert_eq!(rx.recv().await.unwrap().samples.len(), 160);
        assert_eq!(rx.recv().await.unwrap().samples.len(), 160);
        assert!(rx.try_recv().is_err());

        controller.stop();
        assert!(!mic.is_open());
        assert!(!controller.is_active());
        controller.stop();
    }

    #[tokio::test]
    async fn muted_frames_are_dropped() {
        let mic = PushMicrophone::new();
        let mut controller = CaptureController::new(config(), Box::new(mic.clone()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        controller.start(tx).unwrap();

        controller.set_muted(true);
        mic.push(&[0.5; 100]);
        mic.push(&[0.5; 1600]);
        assert!(rx.try_recv().is_err());

        controller.set_muted(false);
        mic.push(&[0.2; 160]);
        let frame = rx.recv().await.unwrap();
        assert!(frame.samples.iter().all(|&s| (s - 0.2).abs() < 1e-6));
    }

    #[test]
    fn denied_microphone_is_a_permission_error() {
        let mut controller = CaptureController::new(config(), Box::new(PushMicrophone::denied("blocked")));
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = controller.start(tx).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Permission);
        assert!(!controller.is_active());
    }

    #[test]
    fn dropping_the_controller_releases_the_stream() {
        let mic = PushMicrophone::new();
        {
            let mut controller = CaptureController::new(config(), Box::new(mic.clone()));
            let (tx, _rx) = mpsc::unbounded_channel();
            controller.start(tx).unwrap();
            assert!(mic.is_open());
        }
        assert!(!mic.is_open());
    }

    #[test]
    #[ignore] // Requires an input device
    fn list_devices() {
        let devices = CpalMicrophone::list_input_devices().unwrap();
        println!("input devices: {devices:?}");
    }
}
