//! Audio seams of the voice agent.
//!
//! The agent only sees these traits; the cpal implementation lives behind the
//! `native` feature so the crate builds on hosts without audio libraries.

use crate::error::AgentError;
use tokio::sync::mpsc;

/// Opens the two audio endpoints of a voice session.
pub trait AudioBackend: Send + Sync {
    /// Acquires the microphone. Refusal or a missing device is `PermissionDenied`.
    fn open_microphone(&self) -> Result<Box<dyn CaptureStream>, AgentError>;

    fn open_speaker(&self) -> anyhow::Result<Box<dyn PlaybackSink>>;
}

/// A held microphone. Frames are mono at [`CaptureStream::sample_rate`].
pub trait CaptureStream: Send {
    fn sample_rate(&self) -> u32;

    /// Hands out the frame receiver. Only the first call returns it.
    fn take_frames(&mut self) -> Option<mpsc::Receiver<Vec<f32>>>;

    /// Starts forwarding frames. Nothing is delivered before this.
    fn resume(&mut self);

    /// Releases the microphone. Idempotent.
    fn stop(&mut self);
}

/// The output side: 24 kHz mono buffers placed on a monotonic clock.
pub trait PlaybackSink: Send {
    /// Output clock in seconds.
    fn now(&self) -> f64;

    fn play_at(&mut self, start: f64, samples: &[f32]);

    /// Plays out anything held back between buffers. Called when a turn ends.
    fn flush(&mut self) {}

    /// Drops audio that has not played yet.
    fn clear(&mut self);

    /// Releases the speaker. Idempotent.
    fn close(&mut self);
}

#[cfg(feature = "native")]
pub use native::NativeAudio;

#[cfg(feature = "native")]
mod native {
    use super::{AudioBackend, CaptureStream, PlaybackSink};
    use crate::error::AgentError;
    use crate::utils::device::{self, InputHandle, OutputHandle};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// Frames queued between the device thread and the session task.
    const CAPTURE_QUEUE: usize = 256;

    /// Default (or named) cpal input and output devices.
    #[derive(Debug, Clone, Default)]
    pub struct NativeAudio {
        input_device: Option<String>,
        output_device: Option<String>,
    }

    impl NativeAudio {
        pub fn new(input_device: Option<String>, output_device: Option<String>) -> Self {
            Self {
                input_device,
                output_device,
            }
        }
    }

    struct NativeCapture {
        handle: InputHandle,
        gate: Arc<AtomicBool>,
        frames: Option<mpsc::Receiver<Vec<f32>>>,
    }

    impl CaptureStream for NativeCapture {
        fn sample_rate(&self) -> u32 {
            self.handle.sample_rate()
        }

        fn take_frames(&mut self) -> Option<mpsc::Receiver<Vec<f32>>> {
            self.frames.take()
        }

        fn resume(&mut self) {
            self.gate.store(true, Ordering::Release);
        }

        fn stop(&mut self) {
            self.gate.store(false, Ordering::Release);
            self.handle.stop();
        }
    }

    impl PlaybackSink for OutputHandle {
        fn now(&self) -> f64 {
            OutputHandle::now(self)
        }

        fn play_at(&mut self, start: f64, samples: &[f32]) {
            OutputHandle::play_at(self, start, samples)
        }

        fn flush(&mut self) {
            OutputHandle::flush(self)
        }

        fn clear(&mut self) {
            OutputHandle::clear(self)
        }

        fn close(&mut self) {
            OutputHandle::close(self)
        }
    }

    impl AudioBackend for NativeAudio {
        fn open_microphone(&self) -> Result<Box<dyn CaptureStream>, AgentError> {
            let gate = Arc::new(AtomicBool::new(false));
            let (frames_tx, frames_rx) = mpsc::channel(CAPTURE_QUEUE);
            let handle = device::spawn_input(self.input_device.clone(), gate.clone(), frames_tx)
                .map_err(|e| AgentError::PermissionDenied(format!("{e:#}")))?;
            Ok(Box::new(NativeCapture {
                handle,
                gate,
                frames: Some(frames_rx),
            }))
        }

        fn open_speaker(&self) -> anyhow::Result<Box<dyn PlaybackSink>> {
            Ok(Box::new(device::spawn_output(self.output_device.clone())?))
        }
    }
}
