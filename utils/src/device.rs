//! Microphone and speaker access through cpal.
//!
//! cpal streams are not `Send`, so each one lives on its own thread and is
//! dropped there when the returned handle is stopped.

use crate::audio::{downmix, StreamResampler, OUTPUT_PCM16_SAMPLE_RATE};
use anyhow::{anyhow, Context};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Device;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Seconds of audio the speaker can hold queued.
const OUTPUT_BUFFER_SECONDS: usize = 30;
const OUTPUT_CHUNK_SIZE: usize = 1024;

fn get_host() -> cpal::Host {
    cpal::default_host()
}

fn find_device(
    devices: impl Iterator<Item = Device>,
    default: Option<Device>,
    device_name: Option<&str>,
) -> anyhow::Result<Device> {
    match device_name {
        None => default.ok_or_else(|| anyhow!("no default device")),
        Some(target) => devices
            .into_iter()
            .find(|d| d.name().is_ok_and(|name| name == target))
            .ok_or_else(|| anyhow!("no target device found: {}", target)),
    }
}

pub fn get_or_default_input(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    find_device(host.input_devices()?, host.default_input_device(), device_name)
}

pub fn get_or_default_output(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    find_device(host.output_devices()?, host.default_output_device(), device_name)
}

/// A running microphone stream. Dropping it stops capture.
pub struct InputHandle {
    sample_rate: u32,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl InputHandle {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Stops the stream and joins its thread. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("input stream thread panicked");
            }
        }
    }
}

impl Drop for InputHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Opens the input device and forwards mono frames to `frames`.
///
/// Frames are dropped while `gate` is false.
pub fn spawn_input(
    device_name: Option<String>,
    gate: Arc<AtomicBool>,
    frames: tokio::sync::mpsc::Sender<Vec<f32>>,
) -> anyhow::Result<InputHandle> {
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<anyhow::Result<u32>>();
    let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

    let thread = std::thread::spawn(move || {
        let stream = (|| -> anyhow::Result<(cpal::Stream, u32)> {
            let input = get_or_default_input(device_name.as_deref())?;
            tracing::info!("Using input device: {:?}", input.name()?);
            let config: cpal::StreamConfig = input
                .default_input_config()
                .context("failed to get default input config")?
                .into();
            let channels = config.channels as usize;
            let sample_rate = config.sample_rate.0;
            let stream = input.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !gate.load(Ordering::Acquire) {
                        return;
                    }
                    if let Err(e) = frames.try_send(downmix(data, channels)) {
                        tracing::warn!("failed to forward capture frame: {:?}", e);
                    }
                },
                |err| tracing::error!("an error occurred on input stream: {}", err),
                None,
            )?;
            stream.play()?;
            Ok((stream, sample_rate))
        })();

        match stream {
            Ok((stream, sample_rate)) => {
                let _ = ready_tx.send(Ok(sample_rate));
                let _ = stop_rx.recv();
                drop(stream);
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        }
    });

    let sample_rate = ready_rx
        .recv()
        .context("input stream thread exited before reporting")??;
    Ok(InputHandle {
        sample_rate,
        stop_tx: Some(stop_tx),
        thread: Some(thread),
    })
}

/// A running speaker stream fed from a ring buffer of 24 kHz model audio.
pub struct OutputHandle {
    device_rate: u32,
    producer: HeapProd<f32>,
    resampler: StreamResampler,
    /// Device frames consumed by the callback, silence included.
    played: Arc<AtomicU64>,
    /// Output-clock frame where the queued audio ends.
    written: u64,
    /// Samples ever pushed into the ring buffer.
    pushed: u64,
    /// Ring position below which queued samples are skipped.
    discard_before: Arc<AtomicU64>,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl OutputHandle {
    /// Output clock in seconds.
    pub fn now(&self) -> f64 {
        self.played.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }

    fn push(&mut self, samples: &[f32]) {
        let pushed = self.producer.push_slice(samples);
        if pushed < samples.len() {
            tracing::warn!("speaker buffer full, dropped {} samples", samples.len() - pushed);
        }
        self.pushed += pushed as u64;
        self.written += pushed as u64;
    }

    /// Queues 24 kHz mono samples to start at `start` seconds on the output clock.
    pub fn play_at(&mut self, start: f64, samples: &[f32]) {
        let played = self.played.load(Ordering::Acquire);
        // The callback pads underruns with silence, so the queue end can fall behind.
        self.written = self.written.max(played);

        let start_frame = (start * self.device_rate as f64) as u64;
        let queued_end = self.written + self.resampler.pending_output() as u64;
        if start_frame > queued_end {
            // Nothing continues the held-back tail, so it plays before the gap.
            self.flush();
            let gap = start_frame.saturating_sub(self.written) as usize;
            self.push(&vec![0.0; gap]);
        }

        let resampled = self.resampler.push(samples);
        self.push(&resampled);
    }

    /// Plays out audio still held back for resampling, e.g. at the end of a turn.
    pub fn flush(&mut self) {
        let tail = self.resampler.flush();
        self.push(&tail);
    }

    /// Stops the stream and joins its thread. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("output stream thread panicked");
            }
        }
    }

    /// Discards audio that has not played yet. Audio queued afterwards is kept.
    pub fn clear(&mut self) {
        self.resampler.clear();
        self.discard_before.store(self.pushed, Ordering::Release);
        self.written = self.played.load(Ordering::Acquire);
    }

    pub fn queued(&self) -> usize {
        self.producer.occupied_len()
    }
}

impl Drop for OutputHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Fills one callback buffer, first skipping samples queued before the last
/// clear. `popped` counts ring samples consumed so far. Returns device frames.
fn fill_output<C: Consumer<Item = f32>>(
    consumer: &mut C,
    popped: &mut u64,
    discard_before: u64,
    data: &mut [f32],
    channels: usize,
) -> u64 {
    if discard_before > *popped {
        *popped += consumer.skip((discard_before - *popped) as usize) as u64;
    }
    let mut frames = 0u64;
    for frame in data.chunks_mut(channels.max(1)) {
        let sample = match consumer.try_pop() {
            Some(sample) => {
                *popped += 1;
                sample
            }
            None => 0.0,
        };
        frame.iter_mut().for_each(|s| *s = sample);
        frames += 1;
    }
    frames
}

pub fn spawn_output(device_name: Option<String>) -> anyhow::Result<OutputHandle> {
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<anyhow::Result<(u32, HeapProd<f32>)>>();
    let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
    let played = Arc::new(AtomicU64::new(0));
    let clock = played.clone();
    let discard_before = Arc::new(AtomicU64::new(0));
    let discarding = discard_before.clone();

    let thread = std::thread::spawn(move || {
        let stream = (|| -> anyhow::Result<(cpal::Stream, u32, HeapProd<f32>)> {
            let output = get_or_default_output(device_name.as_deref())?;
            tracing::info!("Using output device: {:?}", output.name()?);
            let config: cpal::StreamConfig = output
                .default_output_config()
                .context("failed to get default output config")?
                .into();
            let channels = config.channels as usize;
            let sample_rate = config.sample_rate.0;
            let (producer, mut consumer): (HeapProd<f32>, HeapCons<f32>) =
                HeapRb::new(sample_rate as usize * OUTPUT_BUFFER_SECONDS).split();

            let mut popped = 0u64;
            let stream = output.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let discard = discarding.load(Ordering::Acquire);
                    let frames = fill_output(&mut consumer, &mut popped, discard, data, channels);
                    clock.fetch_add(frames, Ordering::AcqRel);
                },
                |err| tracing::error!("an error occurred on output stream: {}", err),
                None,
            )?;
            stream.play()?;
            Ok((stream, sample_rate, producer))
        })();

        match stream {
            Ok((stream, sample_rate, producer)) => {
                let _ = ready_tx.send(Ok((sample_rate, producer)));
                let _ = stop_rx.recv();
                drop(stream);
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        }
    });

    let (device_rate, producer) = ready_rx
        .recv()
        .context("output stream thread exited before reporting")??;
    let resampler = StreamResampler::new(OUTPUT_PCM16_SAMPLE_RATE, device_rate, OUTPUT_CHUNK_SIZE)?;
    Ok(OutputHandle {
        device_rate,
        producer,
        resampler,
        played,
        written: 0,
        pushed: 0,
        discard_before,
        stop_tx: Some(stop_tx),
        thread: Some(thread),
    })
}

pub fn get_available_inputs() -> anyhow::Result<String> {
    let host = get_host();
    let default = host.default_input_device().and_then(|d| d.name().ok());
    let mut names = Vec::new();
    for device in host.input_devices()? {
        let name = device.name()?;
        let config = device.default_input_config()?;
        let mut line = format!(
            " * {}({}ch, {}hz)",
            name,
            config.channels(),
            config.sample_rate().0
        );
        if Some(&name) == default.as_ref() {
            line.push_str(" [default]");
        }
        names.push(line);
    }
    Ok(names.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_skips_only_audio_queued_before_it() {
        let (mut producer, mut consumer) = HeapRb::<f32>::new(16).split();
        let mut popped = 0;
        producer.push_slice(&[0.1, 0.2, 0.3]);
        // Cleared after three samples, then the next reply arrives before the callback runs.
        let discard_before = 3;
        producer.push_slice(&[0.9, 0.8]);

        let mut data = [1.0f32; 6];
        let frames = fill_output(&mut consumer, &mut popped, discard_before, &mut data, 2);

        assert_eq!(frames, 3);
        assert_eq!(data, [0.9, 0.9, 0.8, 0.8, 0.0, 0.0]);
        assert_eq!(popped, 5);
    }

    #[test]
    fn underrun_pads_with_silence() {
        let (mut producer, mut consumer) = HeapRb::<f32>::new(4).split();
        let mut popped = 0;
        producer.push_slice(&[0.5]);

        let mut data = [1.0f32; 3];
        assert_eq!(fill_output(&mut consumer, &mut popped, 0, &mut data, 1), 3);
        assert_eq!(data, [0.5, 0.0, 0.0]);
        assert_eq!(popped, 1);
    }
}
