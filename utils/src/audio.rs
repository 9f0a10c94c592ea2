use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Sample rate the Live API expects for microphone input.
pub const INPUT_PCM16_SAMPLE_RATE: u32 = 16000;
/// Sample rate of the audio the Live API streams back.
pub const OUTPUT_PCM16_SAMPLE_RATE: u32 = 24000;
/// Samples per outbound capture frame.
pub const CAPTURE_FRAME_SIZE: usize = 4096;

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Splits samples into fixed-size chunks, zero-padding the last one.
pub fn split_for_chunks(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples
        .chunks(chunk_size)
        .map(|chunk| {
            let mut chunk = chunk.to_vec();
            chunk.resize(chunk_size, 0.0);
            chunk
        })
        .collect()
}

/// Averages interleaved channels down to mono.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|c| c.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Decodes a base64 string representing PCM16 audio into normalized f32 samples.
pub fn decode_f32(base64_fragment: &str) -> Vec<f32> {
    match base64::engine::general_purpose::STANDARD.decode(base64_fragment) {
        Ok(pcm16) => pcm16
            .chunks_exact(2)
            .map(|chunk| {
                let v = i16::from_le_bytes([chunk[0], chunk[1]]);
                (v as f32 / 32768.0).clamp(-1.0, 1.0)
            })
            .collect(),
        Err(e) => {
            tracing::error!("failed to decode base64 audio fragment: {}", e);
            Vec::new()
        }
    }
}

/// Encodes f32 samples as base64 PCM16 little-endian.
pub fn encode_f32(pcm32: &[f32]) -> String {
    base64::engine::general_purpose::STANDARD.encode(pcm32.to_binary())
}

/// Length in seconds of `samples` mono samples at `sample_rate`.
pub fn duration_of(samples: usize, sample_rate: u32) -> f64 {
    samples as f64 / sample_rate as f64
}

/// A trait for converting audio sample types to a binary representation (Vec<u8>).
pub trait ToBinary {
    fn to_binary(&self) -> Vec<u8>;
}

impl ToBinary for [f32] {
    fn to_binary(&self) -> Vec<u8> {
        self.iter()
            .flat_map(|&sample| {
                let v = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                v.to_le_bytes()
            })
            .collect()
    }
}

/// Turns mono microphone samples into base64 16 kHz PCM16 frames.
///
/// At most one frame is held back; every complete frame is emitted on the
/// `push` call that completes it.
pub struct FrameEncoder {
    frame_size: usize,
    pending: Vec<f32>,
    resampler: Option<FastFixedIn<f32>>,
}

impl FrameEncoder {
    pub fn new(input_sample_rate: u32, frame_size: usize) -> anyhow::Result<Self> {
        let resampler = if input_sample_rate == INPUT_PCM16_SAMPLE_RATE {
            None
        } else {
            Some(create_resampler(
                input_sample_rate as f64,
                INPUT_PCM16_SAMPLE_RATE as f64,
                frame_size,
            )?)
        };
        Ok(Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
            resampler,
        })
    }

    pub fn push(&mut self, samples: &[f32]) -> Vec<String> {
        self.pending.extend_from_slice(samples);
        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            let frame: Vec<f32> = self.pending.drain(..self.frame_size).collect();
            let frame = match self.resampler.as_mut() {
                None => frame,
                Some(resampler) => match resampler.process(&[frame.as_slice()], None) {
                    Ok(mut resampled) if !resampled.is_empty() => resampled.swap_remove(0),
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!("failed to resample capture frame: {}", e);
                        continue;
                    }
                },
            };
            frames.push(encode_f32(&frame));
        }
        frames
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Resamples one continuous mono stream in fixed-size chunks.
///
/// Input that does not fill a chunk is held back and joined to the next
/// `push`, so consecutive buffers meet without padding. `flush` plays out
/// the held-back tail and keeps only its share of the padded output.
pub struct StreamResampler {
    chunk_size: usize,
    ratio: f64,
    pending: Vec<f32>,
    resampler: Option<FastFixedIn<f32>>,
}

impl StreamResampler {
    pub fn new(input_sample_rate: u32, output_sample_rate: u32, chunk_size: usize) -> anyhow::Result<Self> {
        let resampler = if input_sample_rate == output_sample_rate {
            None
        } else {
            Some(create_resampler(
                input_sample_rate as f64,
                output_sample_rate as f64,
                chunk_size,
            )?)
        };
        Ok(Self {
            chunk_size,
            ratio: output_sample_rate as f64 / input_sample_rate as f64,
            pending: Vec::with_capacity(chunk_size),
            resampler,
        })
    }

    /// Output samples the held-back input will produce.
    pub fn pending_output(&self) -> usize {
        (self.pending.len() as f64 * self.ratio).round() as usize
    }

    pub fn push(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(resampler) = self.resampler.as_mut() else {
            return samples.to_vec();
        };
        self.pending.extend_from_slice(samples);
        let mut out = Vec::new();
        while self.pending.len() >= self.chunk_size {
            let chunk: Vec<f32> = self.pending.drain(..self.chunk_size).collect();
            resample_into(resampler, &chunk, &mut out);
        }
        out
    }

    pub fn flush(&mut self) -> Vec<f32> {
        let expected = self.pending_output();
        let tail = std::mem::take(&mut self.pending);
        let Some(resampler) = self.resampler.as_mut() else {
            return tail;
        };
        let mut out = Vec::new();
        for chunk in split_for_chunks(&tail, self.chunk_size) {
            resample_into(resampler, &chunk, &mut out);
        }
        out.truncate(expected);
        out
    }

    /// Drops held-back input and the filter history.
    pub fn clear(&mut self) {
        self.pending.clear();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }
}

fn resample_into(resampler: &mut FastFixedIn<f32>, chunk: &[f32], out: &mut Vec<f32>) {
    match resampler.process(&[chunk], None) {
        Ok(resampled) => {
            if let Some(channel) = resampled.first() {
                out.extend_from_slice(channel);
            }
        }
        Err(e) => tracing::warn!("failed to resample playback chunk: {}", e),
    }
}

/// Gapless playback scheduling against a monotonic output clock.
///
/// Each buffer starts at `max(now, cursor)` and pushes the cursor to its end,
/// so consecutive buffers never overlap however bursty their arrival.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackCursor {
    next_start: f64,
}

impl PlaybackCursor {
    pub fn new(now: f64) -> Self {
        Self { next_start: now }
    }

    pub fn schedule(&mut self, now: f64, duration: f64) -> f64 {
        let start = now.max(self.next_start);
        self.next_start = start + duration;
        start
    }

    /// Forget queued audio, e.g. after the model was interrupted.
    pub fn reset(&mut self, now: f64) {
        self.next_start = now;
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_codec_matches_wire_layout() {
        let encoded = encode_f32(&[0.0, 0.5, -1.0]);
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&encoded)
            .unwrap();
        assert_eq!(bytes, vec![0x00, 0x00, 0x00, 0x40, 0x00, 0x80]);

        let decoded = decode_f32(&encoded);
        assert_eq!(decoded, vec![0.0, 0.5, -1.0]);
    }

    #[test]
    fn full_scale_positive_is_clamped() {
        let bytes = [1.5f32].to_binary();
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
    }

    #[test]
    fn invalid_base64_decodes_to_silence() {
        assert!(decode_f32("not base64!").is_empty());
    }

    #[test]
    fn downmix_averages_channels() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(downmix(&[0.25], 1), vec![0.25]);
    }

    #[test]
    fn frame_encoder_emits_whole_frames_only() {
        let mut encoder = FrameEncoder::new(INPUT_PCM16_SAMPLE_RATE, 4).unwrap();
        assert!(encoder.push(&[0.1, 0.1, 0.1]).is_empty());
        assert_eq!(encoder.pending(), 3);

        let frames = encoder.push(&[0.1, 0.1, 0.1, 0.1, 0.1, 0.1]);
        assert_eq!(frames.len(), 2);
        assert_eq!(encoder.pending(), 1);
        assert_eq!(decode_f32(&frames[0]).len(), 4);
    }

    #[test]
    fn frame_encoder_resamples_to_16k() {
        let mut encoder = FrameEncoder::new(48000, 480).unwrap();
        let frames = encoder.push(&vec![0.0; 480]);
        assert_eq!(frames.len(), 1);
        let samples = decode_f32(&frames[0]).len();
        // 480 samples at 48 kHz is 10 ms, i.e. about 160 samples at 16 kHz.
        assert!((150..=170).contains(&samples), "got {samples} samples");
    }

    #[test]
    fn playback_never_overlaps() {
        let mut cursor = PlaybackCursor::new(0.0);
        let durations = [0.5, 0.25, 0.75];
        // Arrival times out of sync with playback: a burst, then a late frame.
        let arrivals = [0.0, 0.01, 2.0];

        let mut previous_end = f64::MIN;
        for (now, duration) in arrivals.iter().zip(durations) {
            let start = cursor.schedule(*now, duration);
            assert!(start >= previous_end);
            assert!(start >= *now);
            previous_end = start + duration;
        }
        assert_eq!(cursor.next_start(), 2.75);
    }

    #[test]
    fn cursor_reset_restarts_from_now() {
        let mut cursor = PlaybackCursor::new(0.0);
        cursor.schedule(0.0, 10.0);
        cursor.reset(1.0);
        assert_eq!(cursor.schedule(1.0, 0.5), 1.0);
    }

    #[test]
    fn stream_resampler_joins_buffers_without_padding() {
        let mut resampler = StreamResampler::new(24000, 48000, 1024).unwrap();
        assert!(resampler.push(&[0.5; 1000]).is_empty());
        assert_eq!(resampler.pending_output(), 2000);

        let mut out = resampler.push(&[0.5; 1000]);
        assert_eq!(resampler.pending_output(), 1952);
        out.extend(resampler.flush());
        assert_eq!(resampler.pending_output(), 0);

        // Padding each buffer to a whole chunk would have produced 4096 samples.
        assert!((3996..=4004).contains(&out.len()), "got {} samples", out.len());
    }

    #[test]
    fn stream_resampler_passes_through_matching_rates() {
        let mut resampler = StreamResampler::new(24000, 24000, 1024).unwrap();
        assert_eq!(resampler.push(&[0.1, 0.2, 0.3]), vec![0.1, 0.2, 0.3]);
        assert_eq!(resampler.pending_output(), 0);
        assert!(resampler.flush().is_empty());
    }

    #[test]
    fn stream_resampler_clear_drops_tail() {
        let mut resampler = StreamResampler::new(24000, 48000, 1024).unwrap();
        resampler.push(&[0.5; 100]);
        resampler.clear();
        assert_eq!(resampler.pending_output(), 0);
        assert!(resampler.flush().is_empty());
    }

    #[test]
    fn split_pads_last_chunk() {
        let chunks = split_for_chunks(&[1.0, 2.0, 3.0], 2);
        assert_eq!(chunks, vec![vec![1.0, 2.0], vec![3.0, 0.0]]);
    }
}
