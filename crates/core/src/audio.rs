//! Audio frame types and utilities

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::codec;
use crate::{Error, Result};

/// Supported audio sample rates
///
/// Serialized as the plain rate in Hz so configs and wire messages read `16000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "u32", into = "u32")]
pub enum SampleRate {
    /// 8kHz - Telephony
    Hz8000,
    /// 16kHz - Standard speech recognition
    #[default]
    Hz16000,
    /// 22.05kHz - TTS output
    Hz22050,
    /// 24kHz - Hosted TTS output
    Hz24000,
    /// 44.1kHz - CD quality
    Hz44100,
    /// 48kHz - Browser capture
    Hz48000,
}

impl SampleRate {
    /// Get sample rate as u32
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8000,
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz22050 => 22050,
            SampleRate::Hz24000 => 24000,
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
        }
    }

    /// Get frame size for 20ms chunk
    pub fn frame_size_20ms(&self) -> usize {
        (self.as_u32() as usize * 20) / 1000
    }

    /// Number of samples per channel in a frame of the given duration
    pub fn samples_for(&self, duration: Duration) -> usize {
        (self.as_u32() as u64 * duration.as_millis() as u64 / 1000) as usize
    }
}

impl TryFrom<u32> for SampleRate {
    type Error = Error;

    fn try_from(hz: u32) -> Result<Self> {
        match hz {
            8000 => Ok(SampleRate::Hz8000),
            16000 => Ok(SampleRate::Hz16000),
            22050 => Ok(SampleRate::Hz22050),
            24000 => Ok(SampleRate::Hz24000),
            44100 => Ok(SampleRate::Hz44100),
            48000 => Ok(SampleRate::Hz48000),
            other => Err(Error::Codec(format!("unsupported sample rate: {}", other))),
        }
    }
}

impl From<SampleRate> for u32 {
    fn from(rate: SampleRate) -> Self {
        rate.as_u32()
    }
}

/// Audio encodings accepted on the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// 16-bit signed PCM (little-endian)
    #[default]
    #[serde(alias = "linear16")]
    Pcm16,
    /// μ-law (telephony)
    Mulaw,
}

impl AudioEncoding {
    /// Bytes used by one encoded sample
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            AudioEncoding::Pcm16 => 2,
            AudioEncoding::Mulaw => 1,
        }
    }
}

/// Audio channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Channels {
    #[default]
    Mono,
    Stereo,
}

impl Channels {
    pub fn count(&self) -> usize {
        match self {
            Channels::Mono => 1,
            Channels::Stereo => 2,
        }
    }
}

/// Negotiated audio format of one direction of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AudioFormat {
    pub sample_rate: SampleRate,
    #[serde(default)]
    pub encoding: AudioEncoding,
    #[serde(default)]
    pub channels: Channels,
}

impl AudioFormat {
    pub fn new(sample_rate: SampleRate, encoding: AudioEncoding) -> Self {
        Self {
            sample_rate,
            encoding,
            channels: Channels::Mono,
        }
    }

    /// Decode transport bytes into normalized samples
    pub fn decode(&self, bytes: &[u8]) -> Vec<f32> {
        match self.encoding {
            AudioEncoding::Pcm16 => codec::pcm16_to_f32(bytes),
            AudioEncoding::Mulaw => codec::mulaw_to_f32(bytes),
        }
    }

    /// Encode a frame for the transport
    ///
    /// The frame is expected to already be at this format's rate; callers resample upstream.
    pub fn encode(&self, frame: &AudioFrame) -> Vec<u8> {
        match self.encoding {
            AudioEncoding::Pcm16 => codec::f32_to_pcm16(&frame.samples),
            AudioEncoding::Mulaw => codec::f32_to_mulaw(&frame.samples),
        }
    }
}

/// Audio frame with metadata
///
/// Internally stores samples as f32 for processing efficiency. Samples sit behind an
/// `Arc` so handing a frame to the next stage never copies audio.
#[derive(Clone)]
pub struct AudioFrame {
    /// Raw audio samples (f32, normalized to [-1.0, 1.0])
    pub samples: Arc<[f32]>,
    /// Sample rate
    pub sample_rate: SampleRate,
    /// Number of channels
    pub channels: Channels,
    /// Frame sequence number for ordering
    pub sequence: u64,
    /// Timestamp when frame was captured/generated
    pub timestamp: Instant,
    /// Duration of this frame
    pub duration: Duration,
    /// Energy level in dB
    pub energy_db: f32,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("samples_len", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("sequence", &self.sequence)
            .field("duration", &self.duration)
            .field("energy_db", &self.energy_db)
            .finish()
    }
}

impl AudioFrame {
    /// Create a new audio frame from f32 samples
    pub fn new(
        samples: Vec<f32>,
        sample_rate: SampleRate,
        channels: Channels,
        sequence: u64,
    ) -> Self {
        let duration = Duration::from_secs_f64(
            samples.len() as f64 / (sample_rate.as_u32() as f64 * channels.count() as f64),
        );
        let energy_db = Self::calculate_energy_db(&samples);

        Self {
            samples: samples.into(),
            sample_rate,
            channels,
            sequence,
            timestamp: Instant::now(),
            duration,
            energy_db,
        }
    }

    /// Calculate RMS energy in decibels
    fn calculate_energy_db(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return -96.0; // Minimum dB (silence)
        }

        let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
        let rms = (sum_squares / samples.len() as f32).sqrt();

        if rms > 0.0 {
            20.0 * rms.log10()
        } else {
            -96.0
        }
    }

    /// Convert from PCM16 bytes (little-endian)
    pub fn from_pcm16(
        bytes: &[u8],
        sample_rate: SampleRate,
        channels: Channels,
        sequence: u64,
    ) -> Self {
        Self::new(codec::pcm16_to_f32(bytes), sample_rate, channels, sequence)
    }

    /// Convert to PCM16 bytes (little-endian)
    pub fn to_pcm16(&self) -> Vec<u8> {
        codec::f32_to_pcm16(&self.samples)
    }

    /// High-quality resampling using Rubato (sinc interpolation)
    ///
    /// Falls back to linear interpolation if Rubato fails (e.g., for very short frames).
    pub fn resample(&self, target_rate: SampleRate) -> Self {
        use rubato::{FftFixedIn, Resampler};

        if self.sample_rate == target_rate {
            return self.clone();
        }

        // For very short frames or edge cases, use linear fallback
        if self.samples.len() < 64 {
            return self.resample_linear(target_rate);
        }

        let from_rate = self.sample_rate.as_u32() as usize;
        let to_rate = target_rate.as_u32() as usize;

        // Convert f32 samples to f64 for Rubato (higher precision)
        let samples_f64: Vec<f64> = self.samples.iter().map(|&s| s as f64).collect();
        let chunk_size = self.samples.len().min(1024);

        match FftFixedIn::<f64>::new(from_rate, to_rate, chunk_size, 2, 1) {
            Ok(mut resampler) => {
                let input_frames = vec![samples_f64];

                match resampler.process(&input_frames, None) {
                    Ok(output_frames) => {
                        let resampled: Vec<f32> =
                            output_frames[0].iter().map(|&s| s as f32).collect();

                        Self::new(resampled, target_rate, self.channels, self.sequence)
                    },
                    Err(e) => {
                        tracing::warn!("Rubato processing failed, using linear fallback: {}", e);
                        self.resample_linear(target_rate)
                    },
                }
            },
            Err(e) => {
                tracing::warn!("Rubato init failed, using linear fallback: {}", e);
                self.resample_linear(target_rate)
            },
        }
    }

    /// Linear interpolation fallback for edge cases
    fn resample_linear(&self, target_rate: SampleRate) -> Self {
        if self.samples.is_empty() {
            return Self::new(Vec::new(), target_rate, self.channels, self.sequence);
        }

        let ratio = target_rate.as_u32() as f64 / self.sample_rate.as_u32() as f64;
        let new_len = (self.samples.len() as f64 * ratio) as usize;

        let mut resampled = Vec::with_capacity(new_len);
        for i in 0..new_len {
            let src_idx = i as f64 / ratio;
            let idx_floor = (src_idx.floor() as usize).min(self.samples.len() - 1);
            let idx_ceil = (idx_floor + 1).min(self.samples.len() - 1);
            let frac = src_idx - idx_floor as f64;

            let sample = self.samples[idx_floor] * (1.0 - frac as f32)
                + self.samples[idx_ceil] * frac as f32;
            resampled.push(sample);
        }

        Self::new(resampled, target_rate, self.channels, self.sequence)
    }

    /// Convert stereo to mono by averaging channels
    pub fn to_mono(&self) -> Self {
        if self.channels == Channels::Mono {
            return self.clone();
        }

        let mono_samples: Vec<f32> = self
            .samples
            .chunks_exact(2)
            .map(|chunk| (chunk[0] + chunk[1]) / 2.0)
            .collect();

        Self::new(mono_samples, self.sample_rate, Channels::Mono, self.sequence)
    }

    /// Get duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    /// Check if frame is likely silence based on energy
    pub fn is_likely_silence(&self, threshold_db: f32) -> bool {
        self.energy_db < threshold_db
    }
}

/// Re-frames arbitrarily sized sample buffers into fixed-duration frames
///
/// Transports deliver audio in whatever chunk size the client picked and synthesizers
/// return whole utterances; every bus only ever carries frames of one fixed size.
#[derive(Debug)]
pub struct FrameAssembler {
    sample_rate: SampleRate,
    channels: Channels,
    frame_samples: usize,
    pending: Vec<f32>,
    next_sequence: u64,
}

impl FrameAssembler {
    pub fn new(sample_rate: SampleRate, channels: Channels, frame_duration: Duration) -> Self {
        let frame_samples = (sample_rate.samples_for(frame_duration) * channels.count()).max(1);

        Self {
            sample_rate,
            channels,
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 2),
            next_sequence: 0,
        }
    }

    /// Samples (all channels interleaved) in one emitted frame
    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// Append samples and return every complete frame now available
    pub fn push_samples(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);

        let complete = self.pending.len() / self.frame_samples;
        let mut frames = Vec::with_capacity(complete);
        for chunk in self.pending.chunks_exact(self.frame_samples) {
            frames.push(AudioFrame::new(
                chunk.to_vec(),
                self.sample_rate,
                self.channels,
                self.next_sequence,
            ));
            self.next_sequence += 1;
        }
        self.pending.drain(..complete * self.frame_samples);

        frames
    }

    /// Append a frame of any rate or layout, converting it to the assembler's format first
    pub fn push_frame(&mut self, frame: &AudioFrame) -> Vec<AudioFrame> {
        let frame = if frame.channels != self.channels {
            frame.to_mono()
        } else {
            frame.clone()
        };
        let frame = frame.resample(self.sample_rate);

        self.push_samples(&frame.samples)
    }

    /// Emit whatever is buffered as a final short frame
    pub fn flush(&mut self) -> Option<AudioFrame> {
        if self.pending.is_empty() {
            return None;
        }

        let samples = std::mem::take(&mut self.pending);
        let frame = AudioFrame::new(samples, self.sample_rate, self.channels, self.next_sequence);
        self.next_sequence += 1;
        Some(frame)
    }

    /// Samples buffered but not yet emitted
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rate_conversions() {
        assert_eq!(SampleRate::Hz16000.as_u32(), 16000);
        assert_eq!(SampleRate::Hz16000.frame_size_20ms(), 320);
        assert_eq!(SampleRate::Hz8000.samples_for(Duration::from_millis(20)), 160);
        assert_eq!(SampleRate::try_from(24000).unwrap(), SampleRate::Hz24000);
        assert!(SampleRate::try_from(11025).is_err());
    }

    #[test]
    fn test_sample_rate_serializes_as_hz() {
        let json = serde_json::to_string(&SampleRate::Hz44100).unwrap();
        assert_eq!(json, "44100");

        let format: AudioFormat =
            serde_json::from_str(r#"{"sample_rate": 8000, "encoding": "linear16"}"#).unwrap();
        assert_eq!(format.sample_rate, SampleRate::Hz8000);
        assert_eq!(format.encoding, AudioEncoding::Pcm16);
        assert_eq!(format.channels, Channels::Mono);
    }

    #[test]
    fn test_audio_frame_from_pcm16() {
        let pcm16: Vec<u8> = vec![0x00, 0x40, 0x00, 0xC0]; // Two samples
        let frame = AudioFrame::from_pcm16(&pcm16, SampleRate::Hz16000, Channels::Mono, 0);

        assert_eq!(frame.samples.len(), 2);
        assert!(frame.samples[0] > 0.0);
        assert!(frame.samples[1] < 0.0);
        assert_eq!(frame.to_pcm16().len(), 4);
    }

    #[test]
    fn test_energy_calculation() {
        let silent = AudioFrame::new(vec![0.0; 160], SampleRate::Hz16000, Channels::Mono, 0);
        assert!(silent.energy_db < -90.0);
        assert!(silent.is_likely_silence(-60.0));

        let loud = AudioFrame::new(vec![0.5; 160], SampleRate::Hz16000, Channels::Mono, 0);
        assert!(loud.energy_db > -10.0);
    }

    #[test]
    fn test_linear_resample_short_frame() {
        let frame = AudioFrame::new(vec![0.25; 40], SampleRate::Hz16000, Channels::Mono, 3);
        let resampled = frame.resample(SampleRate::Hz8000);

        assert_eq!(resampled.sample_rate, SampleRate::Hz8000);
        assert_eq!(resampled.samples.len(), 20);
        assert_eq!(resampled.sequence, 3);
    }

    #[test]
    fn test_assembler_emits_fixed_frames() {
        let mut assembler =
            FrameAssembler::new(SampleRate::Hz8000, Channels::Mono, Duration::from_millis(20));
        assert_eq!(assembler.frame_samples(), 160);

        assert!(assembler.push_samples(&[0.1; 100]).is_empty());
        let frames = assembler.push_samples(&[0.1; 300]);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.samples.len() == 160));
        assert_eq!(frames[0].sequence, 0);
        assert_eq!(frames[1].sequence, 1);
        assert_eq!(assembler.pending_samples(), 80);

        let tail = assembler.flush().unwrap();
        assert_eq!(tail.samples.len(), 80);
        assert_eq!(tail.sequence, 2);
        assert!(assembler.flush().is_none());
    }

    #[test]
    fn test_format_round_trip_mulaw() {
        let format = AudioFormat::new(SampleRate::Hz8000, AudioEncoding::Mulaw);
        let frame = AudioFrame::new(vec![0.0, 0.5, -0.5], SampleRate::Hz8000, Channels::Mono, 0);

        let bytes = format.encode(&frame);
        assert_eq!(bytes.len(), 3);

        let decoded = format.decode(&bytes);
        assert!(decoded[0].abs() < 0.001);
        assert!((decoded[1] - 0.5).abs() < 0.02);
        assert!((decoded[2] + 0.5).abs() < 0.02);
    }
}
