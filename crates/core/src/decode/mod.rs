mod fallback;
#[cfg(feature = "ffmpeg")]
mod ffmpeg;
mod native;

use crate::ingest::AudioArtifact;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub use fallback::FallbackDecoder;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegAudioDecoder;
pub use native::SymphoniaDecoder;

/// Mono PCM at the rate the clip was recorded with.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl DecodedAudio {
    pub fn new(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            samples,
        }
    }

    pub fn duration(&self) -> Duration {
        duration_from_samples(self.sample_rate, self.samples.len())
    }

    pub fn resampled(&self, target_rate: u32) -> Self {
        Self {
            sample_rate: target_rate,
            samples: resample_linear(&self.samples, self.sample_rate, target_rate),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("failed to open audio: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported or corrupt container: {0}")]
    Unsupported(String),

    #[error("no decodable audio track")]
    NoAudioTrack,

    #[error("codec error: {0}")]
    Codec(String),

    #[error("audio contains no samples")]
    Empty,

    #[error("ffmpeg unavailable: {0}")]
    FfmpegUnavailable(String),

    #[error("ffmpeg failed: {0}")]
    FfmpegFailed(String),

    #[error("invalid pcm output: {0}")]
    InvalidPcm(String),

    #[error("decode worker failed: {0}")]
    Worker(String),
}

impl DecodeError {
    /// True when the bytes themselves could not be decoded. Host faults
    /// (missing ffmpeg, I/O, worker panics, garbled pipe output) are not.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Unsupported(_)
                | Self::NoAudioTrack
                | Self::Codec(_)
                | Self::Empty
                | Self::FfmpegFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DecodeError>;

pub trait AudioDecoder: Send + Sync {
    fn decode<'a>(&'a self, artifact: &'a AudioArtifact) -> BoxFuture<'a, Result<DecodedAudio>>;
}

/// Decoder used by the service: symphonia in-process, with ffmpeg behind it for
/// containers symphonia cannot open (e.g. browser recordings).
pub fn default_decoder() -> Arc<dyn AudioDecoder> {
    #[cfg(feature = "ffmpeg")]
    {
        Arc::new(FallbackDecoder::new(
            SymphoniaDecoder::new(),
            FfmpegAudioDecoder::default(),
        ))
    }
    #[cfg(not(feature = "ffmpeg"))]
    {
        Arc::new(SymphoniaDecoder::new())
    }
}

/// Averages interleaved frames down to one channel.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let scale = 1.0 / channels as f32;
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}

/// Linear-interpolation resampler; good enough for speech recognition input.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let output_len =
        (samples.len() as u64 * u64::from(to_rate)).div_ceil(u64::from(from_rate)) as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = (source_pos - source_idx as f64) as f32;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx];
                let right = samples[source_idx + 1];
                left + (right - left) * fraction
            }
        })
        .collect()
}

pub fn duration_from_samples(sample_rate_hz: u32, samples: usize) -> Duration {
    if sample_rate_hz == 0 {
        return Duration::from_secs(0);
    }
    let micros = (u128::from(samples as u64) * 1_000_000u128) / u128::from(sample_rate_hz);
    Duration::from_micros(micros.min(u128::from(u64::MAX)) as u64)
}

pub fn parse_f32le(raw: &[u8]) -> Result<Vec<f32>> {
    if raw.len() % 4 != 0 {
        return Err(DecodeError::InvalidPcm(format!(
            "f32le byte length must be multiple of 4, got {}",
            raw.len()
        )));
    }
    Ok(raw
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
