pub mod mfcc;

use crate::decode::{AudioDecoder, DecodeError, DecodedAudio};
use crate::ingest::AudioArtifact;
use mfcc::MfccParams;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Analysis window and MFCC parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub n_mfcc: usize,
    pub offset: Duration,
    pub duration: Duration,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub top_db: Option<f64>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            n_mfcc: 40,
            offset: Duration::from_millis(500),
            duration: Duration::from_secs(3),
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            top_db: Some(80.0),
        }
    }
}

impl FeatureConfig {
    fn mfcc_params(&self) -> MfccParams {
        MfccParams {
            n_mfcc: self.n_mfcc,
            n_fft: self.n_fft,
            hop_length: self.hop_length,
            n_mels: self.n_mels,
            top_db: self.top_db,
        }
    }

    /// Sample range `[offset, offset + duration)` clipped to `len`.
    fn window(&self, sample_rate: u32, len: usize) -> std::ops::Range<usize> {
        let sr = f64::from(sample_rate);
        let start = (self.offset.as_secs_f64() * sr).round() as usize;
        let width = (self.duration.as_secs_f64() * sr).round() as usize;
        let start = start.min(len);
        start..start.saturating_add(width).min(len)
    }
}

/// Mean MFCC summary of one clip. Always exactly `n_mfcc` values long.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    /// Only extraction builds these, so the width always tracks `n_mfcc`.
    pub(crate) fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FeatureError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("invalid sample rate {0} Hz")]
    InvalidSampleRate(u32),

    #[error("clip ends before the analysis window starts ({duration:?} long)")]
    WindowEmpty { duration: Duration },

    #[error("feature worker failed: {0}")]
    Worker(String),
}

#[derive(Clone)]
pub struct FeatureExtractor {
    config: FeatureConfig,
    decoder: Arc<dyn AudioDecoder>,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig, decoder: Arc<dyn AudioDecoder>) -> Self {
        Self { config, decoder }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn extract(&self, audio: &DecodedAudio) -> Result<FeatureVector, FeatureError> {
        compute(&self.config, audio)
    }

    /// Decodes the artifact and computes its features on the blocking pool.
    pub async fn extract_from(
        &self,
        artifact: &AudioArtifact,
    ) -> Result<FeatureVector, FeatureError> {
        let audio = self.decoder.decode(artifact).await?;
        let config = self.config.clone();
        let started = Instant::now();

        let features = tokio::task::spawn_blocking(move || compute(&config, &audio))
            .await
            .map_err(|e| FeatureError::Worker(e.to_string()))??;

        tracing::debug!(
            artifact = %artifact.id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "features extracted"
        );
        Ok(features)
    }
}

fn compute(config: &FeatureConfig, audio: &DecodedAudio) -> Result<FeatureVector, FeatureError> {
    if audio.sample_rate == 0 {
        return Err(FeatureError::InvalidSampleRate(audio.sample_rate));
    }
    let range = config.window(audio.sample_rate, audio.samples.len());
    if range.is_empty() {
        return Err(FeatureError::WindowEmpty {
            duration: audio.duration(),
        });
    }

    let window = &audio.samples[range];
    let values = mfcc::mean_mfcc(window, audio.sample_rate, &config.mfcc_params());
    Ok(FeatureVector::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::SymphoniaDecoder;
    use crate::ingest::{AudioIngestor, Upload};
    use crate::test_support::{sine, wav_bytes};
    use rand::Rng;

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(FeatureConfig::default(), Arc::new(SymphoniaDecoder::new()))
    }

    fn noise(len: usize) -> Vec<f32> {
        let mut rng = rand::rng();
        (0..len).map(|_| rng.random_range(-0.5..0.5)).collect()
    }

    #[test]
    fn window_starts_at_offset_and_is_clipped() {
        let config = FeatureConfig::default();
        assert_eq!(config.window(22_050, 22_050 * 5), 11_025..77_175);
        assert_eq!(config.window(22_050, 22_050), 11_025..22_050);
        assert!(config.window(22_050, 8_000).is_empty());
    }

    #[test]
    fn three_second_clip_yields_forty_values() {
        let audio = DecodedAudio::new(22_050, sine(440.0, 22_050, 4.0));
        let features = extractor().extract(&audio).unwrap();
        assert_eq!(features.len(), 40);
        assert!(features.as_slice().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn width_follows_configured_coefficient_count() {
        let config = FeatureConfig {
            n_mfcc: 13,
            ..FeatureConfig::default()
        };
        let extractor = FeatureExtractor::new(config, Arc::new(SymphoniaDecoder::new()));
        let audio = DecodedAudio::new(16_000, sine(440.0, 16_000, 4.0));

        let features = extractor.extract(&audio).unwrap();

        assert_eq!(features.len(), 13);
        assert_eq!(features.len(), extractor.config().n_mfcc);
    }

    #[test]
    fn only_the_analysis_window_matters() {
        let sr = 16_000;
        let core = sine(300.0, sr, 3.0);
        let mut a = noise(sr as usize / 2);
        a.extend(&core);
        a.extend(noise(sr as usize));
        let mut b = noise(sr as usize / 2);
        b.extend(&core);
        b.extend(noise(sr as usize * 2));

        let fa = extractor().extract(&DecodedAudio::new(sr, a)).unwrap();
        let fb = extractor().extract(&DecodedAudio::new(sr, b)).unwrap();
        assert_eq!(fa, fb);
    }

    #[test]
    fn extraction_is_deterministic() {
        let audio = DecodedAudio::new(22_050, noise(22_050 * 4));
        let a = extractor().extract(&audio).unwrap();
        let b = extractor().extract(&audio).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn short_clip_uses_shorter_window() {
        let audio = DecodedAudio::new(22_050, sine(220.0, 22_050, 1.0));
        let features = extractor().extract(&audio).unwrap();
        assert_eq!(features.len(), 40);
    }

    #[test]
    fn clip_ending_before_offset_is_rejected() {
        let audio = DecodedAudio::new(22_050, sine(220.0, 22_050, 0.4));
        assert!(matches!(
            extractor().extract(&audio),
            Err(FeatureError::WindowEmpty { .. })
        ));
    }

    #[test]
    fn zero_sample_rate_is_rejected() {
        let audio = DecodedAudio::new(0, vec![0.0; 100]);
        assert!(matches!(
            extractor().extract(&audio),
            Err(FeatureError::InvalidSampleRate(0))
        ));
    }

    #[tokio::test]
    async fn extracts_from_stored_wav() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = AudioIngestor::new(dir.path())
            .ingest(Upload::new(
                "clip.wav",
                wav_bytes(22_050, &sine(440.0, 22_050, 3.5)),
            ))
            .await
            .unwrap();

        let features = extractor().extract_from(&artifact).await.unwrap();
        assert_eq!(features.len(), 40);
    }

    #[tokio::test]
    async fn undecodable_artifact_surfaces_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = AudioIngestor::new(dir.path())
            .ingest(Upload::new("clip.wav", b"nope".to_vec()))
            .await
            .unwrap();

        assert!(matches!(
            extractor().extract_from(&artifact).await,
            Err(FeatureError::Decode(_))
        ));
    }
}
