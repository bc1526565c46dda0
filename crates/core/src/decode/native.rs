use crate::decode::{downmix_to_mono, AudioDecoder, DecodeError, DecodedAudio, Result};
use crate::ingest::AudioArtifact;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// In-process decoder for the containers symphonia understands (wav, flac, mp3,
/// ogg/vorbis, mp4/aac). Keeps the native sample rate.
#[derive(Clone, Debug, Default)]
pub struct SymphoniaDecoder;

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self
    }

    fn decode_file(path: &Path, extension: &str) -> Result<DecodedAudio> {
        let file = std::fs::File::open(path)?;
        let stream = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if !extension.is_empty() {
            hint.with_extension(extension);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                stream,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecodeError::Unsupported(e.to_string()))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;
        let track_id = track.id;
        let params = track.codec_params.clone();
        let mut sample_rate = params.sample_rate;

        let mut decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Codec(e.to_string()))?;

        let mut samples = Vec::new();
        let mut buffer: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(DecodeError::Codec(e.to_string())),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(reason)) => {
                    tracing::debug!(reason, "skipping undecodable packet");
                    continue;
                }
                Err(e) => return Err(DecodeError::Codec(e.to_string())),
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count();
            if sample_rate.is_none() {
                sample_rate = Some(spec.rate);
            }

            let needed = decoded.capacity() * channels;
            if buffer.as_ref().is_some_and(|buf| buf.capacity() < needed) {
                buffer = None;
            }
            let buf = buffer
                .get_or_insert_with(|| SampleBuffer::new(decoded.capacity() as u64, spec));
            buf.copy_interleaved_ref(decoded);
            samples.extend(downmix_to_mono(buf.samples(), channels));
        }

        let sample_rate = sample_rate
            .filter(|rate| *rate > 0)
            .ok_or_else(|| DecodeError::Codec("unknown sample rate".to_owned()))?;
        if samples.is_empty() {
            return Err(DecodeError::Empty);
        }

        Ok(DecodedAudio::new(sample_rate, samples))
    }
}

impl AudioDecoder for SymphoniaDecoder {
    fn decode<'a>(&'a self, artifact: &'a AudioArtifact) -> BoxFuture<'a, Result<DecodedAudio>> {
        let path: PathBuf = artifact.path().to_path_buf();
        let extension = artifact.extension().to_owned();
        async move {
            tokio::task::spawn_blocking(move || Self::decode_file(&path, &extension))
                .await
                .map_err(|e| DecodeError::Worker(e.to_string()))?
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{AudioIngestor, Upload};
    use crate::test_support::{sine, wav_bytes, wav_bytes_stereo};

    #[tokio::test]
    async fn decodes_wav_at_native_rate() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = AudioIngestor::new(dir.path());
        let clip = sine(440.0, 22_050, 1.5);
        let artifact = ingestor
            .ingest(Upload::new("clip.wav", wav_bytes(22_050, &clip)))
            .await
            .unwrap();

        let audio = SymphoniaDecoder::new().decode(&artifact).await.unwrap();

        assert_eq!(audio.sample_rate, 22_050);
        assert_eq!(audio.samples.len(), clip.len());
        let max_err = audio
            .samples
            .iter()
            .zip(&clip)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_err < 1e-3, "max sample error {max_err}");
    }

    #[tokio::test]
    async fn stereo_is_downmixed() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = AudioIngestor::new(dir.path());
        let artifact = ingestor
            .ingest(Upload::new("clip.wav", wav_bytes_stereo(16_000, &[0.5; 1600], &[0.0; 1600])))
            .await
            .unwrap();

        let audio = SymphoniaDecoder::new().decode(&artifact).await.unwrap();

        assert_eq!(audio.samples.len(), 1600);
        assert!(audio.samples.iter().all(|s| (s - 0.25).abs() < 1e-3));
    }

    #[tokio::test]
    async fn garbage_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = AudioIngestor::new(dir.path());
        let artifact = ingestor
            .ingest(Upload::new("clip.wav", b"definitely not audio".to_vec()))
            .await
            .unwrap();

        let err = SymphoniaDecoder::new().decode(&artifact).await.unwrap_err();
        assert!(matches!(err, DecodeError::Unsupported(_)), "{err:?}");
    }
}
