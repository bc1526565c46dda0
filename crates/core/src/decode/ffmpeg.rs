use crate::decode::{parse_f32le, AudioDecoder, DecodeError, DecodedAudio, Result};
use crate::ingest::AudioArtifact;
use ffmpeg_sidecar::{download, paths::ffmpeg_path};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::Path;

/// Raw PCM carries no header, so ffmpeg is told which rate to produce.
pub const DEFAULT_FFMPEG_SAMPLE_RATE: u32 = 22_050;

#[derive(Clone, Debug)]
pub struct FfmpegAudioDecoder {
    output_rate: u32,
}

impl Default for FfmpegAudioDecoder {
    fn default() -> Self {
        Self {
            output_rate: DEFAULT_FFMPEG_SAMPLE_RATE,
        }
    }
}

impl FfmpegAudioDecoder {
    pub fn new(output_rate: u32) -> Self {
        Self { output_rate }
    }

    /// Locates ffmpeg, downloading it on first use. Blocking; call once at
    /// startup, never per request.
    pub fn provision() -> Result<()> {
        download::auto_download().map_err(|e| DecodeError::FfmpegUnavailable(e.to_string()))
    }

    async fn decode_with_ffmpeg(&self, input: &Path) -> Result<Vec<f32>> {
        let rate = self.output_rate.to_string();
        let output = tokio::process::Command::new(ffmpeg_path())
            .args(["-hide_banner", "-nostdin", "-loglevel", "error", "-i"])
            .arg(input)
            .args([
                "-vn", "-sn", "-dn", "-ac", "1", "-ar", &rate, "-f", "f32le", "-acodec",
                "pcm_f32le", "pipe:1",
            ])
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DecodeError::FfmpegUnavailable(e.to_string()))?;

        if !output.status.success() {
            let stderr_s = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            return Err(DecodeError::FfmpegFailed(format!(
                "exit_code={:?} stderr={stderr_s}",
                output.status.code()
            )));
        }

        parse_f32le(&output.stdout)
    }
}

impl AudioDecoder for FfmpegAudioDecoder {
    fn decode<'a>(&'a self, artifact: &'a AudioArtifact) -> BoxFuture<'a, Result<DecodedAudio>> {
        async move {
            let samples = self.decode_with_ffmpeg(artifact.path()).await?;
            if samples.is_empty() {
                return Err(DecodeError::Empty);
            }
            Ok(DecodedAudio::new(self.output_rate, samples))
        }
        .boxed()
    }
}
