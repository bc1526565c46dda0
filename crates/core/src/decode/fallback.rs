use crate::decode::{AudioDecoder, DecodedAudio, Result};
use crate::ingest::AudioArtifact;
use futures::future::BoxFuture;
use futures::FutureExt;

const LOG_TARGET: &str = "mindsync::decode";

/// Tries `primary` first and hands the artifact to `secondary` when it fails.
#[derive(Clone, Debug)]
pub struct FallbackDecoder<P, S> {
    primary: P,
    secondary: S,
}

impl<P, S> FallbackDecoder<P, S>
where
    P: AudioDecoder,
    S: AudioDecoder,
{
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }
}

impl<P, S> AudioDecoder for FallbackDecoder<P, S>
where
    P: AudioDecoder,
    S: AudioDecoder,
{
    fn decode<'a>(&'a self, artifact: &'a AudioArtifact) -> BoxFuture<'a, Result<DecodedAudio>> {
        async move {
            match self.primary.decode(artifact).await {
                Ok(audio) => Ok(audio),
                Err(e) => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        artifact = %artifact.id(),
                        error = %e,
                        "primary decoder failed, trying fallback"
                    );
                    self.secondary.decode(artifact).await
                }
            }
        }
        .boxed()
    }
}
