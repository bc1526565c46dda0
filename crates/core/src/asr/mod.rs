mod http;
#[cfg(feature = "whisper")]
mod whisper;

use crate::decode::DecodeError;
use crate::ingest::AudioArtifact;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub use http::HttpTranscriber;
#[cfg(feature = "whisper")]
pub use whisper::WhisperTranscriber;

/// Recognized speech. Empty when the clip holds no intelligible speech.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Transcript(String);

impl Transcript {
    pub fn new<S: Into<String>>(text: S) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TranscribeError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("speech model failed to load: {0}")]
    ModelLoad(String),

    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("speech service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid speech service response: {0}")]
    InvalidResponse(String),

    #[error("speech inference failed: {0}")]
    Inference(String),

    #[error("failed to read artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("transcription worker failed: {0}")]
    Worker(String),
}

pub trait Transcriber: Send + Sync {
    fn transcribe<'a>(
        &'a self,
        artifact: &'a AudioArtifact,
    ) -> BoxFuture<'a, Result<Transcript, TranscribeError>>;
}
