mod gemini;

use crate::asr::Transcript;
use crate::emotion::EmotionLabel;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub use gemini::GeminiSynthesizer;

/// Suggestion text returned by the generative service.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct AdvisoryResponse(String);

impl AdvisoryResponse {
    pub fn new<S: Into<String>>(text: S) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SynthesisError {
    #[error("invalid advisory endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("advisory service timed out")]
    Timeout,

    #[error("advisory service rejected the credential (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("advisory service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed advisory response: {0}")]
    MalformedResponse(String),
}

pub trait ResponseSynthesizer: Send + Sync {
    fn synthesize<'a>(
        &'a self,
        emotion: EmotionLabel,
        transcript: &'a Transcript,
    ) -> BoxFuture<'a, Result<AdvisoryResponse, SynthesisError>>;
}

pub fn build_prompt(emotion: EmotionLabel, transcript: &Transcript) -> String {
    format!(
        "A person is expressing the emotion '{emotion}' and they said: \"{}\".\n\
         Provide empathetic and helpful suggestions in about 100 words as bullet points \
         for neurodiverse individuals.",
        transcript.as_str()
    )
}
