use crate::advisor::{build_prompt, AdvisoryResponse, ResponseSynthesizer, SynthesisError};
use crate::asr::Transcript;
use crate::config::{ApiKey, SynthesisConfig};
use crate::emotion::EmotionLabel;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use url::Url;

const API_KEY_HEADER: &str = "x-goog-api-key";
const MAX_ERROR_BODY: usize = 512;

/// `generateContent` client for the Gemini API.
#[derive(Clone, Debug)]
pub struct GeminiSynthesizer {
    client: Client,
    endpoint: Url,
    api_key: ApiKey,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<PartRequest<'a>>,
}

#[derive(Serialize)]
struct PartRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Deserialize)]
struct PartResponse {
    #[serde(default)]
    text: String,
}

impl GenerateResponse {
    fn into_text(self) -> Result<String, SynthesisError> {
        let parts = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| SynthesisError::MalformedResponse("no candidates".to_owned()))?
            .content
            .ok_or_else(|| SynthesisError::MalformedResponse("candidate has no content".to_owned()))?
            .parts;
        let text: String = parts.into_iter().map(|p| p.text).collect();
        let text = text.trim();
        if text.is_empty() {
            return Err(SynthesisError::MalformedResponse(
                "candidate has no text".to_owned(),
            ));
        }
        Ok(text.to_owned())
    }
}

impl GeminiSynthesizer {
    pub fn new(config: &SynthesisConfig) -> Result<Self, SynthesisError> {
        let endpoint = config
            .base_url
            .join(&format!("models/{}:generateContent", config.model))
            .map_err(|e| SynthesisError::InvalidEndpoint(e.to_string()))?;
        let client = Client::builder()
            .timeout(config.timeout.duration())
            .build()
            .map_err(SynthesisError::Client)?;
        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn map_send_error(e: reqwest::Error) -> SynthesisError {
    if e.is_timeout() {
        SynthesisError::Timeout
    } else {
        SynthesisError::Network(e)
    }
}

impl ResponseSynthesizer for GeminiSynthesizer {
    fn synthesize<'a>(
        &'a self,
        emotion: EmotionLabel,
        transcript: &'a Transcript,
    ) -> BoxFuture<'a, Result<AdvisoryResponse, SynthesisError>> {
        async move {
            let prompt = build_prompt(emotion, transcript);
            let request = GenerateRequest {
                contents: vec![Content {
                    parts: vec![PartRequest { text: &prompt }],
                }],
            };

            let started = Instant::now();
            let response = self
                .client
                .post(self.endpoint.clone())
                .header(API_KEY_HEADER, self.api_key.expose())
                .json(&request)
                .send()
                .await
                .map_err(map_send_error)?;

            let status = response.status();
            tracing::debug!(
                status = status.as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "gemini responded"
            );
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(SynthesisError::Unauthorized {
                    status: status.as_u16(),
                });
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(SynthesisError::Status {
                    status: status.as_u16(),
                    body: body.chars().take(MAX_ERROR_BODY).collect(),
                });
            }

            let body = response.text().await.map_err(map_send_error)?;
            let parsed: GenerateResponse = serde_json::from_str(&body)
                .map_err(|e| SynthesisError::MalformedResponse(e.to_string()))?;
            Ok(AdvisoryResponse::new(parsed.into_text()?))
        }
        .boxed()
    }
}
