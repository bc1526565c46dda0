use crate::asr::{TranscribeError, Transcriber, Transcript};
use crate::config::{ApiKey, AsrConfig};
use crate::ingest::AudioArtifact;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

const MAX_ERROR_BODY: usize = 512;

/// Client for an OpenAI-compatible `audio/transcriptions` endpoint
/// (whisper.cpp server, faster-whisper-server, OpenAI itself).
#[derive(Clone, Debug)]
pub struct HttpTranscriber {
    client: Client,
    url: Url,
    api_key: Option<ApiKey>,
    model: String,
    language: Option<String>,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl HttpTranscriber {
    pub fn new(config: &AsrConfig) -> Result<Self, TranscribeError> {
        let client = Client::builder()
            .timeout(config.timeout.duration())
            .build()
            .map_err(TranscribeError::Network)?;
        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            language: config.language.clone(),
        })
    }

    fn form(&self, artifact: &AudioArtifact, bytes: Vec<u8>) -> Form {
        let file = Part::bytes(bytes).file_name(format!("audio.{}", artifact.extension()));
        let form = Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("response_format", "json");
        match &self.language {
            Some(lang) => form.text("language", lang.clone()),
            None => form,
        }
    }
}

impl Transcriber for HttpTranscriber {
    fn transcribe<'a>(
        &'a self,
        artifact: &'a AudioArtifact,
    ) -> BoxFuture<'a, Result<Transcript, TranscribeError>> {
        async move {
            let bytes = artifact.read().await?;
            let mut request = self
                .client
                .post(self.url.clone())
                .multipart(self.form(artifact, bytes));
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key.expose());
            }

            let response = request.send().await.map_err(TranscribeError::Network)?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(TranscribeError::Status {
                    status: status.as_u16(),
                    body: body.chars().take(MAX_ERROR_BODY).collect(),
                });
            }

            let parsed: TranscriptionResponse = response
                .json()
                .await
                .map_err(|e| TranscribeError::InvalidResponse(e.to_string()))?;

            let transcript = Transcript::new(parsed.text.trim());
            tracing::debug!(
                artifact = %artifact.id(),
                chars = transcript.as_str().len(),
                "transcription received"
            );
            Ok(transcript)
        }
        .boxed()
    }
}
