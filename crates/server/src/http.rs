use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use mindsync_core::ingest::{IngestError, Upload, UPLOAD_FIELD};
use mindsync_core::{Pipeline, PipelineError, PipelineResult};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub const WELCOME_MESSAGE: &str = "Welcome to Speech Emotion Detection API";

#[derive(Debug)]
pub enum HttpError {
    BadRequest { message: String },
    Unprocessable { message: String },
    BadGateway { message: String },
    Unavailable { message: String },
    Internal { message: String },
    /// Extractor rejections keep the status axum chose (e.g. 413).
    Rejected { status: StatusCode, message: String },
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            HttpError::BadRequest { message } => (StatusCode::BAD_REQUEST, message),
            HttpError::Unprocessable { message } => (StatusCode::UNPROCESSABLE_ENTITY, message),
            HttpError::BadGateway { message } => (StatusCode::BAD_GATEWAY, message),
            HttpError::Unavailable { message } => (StatusCode::SERVICE_UNAVAILABLE, message),
            HttpError::Internal { message } => (StatusCode::INTERNAL_SERVER_ERROR, message),
            HttpError::Rejected { status, message } => (status, message),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<PipelineError> for HttpError {
    fn from(error: PipelineError) -> Self {
        let message = error.to_string();
        match error {
            PipelineError::InvalidInput(_) => HttpError::BadRequest { message },
            PipelineError::UnprocessableAudio { .. } => HttpError::Unprocessable { message },
            PipelineError::TranscriptionFailed(_) | PipelineError::SynthesisFailed(_) => {
                HttpError::BadGateway { message }
            }
            PipelineError::ModelUnavailable { .. } => HttpError::Unavailable { message },
            PipelineError::FeatureShapeMismatch(_)
            | PipelineError::Storage(_)
            | PipelineError::Internal { .. } => HttpError::Internal { message },
        }
    }
}

pub fn router(pipeline: Arc<Pipeline>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/health", get(health))
        .route("/Predict", post(predict))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(pipeline)
}

async fn welcome() -> Json<serde_json::Value> {
    Json(json!({ "message": WELCOME_MESSAGE }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn predict(
    State(pipeline): State<Arc<Pipeline>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PipelineResult>, HttpError> {
    let mut multipart = multipart.map_err(|rejection| HttpError::BadRequest {
        message: rejection.body_text(),
    })?;
    let upload = read_upload(&mut multipart).await?;
    let result = pipeline.run(upload).await?;
    Ok(Json(result))
}

/// Pulls the audio field out of the form; other fields are ignored.
async fn read_upload(multipart: &mut Multipart) -> Result<Upload, HttpError> {
    let rejected = |e: axum::extract::multipart::MultipartError| HttpError::Rejected {
        status: e.status(),
        message: e.body_text(),
    };

    while let Some(field) = multipart.next_field().await.map_err(rejected)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_owned);
        let bytes = field.bytes().await.map_err(rejected)?;
        return Ok(Upload { file_name, bytes });
    }

    Err(PipelineError::InvalidInput(IngestError::MissingUpload).into())
}
