use crate::advisor::{AdvisoryResponse, GeminiSynthesizer, ResponseSynthesizer, SynthesisError};
use crate::asr::{HttpTranscriber, TranscribeError, Transcriber, Transcript};
use crate::config::{AppConfig, InferenceWorkers, SynthesisPolicy};
use crate::decode::{default_decoder, AudioDecoder, DecodeError};
use crate::emotion::{ClassifyError, EmotionClassifier, EmotionLabel};
use crate::features::{FeatureConfig, FeatureError, FeatureExtractor};
use crate::ingest::{AudioArtifact, AudioIngestor, IngestError, Upload};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::Instrument;
use uuid::Uuid;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Ingest,
    Transcribe,
    ExtractFeatures,
    Classify,
    Synthesize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ingest => "ingest",
            Self::Transcribe => "transcribe",
            Self::ExtractFeatures => "extract_features",
            Self::Classify => "classify",
            Self::Synthesize => "synthesize",
        })
    }
}

/// Progress of one request. `Failed` is absorbing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Received,
    Ingested,
    Transcribed,
    Classified,
    Synthesized,
    Completed,
    Failed(Stage),
}

#[derive(Debug)]
struct RunTracker {
    state: RunState,
}

impl RunTracker {
    fn new() -> Self {
        Self {
            state: RunState::Received,
        }
    }

    fn advance(&mut self, next: RunState) {
        if matches!(self.state, RunState::Failed(_) | RunState::Completed) {
            return;
        }
        tracing::debug!(from = ?self.state, to = ?next, "state transition");
        self.state = next;
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidInput(IngestError),

    #[error("failed to store upload: {0}")]
    Storage(#[source] IngestError),

    #[error("unprocessable audio: {source}")]
    UnprocessableAudio {
        stage: Stage,
        #[source]
        source: BoxError,
    },

    #[error("transcription failed: {0}")]
    TranscriptionFailed(#[source] TranscribeError),

    #[error("classifier rejected features: {0}")]
    FeatureShapeMismatch(#[source] ClassifyError),

    #[error("advisory synthesis failed: {0}")]
    SynthesisFailed(#[source] SynthesisError),

    #[error("{component} unavailable: {reason}")]
    ModelUnavailable {
        component: &'static str,
        reason: String,
    },

    #[error("internal error during {stage}: {message}")]
    Internal { stage: Stage, message: String },
}

impl PipelineError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::InvalidInput(_) | Self::Storage(_) => Some(Stage::Ingest),
            Self::UnprocessableAudio { stage, .. } | Self::Internal { stage, .. } => Some(*stage),
            Self::TranscriptionFailed(_) => Some(Stage::Transcribe),
            Self::FeatureShapeMismatch(_) => Some(Stage::Classify),
            Self::SynthesisFailed(_) => Some(Stage::Synthesize),
            Self::ModelUnavailable { .. } => None,
        }
    }

    /// True when the request itself was at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::UnprocessableAudio { .. })
    }

    fn from_decode(stage: Stage, e: DecodeError) -> Self {
        match e {
            e if e.is_client_error() => Self::UnprocessableAudio {
                stage,
                source: Box::new(e),
            },
            DecodeError::FfmpegUnavailable(reason) => Self::ModelUnavailable {
                component: "ffmpeg",
                reason,
            },
            other => Self::Internal {
                stage,
                message: other.to_string(),
            },
        }
    }
}

impl From<IngestError> for PipelineError {
    fn from(e: IngestError) -> Self {
        if e.is_client_error() {
            Self::InvalidInput(e)
        } else {
            Self::Storage(e)
        }
    }
}

impl From<TranscribeError> for PipelineError {
    fn from(e: TranscribeError) -> Self {
        match e {
            TranscribeError::Decode(source) => Self::from_decode(Stage::Transcribe, source),
            other => Self::TranscriptionFailed(other),
        }
    }
}

impl From<FeatureError> for PipelineError {
    fn from(e: FeatureError) -> Self {
        match e {
            FeatureError::Decode(source) => Self::from_decode(Stage::ExtractFeatures, source),
            FeatureError::Worker(message) => Self::Internal {
                stage: Stage::ExtractFeatures,
                message,
            },
            other => Self::UnprocessableAudio {
                stage: Stage::ExtractFeatures,
                source: Box::new(other),
            },
        }
    }
}

impl From<ClassifyError> for PipelineError {
    fn from(e: ClassifyError) -> Self {
        Self::FeatureShapeMismatch(e)
    }
}

impl From<SynthesisError> for PipelineError {
    fn from(e: SynthesisError) -> Self {
        Self::SynthesisFailed(e)
    }
}

/// What one successful request produces.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PipelineResult {
    #[serde(rename = "prediction_text")]
    emotion: EmotionLabel,
    transcript: Transcript,
    #[serde(rename = "gemini_response")]
    advisory: Option<AdvisoryResponse>,
}

impl PipelineResult {
    pub fn emotion(&self) -> EmotionLabel {
        self.emotion
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// `None` only when synthesis failed under [`SynthesisPolicy::Degrade`].
    pub fn advisory(&self) -> Option<&AdvisoryResponse> {
        self.advisory.as_ref()
    }
}

/// Immutable per-process context shared by every request.
#[derive(Clone)]
pub struct Pipeline {
    ingestor: AudioIngestor,
    transcriber: Arc<dyn Transcriber>,
    extractor: FeatureExtractor,
    classifier: EmotionClassifier,
    synthesizer: Arc<dyn ResponseSynthesizer>,
    permits: Arc<Semaphore>,
    local_transcriber: bool,
    policy: SynthesisPolicy,
}

impl Pipeline {
    pub fn new(
        ingestor: AudioIngestor,
        transcriber: Arc<dyn Transcriber>,
        extractor: FeatureExtractor,
        classifier: EmotionClassifier,
        synthesizer: Arc<dyn ResponseSynthesizer>,
    ) -> Self {
        Self {
            ingestor,
            transcriber,
            extractor,
            classifier,
            synthesizer,
            permits: Arc::new(Semaphore::new(InferenceWorkers::default().get())),
            local_transcriber: false,
            policy: SynthesisPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: SynthesisPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_inference_workers(mut self, workers: InferenceWorkers) -> Self {
        self.permits = Arc::new(Semaphore::new(workers.get()));
        self
    }

    /// Builds every stage from configuration. Model loading happens here so a
    /// broken deployment fails before it serves anything.
    pub fn from_config(config: &AppConfig) -> Result<Self, PipelineError> {
        let decoder = default_decoder();

        let classifier = EmotionClassifier::load(&config.emotion_model).map_err(|e| {
            PipelineError::ModelUnavailable {
                component: "emotion classifier",
                reason: e.to_string(),
            }
        })?;
        let extractor = FeatureExtractor::new(FeatureConfig::default(), Arc::clone(&decoder));
        if classifier.input_dim() != extractor.config().n_mfcc {
            return Err(PipelineError::ModelUnavailable {
                component: "emotion classifier",
                reason: format!(
                    "model expects {} features, extractor produces {}",
                    classifier.input_dim(),
                    extractor.config().n_mfcc
                ),
            });
        }

        let (transcriber, local_transcriber) = build_transcriber(config, decoder)?;

        #[cfg(feature = "ffmpeg")]
        crate::decode::FfmpegAudioDecoder::provision().map_err(|e| {
            PipelineError::ModelUnavailable {
                component: "ffmpeg",
                reason: e.to_string(),
            }
        })?;
        let synthesizer = GeminiSynthesizer::new(&config.synthesis).map_err(|e| {
            PipelineError::ModelUnavailable {
                component: "advisory client",
                reason: e.to_string(),
            }
        })?;

        let mut pipeline = Self::new(
            AudioIngestor::new(&config.scratch_dir),
            transcriber,
            extractor,
            classifier,
            Arc::new(synthesizer),
        )
        .with_policy(config.synthesis_policy)
        .with_inference_workers(config.inference_workers);
        pipeline.local_transcriber = local_transcriber;
        Ok(pipeline)
    }

    pub fn policy(&self) -> SynthesisPolicy {
        self.policy
    }

    pub async fn run(&self, upload: Upload) -> Result<PipelineResult, PipelineError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("predict", %request_id);
        async move {
            let started = Instant::now();
            let mut tracker = RunTracker::new();
            let result = self.execute(upload, &mut tracker).await;
            match &result {
                Ok(r) => {
                    tracker.advance(RunState::Completed);
                    tracing::info!(
                        emotion = %r.emotion,
                        degraded = r.advisory.is_none(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "prediction completed"
                    );
                }
                Err(e) => {
                    let stage = e.stage().unwrap_or(Stage::Ingest);
                    tracker.advance(RunState::Failed(stage));
                    if e.is_client_error() {
                        tracing::warn!(%stage, error = %e, "prediction rejected");
                    } else {
                        tracing::error!(%stage, error = %e, "prediction failed");
                    }
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        upload: Upload,
        tracker: &mut RunTracker,
    ) -> Result<PipelineResult, PipelineError> {
        let artifact = self.ingestor.ingest(upload).await?;
        tracker.advance(RunState::Ingested);

        let (transcript, emotion) =
            tokio::join!(self.transcribe(&artifact), self.classify(&artifact));
        drop(artifact);

        let (transcript, emotion) = match (transcript, emotion) {
            (Ok(t), Ok(e)) => (t, e),
            (Ok(_), Err(e)) | (Err(e), Ok(_)) => return Err(e),
            (Err(t), Err(e)) => {
                tracing::debug!(error = %t, "transcription also failed");
                return Err(if t.is_client_error() && !e.is_client_error() { t } else { e });
            }
        };
        tracker.advance(RunState::Transcribed);
        tracker.advance(RunState::Classified);

        let advisory = match self.synthesizer.synthesize(emotion, &transcript).await {
            Ok(advisory) => Some(advisory),
            Err(e) => match self.policy {
                SynthesisPolicy::FailRequest => return Err(e.into()),
                SynthesisPolicy::Degrade => {
                    tracing::warn!(
                        stage = %Stage::Synthesize,
                        error = %e,
                        "advisory unavailable, returning degraded result"
                    );
                    None
                }
            },
        };
        tracker.advance(RunState::Synthesized);

        Ok(PipelineResult {
            emotion,
            transcript,
            advisory,
        })
    }

    async fn transcribe(&self, artifact: &AudioArtifact) -> Result<Transcript, PipelineError> {
        let _permit = if self.local_transcriber {
            Some(self.acquire(Stage::Transcribe).await?)
        } else {
            None
        };
        Ok(self.transcriber.transcribe(artifact).await?)
    }

    async fn classify(&self, artifact: &AudioArtifact) -> Result<EmotionLabel, PipelineError> {
        let _permit = self.acquire(Stage::ExtractFeatures).await?;
        let features = self.extractor.extract_from(artifact).await?;
        Ok(self.classifier.classify(&features)?)
    }

    async fn acquire(
        &self,
        stage: Stage,
    ) -> Result<tokio::sync::SemaphorePermit<'_>, PipelineError> {
        self.permits
            .acquire()
            .await
            .map_err(|e| PipelineError::Internal {
                stage,
                message: e.to_string(),
            })
    }
}

fn build_transcriber(
    config: &AppConfig,
    decoder: Arc<dyn AudioDecoder>,
) -> Result<(Arc<dyn Transcriber>, bool), PipelineError> {
    let unavailable = |reason: String| PipelineError::ModelUnavailable {
        component: "transcriber",
        reason,
    };

    if let Some(model) = &config.asr.whisper_model {
        #[cfg(feature = "whisper")]
        {
            let whisper = crate::asr::WhisperTranscriber::load(
                model,
                config.asr.language.clone(),
                decoder,
            )
            .map_err(|e| unavailable(e.to_string()))?;
            return Ok((Arc::new(whisper), true));
        }
        #[cfg(not(feature = "whisper"))]
        {
            let _ = decoder;
            return Err(unavailable(format!(
                "{} requested but this build has no whisper support",
                model.display()
            )));
        }
    }

    let http = HttpTranscriber::new(&config.asr).map_err(|e| unavailable(e.to_string()))?;
    tracing::info!(url = %config.asr.url, "using remote transcription service");
    Ok((Arc::new(http), false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{DecodedAudio, SymphoniaDecoder};
    use crate::emotion::EmotionModel;
    use crate::test_support::{sine, wav_bytes};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Calls {
        transcribe: AtomicUsize,
        scores: AtomicUsize,
        synthesize: AtomicUsize,
    }

    enum TranscriptMode {
        Fixed(&'static str),
        ByteLen,
        Fail,
    }

    struct StubTranscriber {
        mode: TranscriptMode,
        calls: Arc<Calls>,
    }

    impl Transcriber for StubTranscriber {
        fn transcribe<'a>(
            &'a self,
            artifact: &'a AudioArtifact,
        ) -> BoxFuture<'a, Result<Transcript, TranscribeError>> {
            self.calls.transcribe.fetch_add(1, Ordering::SeqCst);
            async move {
                match self.mode {
                    TranscriptMode::Fixed(text) => Ok(Transcript::new(text)),
                    TranscriptMode::ByteLen => {
                        // Read through the artifact to prove it is this request's file.
                        let bytes = artifact.read().await?;
                        tokio::task::yield_now().await;
                        Ok(Transcript::new(format!("{}", bytes.len())))
                    }
                    TranscriptMode::Fail => Err(TranscribeError::Status {
                        status: 500,
                        body: "asr down".to_owned(),
                    }),
                }
            }
            .boxed()
        }
    }

    /// Always votes `label`, with an optional input width override.
    struct StubModel {
        label: EmotionLabel,
        dim: usize,
        calls: Arc<Calls>,
    }

    impl EmotionModel for StubModel {
        fn input_dim(&self) -> usize {
            self.dim
        }

        fn scores(&self, _features: &[f32]) -> Result<Vec<f32>, ClassifyError> {
            self.calls.scores.fetch_add(1, Ordering::SeqCst);
            let mut scores = vec![0.0; EmotionLabel::COUNT];
            scores[self.label.index()] = 1.0;
            Ok(scores)
        }
    }

    struct EchoSynthesizer {
        fail: bool,
        calls: Arc<Calls>,
    }

    impl ResponseSynthesizer for EchoSynthesizer {
        fn synthesize<'a>(
            &'a self,
            emotion: EmotionLabel,
            transcript: &'a Transcript,
        ) -> BoxFuture<'a, Result<AdvisoryResponse, SynthesisError>> {
            self.calls.synthesize.fetch_add(1, Ordering::SeqCst);
            async move {
                if self.fail {
                    return Err(SynthesisError::Status {
                        status: 503,
                        body: "unavailable".to_owned(),
                    });
                }
                Ok(AdvisoryResponse::new(format!("{emotion}|{}", transcript.as_str())))
            }
            .boxed()
        }
    }

    struct Harness {
        pipeline: Pipeline,
        calls: Arc<Calls>,
    }

    fn harness(
        scratch: &Path,
        mode: TranscriptMode,
        dim: usize,
        synth_fails: bool,
    ) -> Harness {
        let calls = Arc::new(Calls::default());
        let pipeline = Pipeline::new(
            AudioIngestor::new(scratch),
            Arc::new(StubTranscriber {
                mode,
                calls: Arc::clone(&calls),
            }),
            FeatureExtractor::new(FeatureConfig::default(), Arc::new(SymphoniaDecoder::new())),
            EmotionClassifier::new(Arc::new(StubModel {
                label: EmotionLabel::Sad,
                dim,
                calls: Arc::clone(&calls),
            })),
            Arc::new(EchoSynthesizer {
                fail: synth_fails,
                calls: Arc::clone(&calls),
            }),
        );
        Harness { pipeline, calls }
    }

    fn clip(secs: f32) -> Upload {
        Upload::new("clip.wav", wav_bytes(22_050, &sine(330.0, 22_050, secs)))
    }

    fn scratch_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|it| it.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn end_to_end_with_stub_stages() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), TranscriptMode::Fixed("hello there"), 40, false);

        let result = h.pipeline.run(clip(4.0)).await.unwrap();

        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            serde_json::json!({
                "prediction_text": "Sad",
                "transcript": "hello there",
                "gemini_response": "Sad|hello there"
            })
        );
        assert_eq!(h.calls.transcribe.load(Ordering::SeqCst), 1);
        assert_eq!(h.calls.scores.load(Ordering::SeqCst), 1);
        assert_eq!(h.calls.synthesize.load(Ordering::SeqCst), 1);
        assert_eq!(scratch_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn invalid_upload_invokes_no_stage() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), TranscriptMode::Fixed("x"), 40, false);

        let nameless = Upload::new("", wav_bytes(22_050, &sine(330.0, 22_050, 4.0)));
        let err = h.pipeline.run(nameless).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(IngestError::MissingFileName)));
        assert_eq!(err.to_string(), "No file selected");

        let empty = Upload::new("clip.wav", Vec::<u8>::new());
        assert!(matches!(
            h.pipeline.run(empty).await,
            Err(PipelineError::InvalidInput(IngestError::EmptyUpload))
        ));

        assert_eq!(h.calls.transcribe.load(Ordering::SeqCst), 0);
        assert_eq!(h.calls.scores.load(Ordering::SeqCst), 0);
        assert_eq!(h.calls.synthesize.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn synthesis_outage_fails_request_consistently() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), TranscriptMode::Fixed("hi"), 40, true);

        for _ in 0..3 {
            let err = h.pipeline.run(clip(4.0)).await.unwrap_err();
            assert!(matches!(err, PipelineError::SynthesisFailed(_)), "{err:?}");
            assert_eq!(err.stage(), Some(Stage::Synthesize));
        }
        assert_eq!(h.calls.synthesize.load(Ordering::SeqCst), 3);
        assert_eq!(scratch_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn synthesis_outage_degrades_consistently() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), TranscriptMode::Fixed("hi"), 40, true);
        assert_eq!(h.pipeline.policy(), SynthesisPolicy::FailRequest);
        let pipeline = h.pipeline.with_policy(SynthesisPolicy::Degrade);
        assert_eq!(pipeline.policy(), SynthesisPolicy::Degrade);

        for _ in 0..3 {
            let result = pipeline.run(clip(4.0)).await.unwrap();
            assert_eq!(result.emotion(), EmotionLabel::Sad);
            assert_eq!(result.transcript().as_str(), "hi");
            assert!(result.advisory().is_none());
            assert_eq!(
                serde_json::to_value(&result).unwrap()["gemini_response"],
                serde_json::Value::Null
            );
        }
    }

    #[tokio::test]
    async fn transcription_failure_is_distinguished_from_empty_speech() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), TranscriptMode::Fail, 40, false);

        let err = h.pipeline.run(clip(4.0)).await.unwrap_err();
        assert!(matches!(err, PipelineError::TranscriptionFailed(_)), "{err:?}");
        assert_eq!(h.calls.synthesize.load(Ordering::SeqCst), 0);
        assert_eq!(scratch_entries(dir.path()), 0);

        let h = harness(dir.path(), TranscriptMode::Fixed(""), 40, false);
        let result = h.pipeline.run(clip(4.0)).await.unwrap();
        assert!(result.transcript().is_empty());
        assert_eq!(result.advisory().unwrap().as_str(), "Sad|");
    }

    #[tokio::test]
    async fn undecodable_audio_wins_over_transcription_failure() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), TranscriptMode::Fail, 40, false);

        let garbage = Upload::new("clip.wav", b"not audio at all".to_vec());
        let err = h.pipeline.run(garbage).await.unwrap_err();

        assert!(
            matches!(
                err,
                PipelineError::UnprocessableAudio {
                    stage: Stage::ExtractFeatures,
                    ..
                }
            ),
            "{err:?}"
        );
        assert!(err.is_client_error());
        assert_eq!(scratch_entries(dir.path()), 0);
    }

    struct HostFaultDecoder;

    impl AudioDecoder for HostFaultDecoder {
        fn decode<'a>(
            &'a self,
            _artifact: &'a AudioArtifact,
        ) -> BoxFuture<'a, crate::decode::Result<DecodedAudio>> {
            async { Err(DecodeError::FfmpegUnavailable("download failed".to_owned())) }.boxed()
        }
    }

    #[tokio::test]
    async fn missing_decoder_backend_is_not_blamed_on_the_caller() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = harness(dir.path(), TranscriptMode::Fixed("hi"), 40, false);
        h.pipeline.extractor =
            FeatureExtractor::new(FeatureConfig::default(), Arc::new(HostFaultDecoder));

        let err = h.pipeline.run(clip(4.0)).await.unwrap_err();

        assert!(!err.is_client_error(), "{err}");
        assert!(matches!(
            err,
            PipelineError::ModelUnavailable {
                component: "ffmpeg",
                ..
            }
        ));
        assert_eq!(h.calls.synthesize.load(Ordering::SeqCst), 0);
        assert_eq!(scratch_entries(dir.path()), 0);
    }

    #[test]
    fn host_decode_faults_map_to_server_errors() {
        let io: PipelineError =
            FeatureError::Decode(DecodeError::Io(std::io::Error::other("EMFILE"))).into();
        assert!(!io.is_client_error());
        assert!(matches!(
            io,
            PipelineError::Internal {
                stage: Stage::ExtractFeatures,
                ..
            }
        ));

        let worker: PipelineError =
            TranscribeError::Decode(DecodeError::Worker("panicked".to_owned())).into();
        assert!(!worker.is_client_error());
        assert_eq!(worker.stage(), Some(Stage::Transcribe));

        let corrupt: PipelineError = FeatureError::Decode(DecodeError::NoAudioTrack).into();
        assert!(corrupt.is_client_error());
        assert_eq!(corrupt.stage(), Some(Stage::ExtractFeatures));
    }

    #[tokio::test]
    async fn clip_shorter_than_offset_is_unprocessable() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), TranscriptMode::Fixed("x"), 40, false);

        let err = h.pipeline.run(clip(0.3)).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnprocessableAudio { .. }), "{err:?}");

        let result = h.pipeline.run(clip(1.5)).await.unwrap();
        assert_eq!(result.emotion(), EmotionLabel::Sad);
    }

    #[tokio::test]
    async fn model_width_mismatch_is_a_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), TranscriptMode::Fixed("x"), 13, false);

        let err = h.pipeline.run(clip(4.0)).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::FeatureShapeMismatch(ClassifyError::FeatureShapeMismatch {
                expected: 13,
                actual: 40
            })
        ));
        assert!(!err.is_client_error());
        assert_eq!(h.calls.scores.load(Ordering::SeqCst), 0);
        assert_eq!(h.calls.synthesize.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_use_separate_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), TranscriptMode::ByteLen, 40, false);
        let pipeline = Arc::new(h.pipeline.with_inference_workers(InferenceWorkers::new(2).unwrap()));

        let uploads: Vec<(usize, Upload)> = (0..6)
            .map(|i| {
                let upload = clip(1.0 + i as f32 * 0.25);
                (upload.bytes.len(), upload)
            })
            .collect();

        let handles: Vec<_> = uploads
            .into_iter()
            .map(|(len, upload)| {
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move { (len, pipeline.run(upload).await) })
            })
            .collect();

        for handle in handles {
            let (len, result) = handle.await.unwrap();
            let result = result.unwrap();
            assert_eq!(result.transcript().as_str(), len.to_string());
        }
        assert_eq!(h.calls.transcribe.load(Ordering::SeqCst), 6);
        assert_eq!(scratch_entries(dir.path()), 0);
    }

    #[test]
    fn tracker_stops_at_terminal_states() {
        let mut tracker = RunTracker::new();
        tracker.advance(RunState::Ingested);
        tracker.advance(RunState::Failed(Stage::Transcribe));
        tracker.advance(RunState::Completed);
        assert_eq!(tracker.state, RunState::Failed(Stage::Transcribe));
    }

    #[test]
    fn startup_fails_when_model_is_missing() {
        let config = AppConfig {
            synthesis: crate::config::SynthesisConfig {
                api_key: crate::config::ApiKey::new("k").unwrap(),
                model: "m".to_owned(),
                base_url: crate::config::parse_base_url("http://127.0.0.1:9/v1").unwrap(),
                timeout: crate::config::RequestTimeout::from_secs(1).unwrap(),
            },
            asr: crate::config::AsrConfig {
                url: crate::config::parse_url("http://127.0.0.1:9/asr").unwrap(),
                api_key: None,
                model: "whisper-1".to_owned(),
                language: None,
                timeout: crate::config::RequestTimeout::from_secs(1).unwrap(),
                whisper_model: None,
            },
            emotion_model: "/missing/SpeechEmoModel.json".into(),
            scratch_dir: std::env::temp_dir(),
            inference_workers: InferenceWorkers::default(),
            synthesis_policy: SynthesisPolicy::FailRequest,
        };

        let err = Pipeline::from_config(&config).err().unwrap();
        assert!(matches!(
            err,
            PipelineError::ModelUnavailable {
                component: "emotion classifier",
                ..
            }
        ));
    }
}
