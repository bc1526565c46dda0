use crate::asr::{TranscribeError, Transcriber, Transcript};
use crate::decode::AudioDecoder;
use crate::ingest::AudioArtifact;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::Path;
use std::sync::{Arc, Mutex, Once};
use whisper_rs::{
    install_logging_hooks, FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters,
};

const WHISPER_SAMPLE_RATE: u32 = 16_000;

static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// In-process whisper.cpp transcriber. The model is loaded once; inference is
/// serialized behind a mutex and runs on the blocking pool.
pub struct WhisperTranscriber {
    context: Arc<Mutex<WhisperContext>>,
    decoder: Arc<dyn AudioDecoder>,
    language: Option<String>,
}

impl std::fmt::Debug for WhisperTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperTranscriber")
            .field("language", &self.language)
            .field("context", &"<WhisperContext>")
            .finish()
    }
}

impl WhisperTranscriber {
    pub fn load(
        model_path: &Path,
        language: Option<String>,
        decoder: Arc<dyn AudioDecoder>,
    ) -> Result<Self, TranscribeError> {
        LOGGING_HOOKS_INSTALLED.call_once(install_logging_hooks);

        if !model_path.exists() {
            return Err(TranscribeError::ModelLoad(format!(
                "model file not found: {}",
                model_path.display()
            )));
        }
        let path = model_path
            .to_str()
            .ok_or_else(|| TranscribeError::ModelLoad("model path is not valid UTF-8".to_owned()))?;
        let context = WhisperContext::new_with_params(path, WhisperContextParameters::default())
            .map_err(|e| TranscribeError::ModelLoad(e.to_string()))?;

        tracing::info!(model = %model_path.display(), "whisper model loaded");
        Ok(Self {
            context: Arc::new(Mutex::new(context)),
            decoder,
            language,
        })
    }
}

fn run_inference(
    context: &Mutex<WhisperContext>,
    language: Option<&str>,
    samples: &[f32],
) -> Result<String, TranscribeError> {
    let context = context
        .lock()
        .map_err(|e| TranscribeError::Inference(format!("context lock poisoned: {e}")))?;
    let mut state = context
        .create_state()
        .map_err(|e| TranscribeError::Inference(e.to_string()))?;

    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
    params.set_language(language);
    params.set_print_special(false);
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);

    state
        .full(params, samples)
        .map_err(|e| TranscribeError::Inference(e.to_string()))?;

    let mut text = String::new();
    for segment in state.as_iter() {
        text.push_str(&segment.to_string());
    }
    Ok(text.trim().to_owned())
}

impl Transcriber for WhisperTranscriber {
    fn transcribe<'a>(
        &'a self,
        artifact: &'a AudioArtifact,
    ) -> BoxFuture<'a, Result<Transcript, TranscribeError>> {
        async move {
            let audio = self
                .decoder
                .decode(artifact)
                .await?
                .resampled(WHISPER_SAMPLE_RATE);

            let context = Arc::clone(&self.context);
            let language = self.language.clone();
            let text = tokio::task::spawn_blocking(move || {
                run_inference(&context, language.as_deref(), &audio.samples)
            })
            .await
            .map_err(|e| TranscribeError::Worker(e.to_string()))??;

            Ok(Transcript::new(text))
        }
        .boxed()
    }
}
