mod http;

use anyhow::Context;
use clap::Parser;
use mindsync_core::config::{
    default_scratch_dir, parse_base_url, parse_url, require_api_key, resolve_api_key, AppConfig,
    AsrConfig, Env, InferenceWorkers, RequestTimeout, StdEnv, SynthesisConfig, SynthesisPolicy,
    DEFAULT_ASR_MODEL, DEFAULT_ASR_TIMEOUT_SECS, DEFAULT_ASR_URL, DEFAULT_EMOTION_MODEL_PATH,
    DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL, DEFAULT_INFERENCE_WORKERS, DEFAULT_LISTEN_ADDR,
    DEFAULT_MAX_UPLOAD_MB, DEFAULT_SYNTHESIS_TIMEOUT_SECS, ENV_ASR_API_KEY, ENV_ASR_URL,
    ENV_EMOTION_MODEL, ENV_GEMINI_API_KEY, ENV_GEMINI_BASE_URL, ENV_GEMINI_MODEL, ENV_LISTEN,
    ENV_WHISPER_MODEL,
};
use mindsync_core::Pipeline;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mindsync")]
#[command(about = "Speech emotion detection with empathetic response suggestions")]
struct Args {
    #[arg(long, env = ENV_LISTEN, default_value = DEFAULT_LISTEN_ADDR)]
    listen: SocketAddr,

    /// Falls back to GEN_API_KEY.
    #[arg(long)]
    gemini_api_key: Option<String>,

    #[arg(long, env = ENV_GEMINI_MODEL, default_value = DEFAULT_GEMINI_MODEL)]
    gemini_model: String,

    #[arg(long, env = ENV_GEMINI_BASE_URL, default_value = DEFAULT_GEMINI_BASE_URL)]
    gemini_base_url: String,

    #[arg(long, default_value_t = DEFAULT_SYNTHESIS_TIMEOUT_SECS)]
    synthesis_timeout_secs: u64,

    /// `fail-request` or `degrade`.
    #[arg(long, default_value = "fail-request")]
    synthesis_policy: SynthesisPolicy,

    #[arg(long, env = ENV_EMOTION_MODEL, default_value = DEFAULT_EMOTION_MODEL_PATH)]
    emotion_model: PathBuf,

    #[arg(long, env = ENV_ASR_URL, default_value = DEFAULT_ASR_URL)]
    asr_url: String,

    /// Falls back to MINDSYNC_ASR_API_KEY.
    #[arg(long)]
    asr_api_key: Option<String>,

    #[arg(long, default_value = DEFAULT_ASR_MODEL)]
    asr_model: String,

    #[arg(long)]
    asr_language: Option<String>,

    #[arg(long, default_value_t = DEFAULT_ASR_TIMEOUT_SECS)]
    asr_timeout_secs: u64,

    /// Local ggml model; requires a build with `--features whisper`.
    #[arg(long, env = ENV_WHISPER_MODEL)]
    whisper_model: Option<PathBuf>,

    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_INFERENCE_WORKERS)]
    inference_workers: usize,

    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_MB)]
    max_upload_mb: usize,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let env = StdEnv;
    let cfg = build_config(&args, &env)?;
    let max_upload_bytes = upload_limit_bytes(args.max_upload_mb)?;

    tracing::info!(
        gemini_model = %cfg.synthesis.model,
        emotion_model = %cfg.emotion_model.display(),
        scratch_dir = %cfg.scratch_dir.display(),
        inference_workers = cfg.inference_workers.get(),
        "config loaded"
    );

    let pipeline = Pipeline::from_config(&cfg).context("failed to initialize pipeline")?;
    tracing::info!(synthesis_policy = ?pipeline.policy(), "pipeline ready");
    serve(args.listen, Arc::new(pipeline), max_upload_bytes).await
}

async fn serve(
    listen: SocketAddr,
    pipeline: Arc<Pipeline>,
    max_upload_bytes: usize,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    tracing::info!(addr = %listen, "listening");

    axum::serve(listener, http::router(pipeline, max_upload_bytes))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid --log-level: {level}"))?,
        )
        .from_env_lossy();

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn upload_limit_bytes(mb: usize) -> anyhow::Result<usize> {
    if mb == 0 {
        anyhow::bail!("--max-upload-mb must be > 0");
    }
    mb.checked_mul(1024 * 1024)
        .with_context(|| format!("--max-upload-mb {mb} is too large"))
}

fn build_config(args: &Args, env: &impl Env) -> anyhow::Result<AppConfig> {
    let gemini_key = require_api_key(args.gemini_api_key.clone(), ENV_GEMINI_API_KEY, env)?;
    let asr_key = resolve_api_key(args.asr_api_key.clone(), ENV_ASR_API_KEY, env)?;

    let synthesis = SynthesisConfig {
        api_key: gemini_key,
        model: args.gemini_model.clone(),
        base_url: parse_base_url(&args.gemini_base_url)?,
        timeout: RequestTimeout::from_secs(args.synthesis_timeout_secs)
            .context("--synthesis-timeout-secs")?,
    };

    let asr = AsrConfig {
        url: parse_url(&args.asr_url)?,
        api_key: asr_key,
        model: args.asr_model.clone(),
        language: args.asr_language.clone(),
        timeout: RequestTimeout::from_secs(args.asr_timeout_secs).context("--asr-timeout-secs")?,
        whisper_model: args.whisper_model.clone(),
    };

    Ok(AppConfig {
        synthesis,
        asr,
        emotion_model: args.emotion_model.clone(),
        scratch_dir: args.scratch_dir.clone().unwrap_or_else(default_scratch_dir),
        inference_workers: InferenceWorkers::new(args.inference_workers)
            .context("--inference-workers")?,
        synthesis_policy: args.synthesis_policy,
    })
}
