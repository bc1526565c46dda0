use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, str::FromStr, time::Duration};
use url::Url;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5000";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-pro-001";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1/";
pub const DEFAULT_ASR_URL: &str = "http://127.0.0.1:8000/v1/audio/transcriptions";
pub const DEFAULT_ASR_MODEL: &str = "whisper-1";
pub const DEFAULT_EMOTION_MODEL_PATH: &str = "SpeechEmoModel.json";
pub const DEFAULT_SYNTHESIS_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_ASR_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_INFERENCE_WORKERS: usize = 2;
pub const DEFAULT_MAX_UPLOAD_MB: usize = 25;
pub const ENV_LISTEN: &str = "MINDSYNC_LISTEN";
pub const ENV_GEMINI_API_KEY: &str = "GEN_API_KEY";
pub const ENV_GEMINI_MODEL: &str = "GEMINI_MODEL";
pub const ENV_GEMINI_BASE_URL: &str = "GEMINI_BASE_URL";
pub const ENV_EMOTION_MODEL: &str = "MINDSYNC_EMOTION_MODEL";
pub const ENV_ASR_URL: &str = "MINDSYNC_ASR_URL";
pub const ENV_ASR_API_KEY: &str = "MINDSYNC_ASR_API_KEY";
pub const ENV_WHISPER_MODEL: &str = "MINDSYNC_WHISPER_MODEL";

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new<S: Into<String>>(value: S) -> Result<Self, ConfigError> {
        let v = value.into();
        if v.trim().is_empty() {
            return Err(ConfigError::EmptyApiKey);
        }
        Ok(Self(v))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(**redacted**)")
    }
}

/// Upper bound on a single outbound call.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestTimeout {
    pub secs: u64,
}

impl RequestTimeout {
    pub fn from_secs(secs: u64) -> Result<Self, ConfigError> {
        if secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(Self { secs })
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.secs)
    }
}

/// Number of requests allowed to run feature extraction and classification at once.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InferenceWorkers(usize);

impl InferenceWorkers {
    pub fn new(count: usize) -> Result<Self, ConfigError> {
        if count == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(Self(count))
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

impl Default for InferenceWorkers {
    fn default() -> Self {
        Self(DEFAULT_INFERENCE_WORKERS)
    }
}

/// What a request returns when the advisory service fails.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SynthesisPolicy {
    /// The whole request fails with `SynthesisFailed`.
    #[default]
    FailRequest,
    /// Emotion and transcript are returned without advisory text.
    Degrade,
}

impl FromStr for SynthesisPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-request" | "fail" => Ok(Self::FailRequest),
            "degrade" | "degraded" => Ok(Self::Degrade),
            other => Err(ConfigError::UnknownPolicy(other.to_owned())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SynthesisConfig {
    pub api_key: ApiKey,
    pub model: String,
    pub base_url: Url,
    pub timeout: RequestTimeout,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AsrConfig {
    pub url: Url,
    pub api_key: Option<ApiKey>,
    pub model: String,
    pub language: Option<String>,
    pub timeout: RequestTimeout,
    /// Local ggml model; when set, the in-process Whisper backend is used instead of `url`.
    pub whisper_model: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub synthesis: SynthesisConfig,
    pub asr: AsrConfig,
    pub emotion_model: PathBuf,
    pub scratch_dir: PathBuf,
    pub inference_workers: InferenceWorkers,
    pub synthesis_policy: SynthesisPolicy,
}

pub fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("mindsync")
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("api key must not be empty")]
    EmptyApiKey,
    #[error("missing api key: pass it on the command line or set {env_key}")]
    MissingApiKey { env_key: String },
    #[error("timeout must be > 0 s")]
    ZeroTimeout,
    #[error("inference workers must be >= 1")]
    ZeroWorkers,
    #[error("invalid url {value:?}: {reason}")]
    InvalidUrl { value: String, reason: String },
    #[error("unknown synthesis policy {0:?} (expected fail-request or degrade)")]
    UnknownPolicy(String),
}

pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: std::collections::BTreeMap<String, String>,
}

impl MapEnv {
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_owned(), value.to_owned());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn resolve_api_key(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Result<Option<ApiKey>, ConfigError> {
    match cli_value {
        Some(v) => Ok(Some(ApiKey::new(v)?)),
        None => match env.var(env_key) {
            Some(v) => Ok(Some(ApiKey::new(v)?)),
            None => Ok(None),
        },
    }
}

/// Like [`resolve_api_key`], but absence is an error. Used for credentials the
/// service cannot start without.
pub fn require_api_key(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Result<ApiKey, ConfigError> {
    resolve_api_key(cli_value, env_key, env)?.ok_or_else(|| ConfigError::MissingApiKey {
        env_key: env_key.to_owned(),
    })
}

pub fn parse_url(value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        value: value.to_owned(),
        reason: e.to_string(),
    })
}

/// Parses a base URL that relative paths get joined onto; forces a trailing slash
/// so `join` appends instead of replacing the last segment.
pub fn parse_base_url(value: &str) -> Result<Url, ConfigError> {
    let mut url = parse_url(value)?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidUrl {
            value: value.to_owned(),
            reason: "not usable as a base url".to_owned(),
        });
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
