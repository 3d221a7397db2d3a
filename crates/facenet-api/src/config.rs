use anyhow::Context;
use facenet_core::normalize::ResizeFilter;
use facenet_core::{ConfidencePolicy, PipelineConfig};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_BIND: &str = "0.0.0.0:8000";
const DEFAULT_MODEL_NAME: &str = "FaceNet 20180402-114759";
const DEFAULT_BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Service configuration.
///
/// Resolved from built-in defaults, then an optional TOML file named by
/// `FACENET_CONFIG`, then `FACENET_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    /// Directory holding the ONNX model files.
    pub model_dir: PathBuf,
    pub detector_model: PathBuf,
    pub embedder_model: PathBuf,
    /// Model name reported by `/health`.
    pub model_name: String,
    /// Skip model loading and serve placeholder results.
    pub force_stub: bool,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
    /// Maximum request body size in bytes.
    pub body_limit: usize,
    /// Images below this size on either axis are rejected before detection.
    pub min_image_size: u32,
    pub pipeline: PipelineConfig,
}

/// Shape of the optional TOML file. Every field may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    bind: Option<String>,
    model_dir: Option<PathBuf>,
    detector_model: Option<PathBuf>,
    embedder_model: Option<PathBuf>,
    model_name: Option<String>,
    force_stub: Option<bool>,
    intra_threads: Option<usize>,
    body_limit: Option<usize>,
    min_image_size: Option<u32>,
    pipeline: Option<PipelineConfig>,
}

impl Config {
    /// Load configuration from the config file (if any) and the environment.
    pub fn load() -> anyhow::Result<Self> {
        let file = match std::env::var("FACENET_CONFIG") {
            Ok(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config file {path}"))?;
                toml::from_str(&text).with_context(|| format!("parsing config file {path}"))?
            }
            Err(_) => FileConfig::default(),
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bind = env("FACENET_BIND")
            .or(file.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind: SocketAddr = bind
            .parse()
            .with_context(|| format!("invalid bind address {bind}"))?;

        let model_dir = env("FACENET_MODEL_DIR")
            .map(PathBuf::from)
            .or(file.model_dir)
            .unwrap_or_else(facenet_core::default_model_dir);

        let detector_model = env("FACENET_DETECTOR_MODEL")
            .map(PathBuf::from)
            .or(file.detector_model)
            .unwrap_or_else(|| model_dir.join(facenet_core::DETECTOR_MODEL_FILE));

        // MODEL_PATH is the variable older deployments set for the FaceNet graph.
        let embedder_model = env("FACENET_EMBEDDER_MODEL")
            .or_else(|| env("MODEL_PATH"))
            .map(PathBuf::from)
            .or(file.embedder_model)
            .unwrap_or_else(|| model_dir.join(facenet_core::EMBEDDER_MODEL_FILE));

        let mut pipeline = file.pipeline.unwrap_or_default();
        apply_pipeline_env(&mut pipeline, &env);

        Ok(Self {
            bind,
            model_dir,
            detector_model,
            embedder_model,
            model_name: env("FACENET_MODEL_NAME")
                .or(file.model_name)
                .unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string()),
            force_stub: env_bool(&env, "FACENET_FORCE_STUB")
                .or(file.force_stub)
                .unwrap_or(false),
            intra_threads: env_parse(&env, "FACENET_INTRA_THREADS")
                .or(file.intra_threads)
                .unwrap_or(2),
            body_limit: env_parse(&env, "FACENET_BODY_LIMIT")
                .or(file.body_limit)
                .unwrap_or(DEFAULT_BODY_LIMIT),
            min_image_size: env_parse(&env, "FACENET_MIN_IMAGE_SIZE")
                .or(file.min_image_size)
                .unwrap_or(facenet_core::decode::MIN_IMAGE_SIZE),
            pipeline,
        })
    }
}

fn apply_pipeline_env(pipeline: &mut PipelineConfig, env: &impl Fn(&str) -> Option<String>) {
    if let Some(min_confidence) = env_parse(env, "FACENET_MIN_CONFIDENCE") {
        pipeline.quality.confidence = ConfidencePolicy::Strict { min_confidence };
    }
    if env_bool(env, "FACENET_LENIENT") == Some(true) {
        pipeline.quality.confidence = ConfidencePolicy::Lenient;
    }
    if let Some(v) = env_parse(env, "FACENET_MIN_SHARPNESS") {
        pipeline.quality.min_sharpness = v;
    }
    if let Some(v) = env_parse(env, "FACENET_CROP_MARGIN") {
        pipeline.margin_factor = v;
    }
    if let Some(v) = env_parse::<ResizeFilter>(env, "FACENET_RESIZE_FILTER") {
        pipeline.resize_filter = v;
    }
    if let Some(v) = env_bool(env, "FACENET_CONTRAST_ENHANCEMENT") {
        pipeline.contrast_enhancement = v;
    }
    if let Some(v) = env_parse(env, "FACENET_MAX_DISTANCE") {
        pipeline.compare.max_distance = v;
    }
    if let Some(v) = env_parse(env, "FACENET_SAME_THRESHOLD") {
        pipeline.compare.threshold = v;
    }
}

fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment value");
            None
        }
    }
}

fn env_bool(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    env(key).map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
