use crate::config::Config;
use facenet_core::FacePipeline;
use std::sync::Arc;

/// What the handlers run against, chosen once at startup.
pub enum Backend {
    Model { pipeline: FacePipeline, model_name: String },
    Stub,
}

impl Backend {
    /// Load both models, falling back to stub mode if either cannot be loaded.
    pub fn from_config(config: &Config) -> Self {
        if config.force_stub {
            tracing::warn!("stub mode forced by configuration");
            return Self::Stub;
        }

        match FacePipeline::load(
            &config.detector_model,
            &config.embedder_model,
            config.pipeline.clone(),
            config.intra_threads,
        ) {
            Ok(pipeline) => {
                tracing::info!(
                    detector = %config.detector_model.display(),
                    embedder = %config.embedder_model.display(),
                    model = %config.model_name,
                    "models loaded"
                );
                Self::Model { pipeline, model_name: config.model_name.clone() }
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not load models, serving stub results");
                Self::Stub
            }
        }
    }

    pub fn is_stub(&self) -> bool {
        matches!(self, Self::Stub)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<Backend>,
    pub min_image_size: u32,
}

impl AppState {
    pub fn new(backend: Backend, min_image_size: u32) -> Self {
        Self { backend: Arc::new(backend), min_image_size }
    }
}
