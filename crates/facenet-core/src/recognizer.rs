//! FaceNet embedding extraction via ONNX Runtime.
//!
//! The network takes one prewhitened NHWC face `[1, 160, 160, 3]` and returns
//! `[1, N]` embeddings. The exported graph already L2-normalizes its output.

use crate::normalize::NormalizedFace;
use crate::types::Embedding;
use ndarray::{Array4, Axis};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("embedding model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("embedding length changed: expected {expected}, got {actual}")]
    DimensionChanged { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Turns a normalized face into an embedding.
pub trait FaceEmbedder: Send + Sync {
    fn embed(&self, face: &NormalizedFace) -> Result<Embedding, RecognizerError>;
}

/// FaceNet embedder backed by an ONNX export of the frozen graph.
pub struct FacenetEmbedder {
    session: Mutex<Session>,
    /// Pinned on first successful inference.
    dimension: OnceLock<usize>,
}

impl FacenetEmbedder {
    /// Load the FaceNet ONNX model from the given path.
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads).map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded FaceNet model"
        );

        Ok(Self {
            session: Mutex::new(session),
            dimension: OnceLock::new(),
        })
    }

    /// Embedding length, once the model has produced one.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension.get().copied()
    }
}

impl FaceEmbedder for FacenetEmbedder {
    fn embed(&self, face: &NormalizedFace) -> Result<Embedding, RecognizerError> {
        let input: Array4<f32> = batch_of_one(face);

        let raw: Vec<f32> = {
            let mut session = self.session.lock().map_err(|_| {
                RecognizerError::InferenceFailed("embedding session lock poisoned".into())
            })?;
            let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
            let (_, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;
            data.to_vec()
        };

        check_dimension(&self.dimension, raw.len())?;
        Ok(Embedding::new(raw))
    }
}

/// Add the leading batch axis: HWC → NHWC.
fn batch_of_one(face: &NormalizedFace) -> Array4<f32> {
    face.tensor().clone().insert_axis(Axis(0))
}

/// Pin the embedding length on first use and reject any later change.
fn check_dimension(pinned: &OnceLock<usize>, actual: usize) -> Result<(), RecognizerError> {
    if actual == 0 {
        return Err(RecognizerError::InferenceFailed("model returned an empty embedding".into()));
    }
    let expected = *pinned.get_or_init(|| {
        tracing::info!(dimension = actual, "embedding dimension pinned");
        actual
    });
    if expected != actual {
        return Err(RecognizerError::DimensionChanged { expected, actual });
    }
    Ok(())
}
