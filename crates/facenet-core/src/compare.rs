//! Pairwise embedding comparison.
//!
//! Euclidean distance rescaled linearly into a [0, 1] similarity with a fixed
//! decision threshold.

use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MAX_DISTANCE: f32 = 1.2;
pub const DEFAULT_SAME_THRESHOLD: f32 = 0.8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompareError {
    #[error("embedding dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareConfig {
    /// Distance mapped to similarity 0.
    pub max_distance: f32,
    /// Similarity strictly above this means "same person".
    pub threshold: f32,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            max_distance: DEFAULT_MAX_DISTANCE,
            threshold: DEFAULT_SAME_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    pub similarity: f32,
    pub is_same: bool,
    pub distance: f32,
    pub threshold: f32,
}

/// Compare two embeddings of equal, non-zero length.
pub fn compare(a: &Embedding, b: &Embedding, config: &CompareConfig) -> Result<Comparison, CompareError> {
    if a.len() != b.len() || a.is_empty() {
        return Err(CompareError::DimensionMismatch { left: a.len(), right: b.len() });
    }

    let distance = a.euclidean_distance(b);
    let similarity = (1.0 - distance / config.max_distance).max(0.0);

    Ok(Comparison {
        similarity,
        is_same: similarity > config.threshold,
        distance,
        threshold: config.threshold,
    })
}
