use thiserror::Error;

use crate::{ImageId, TrackId};

/// Failures of a [`crate::neighbor::NeighborIndex`]. These always point at a caller bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("index queried before build")]
    NotBuilt,
    #[error("dataset is empty")]
    EmptyDataset,
    #[error("descriptor dimension must be positive")]
    InvalidDimension,
    #[error("dataset holds {len} values, expected {rows} x {dim}")]
    MalformedDataset { len: usize, rows: usize, dim: usize },
    #[error("dimension mismatch: index has {expected}, query has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("number of neighbours must be positive")]
    InvalidNeighbourCount,
}

#[derive(Debug, Error)]
pub enum SfmError {
    #[error("insufficient data for {operation}: need {required}, got {actual}")]
    InsufficientData {
        operation: &'static str,
        required: usize,
        actual: usize,
    },
    #[error("geometric degeneracy: {0}")]
    GeometricDegeneracy(String),
    #[error(transparent)]
    IndexMisuse(#[from] IndexError),
    #[error("tracking lost at keyframe {keyframe_index} (image {image})")]
    TrackingLost {
        keyframe_index: usize,
        image: ImageId,
    },
    #[error("track {0} has no reconstructed structure")]
    MissingStructure(TrackId),
    #[error("image {0} has no camera")]
    MissingCamera(ImageId),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SfmError {
    pub fn insufficient(operation: &'static str, required: usize, actual: usize) -> SfmError {
        SfmError::InsufficientData {
            operation,
            required,
            actual,
        }
    }

    /// Errors the caller can recover from by skipping the image or pair.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SfmError::InsufficientData { .. }
                | SfmError::GeometricDegeneracy(_)
                | SfmError::TrackingLost { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SfmError>;
