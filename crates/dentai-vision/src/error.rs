use thiserror::Error;

use crate::BackendIdentity;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DetectError {
    /// The source image could not be decoded or has no pixels.
    #[error("invalid input image: {0}")]
    InvalidInput(String),

    #[error("preprocessing failed: {0}")]
    PreprocessingFailed(String),

    /// Raw tensor is malformed: wrong channel count, wrong length, non-finite values.
    #[error("invalid model output: {0}")]
    InvalidModelOutput(String),

    #[error("{backend} backend unavailable: {reason}")]
    ModelUnavailable {
        backend: BackendIdentity,
        reason: String,
    },

    #[error("{backend} inference failed: {detail}")]
    InferenceFailed {
        backend: BackendIdentity,
        detail: String,
    },

    #[error("invalid detection config: {0}")]
    InvalidConfig(String),
}

impl DetectError {
    /// Backend-level failures the fallback controller may retry against another backend.
    /// Everything else is fatal to the call.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DetectError::ModelUnavailable { .. } | DetectError::InferenceFailed { .. }
        )
    }

    pub(crate) fn inference(backend: BackendIdentity, err: anyhow::Error) -> Self {
        DetectError::InferenceFailed {
            backend,
            detail: format!("{:#}", err),
        }
    }
}

pub type Result<T, E = DetectError> = std::result::Result<T, E>;
