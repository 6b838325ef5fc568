use cv_core::{ClipError, PickError, SceneError};
use thiserror::Error;

/// Engine operation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("engine is not initialized")]
    NotInitialized,
    #[error("engine is already initialized")]
    AlreadyInitialized,
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error(transparent)]
    Clip(#[from] ClipError),
    #[error(transparent)]
    Pick(#[from] PickError),
    #[error("operation requires a GPU surface")]
    NoGpu,
    #[error("image export failed: {0}")]
    Export(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
