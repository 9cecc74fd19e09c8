//! Error types for map training and position assignment

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SomError {
    #[error("feature dimension mismatch: map expects {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("map has no units")]
    EmptyMap,

    #[error("invalid grid shape {width}x{height}x{depth}")]
    InvalidShape {
        width: usize,
        height: usize,
        depth: usize,
    },

    #[error("training task ended without a result")]
    TaskAborted,
}

pub type Result<T> = std::result::Result<T, SomError>;
