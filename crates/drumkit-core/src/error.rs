//! Error types for drumkit

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("Out of range: {0}")]
    OutOfRange(String),
    #[error("Length mismatch: {0}")]
    LengthMismatch(String),
    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

pub type Result<T> = std::result::Result<T, GridError>;
