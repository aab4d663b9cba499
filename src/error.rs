use thiserror::Error;

/// Violations of pipeline ordering or state. These indicate a caller bug, not bad input.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("phase output '{0}' was requested before the phase that produces it ran")]
    MissingOutput(&'static str),

    #[error("compilation was cancelled before phase '{0}'")]
    Cancelled(&'static str),

    #[error("invalid state transition: {0}")]
    InvalidState(String),

    #[error("intermediate tree invariant violated: {0}")]
    Ir(#[from] IrError),

    #[error("no project item at '{0}'")]
    ItemNotFound(String),

    #[error("failed to read project item: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IrError {
    #[error("cannot pop from an empty node builder")]
    EmptyStack,

    #[error("insert index {index} is out of range for a node with {len} children")]
    InsertOutOfRange { index: usize, len: usize },

    #[error("document has no primary {0}")]
    MissingPrimary(&'static str),

    #[error("document has more than one primary {0}")]
    DuplicatePrimary(&'static str),
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("json encode/decode failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary encode failed: {0}")]
    Encode(bincode::Error),

    #[error("binary decode failed: {0}")]
    Decode(bincode::Error),

    #[error("binary format error: {message}")]
    Format { message: String },
}
