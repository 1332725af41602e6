use crate::types::{DataType, Device, Handle, Rank};

pub type Result<T> = std::result::Result<T, CollError>;

/// Failure reported by a communication engine.
///
/// Engines are free to use their own error types; the client wraps whatever
/// they return into [`CollError::Internal`] without interpreting it.
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum CollError {
    #[error("tensor type {dtype} on {device} is not supported by this build")]
    UnsupportedType { dtype: DataType, device: Device },

    #[error("tensor with shape {shape:?} is required to be contiguous")]
    NotContiguous { shape: Vec<usize> },

    #[error("running accelerator Adasum on a heterogeneous cluster is not supported")]
    HeterogeneousAdasum,

    #[error("running accelerator Adasum with a non-power-of-two node count ({nodes}) is not supported")]
    NonPowerOfTwoNodes { nodes: u32 },

    #[error("running Adasum with a non-power-of-two rank count ({ranks}) is not supported")]
    NonPowerOfTwoRanks { ranks: u32 },

    #[error("accelerator Adasum requires a GPU-aware transport, which this build lacks")]
    AdasumGpuTransportMissing,

    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<BackendError>,
    },

    #[error("handle {handle} registered twice")]
    HandleConflict { handle: Handle },

    #[error("shape mismatch in {operation}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        operation: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("element type mismatch in {operation}: expected {expected}, got {actual}")]
    DTypeMismatch {
        operation: &'static str,
        expected: DataType,
        actual: DataType,
    },

    #[error("invalid split sizes {splits:?} for {rows} rows across {world_size} ranks")]
    InvalidSplits {
        splits: Vec<i64>,
        rows: usize,
        world_size: u32,
    },

    #[error("invalid rank {rank}: world size is {world_size}")]
    InvalidRank { rank: Rank, world_size: u32 },

    #[error("{operation} requires at least one tensor")]
    EmptyGroup { operation: &'static str },

    #[error("{operation}: {reason}")]
    UnexpectedOutput {
        operation: &'static str,
        reason: String,
    },

    #[error("internal lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

/// Coarse classification of [`CollError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Element type / memory space not built into the engine.
    UnsupportedType,
    /// Tensor memory layout is not contiguous.
    Layout,
    /// A topology precondition for the requested op does not hold.
    Capability,
    /// Failure surfaced by the engine, or a broken engine contract.
    Internal,
    /// Malformed arguments from the caller.
    Usage,
}

impl CollError {
    /// Create an `Internal` error with just a message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            source: None,
        }
    }

    /// Create an `Internal` error wrapping an engine failure.
    pub fn internal_with_source(msg: impl Into<String>, source: BackendError) -> Self {
        Self::Internal {
            message: msg.into(),
            source: Some(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CollError::UnsupportedType { .. } => ErrorKind::UnsupportedType,
            CollError::NotContiguous { .. } => ErrorKind::Layout,
            CollError::HeterogeneousAdasum
            | CollError::NonPowerOfTwoNodes { .. }
            | CollError::NonPowerOfTwoRanks { .. }
            | CollError::AdasumGpuTransportMissing => ErrorKind::Capability,
            CollError::Internal { .. }
            | CollError::HandleConflict { .. }
            | CollError::LockPoisoned(_) => ErrorKind::Internal,
            CollError::ShapeMismatch { .. }
            | CollError::DTypeMismatch { .. }
            | CollError::InvalidSplits { .. }
            | CollError::InvalidRank { .. }
            | CollError::EmptyGroup { .. }
            | CollError::UnexpectedOutput { .. } => ErrorKind::Usage,
        }
    }

    pub fn is_capability(&self) -> bool {
        self.kind() == ErrorKind::Capability
    }
}
