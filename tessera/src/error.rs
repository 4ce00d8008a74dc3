use crate::types::Rank;

pub type Result<T> = std::result::Result<T, TesseraError>;

#[derive(Debug, thiserror::Error)]
pub enum TesseraError {
    #[error("peer {rank} disconnected unexpectedly")]
    PeerDisconnected { rank: Rank },

    #[error("rank {rank} not found in group")]
    UnknownPeer { rank: Rank },

    #[error("unsupported data type: {dtype:?} for operation {op}")]
    UnsupportedDType {
        dtype: crate::types::DataType,
        op: &'static str,
    },

    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("invalid rank {rank}: group size is {world_size}")]
    InvalidRank { rank: Rank, world_size: u32 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("null buffer pointer for a {bytes}-byte payload")]
    NullBuffer { bytes: usize },

    #[error("{operation} failed at rank {rank}: {reason}")]
    CollectiveFailed {
        operation: &'static str,
        rank: Rank,
        reason: String,
    },

    #[error("group split failed: {reason}")]
    SplitFailed { reason: String },

    #[error("locality information unavailable: {reason}")]
    TopologyUnavailable { reason: String },

    #[error("collective module {module} failed: {message}")]
    Module {
        module: &'static str,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl TesseraError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a `Module` error with just a message.
    pub fn module(module: &'static str, msg: impl Into<String>) -> Self {
        Self::Module {
            module,
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Module` error that wraps the module's own error type.
    pub fn module_with_source(
        module: &'static str,
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Module {
            module,
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }
}
