//! Coordinator error types.

use ferry_protocol::{ErrorCode, TransferStatus};

use crate::store::StoreError;

/// Errors produced by the coordinator core.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("unknown transfer: {0}")]
    UnknownTransfer(String),

    #[error("chunk index {index} out of range (chunk count {count})")]
    IndexOutOfRange { index: u32, count: u32 },

    #[error("chunk {index} already stored with a different checksum")]
    ChunkConflict { index: u32 },

    #[error("chunk {index} rejected: {reason}")]
    CorruptChunk { index: u32, reason: String },

    #[error("transfer {id} is {status}")]
    TransferClosed { id: String, status: TransferStatus },

    #[error("manifest does not match existing transfer {0}")]
    ManifestMismatch(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transfer {id} is not ready: {reason}")]
    NotReady { id: String, reason: String },

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    /// Wire code reported to clients.
    pub fn code(&self) -> ErrorCode {
        match self {
            CoordinatorError::UnknownTransfer(_) => ErrorCode::UnknownTransfer,
            CoordinatorError::IndexOutOfRange { .. } => ErrorCode::IndexOutOfRange,
            CoordinatorError::ChunkConflict { .. } => ErrorCode::ChunkConflict,
            CoordinatorError::CorruptChunk { .. } => ErrorCode::CorruptChunk,
            CoordinatorError::TransferClosed { .. } => ErrorCode::TransferClosed,
            CoordinatorError::ManifestMismatch(_) => ErrorCode::ManifestMismatch,
            CoordinatorError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            CoordinatorError::NotReady { .. } => ErrorCode::NotReady,
            CoordinatorError::Store(_) | CoordinatorError::Io(_) | CoordinatorError::Internal(_) => {
                ErrorCode::Internal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_wire() {
        assert_eq!(
            CoordinatorError::ChunkConflict { index: 1 }.code(),
            ErrorCode::ChunkConflict
        );
        assert_eq!(
            CoordinatorError::Internal("boom".into()).code(),
            ErrorCode::Internal
        );
        assert_eq!(
            CoordinatorError::Store(StoreError::NotFound("x".into())).code(),
            ErrorCode::Internal
        );
    }
}
