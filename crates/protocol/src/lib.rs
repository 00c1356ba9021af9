pub mod constants;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{
    AssembleResponse, ChunkQuery, ChunkUploadResponse, ErrorBody, ErrorCode, HealthResponse,
    InitUploadRequest, InitUploadResponse, MissingResponse, TransferInfo,
};
pub use types::{AssemblyFailure, ChunkOutcome, FailureReason, Priority, TransferStatus};
