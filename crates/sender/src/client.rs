//! Coordinator client trait.
//!
//! The upload engine talks to the coordinator only through
//! [`CoordinatorClient`], so it can be driven by the HTTP client in
//! production and by an in-process coordinator in tests.

use std::future::Future;
use std::pin::Pin;

use ferry_protocol::{
    AssembleResponse, ChunkUploadResponse, ErrorBody, ErrorCode, InitUploadRequest,
    InitUploadResponse, MissingResponse, TransferInfo,
};

use crate::retry::FailureClass;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors produced by a coordinator client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("coordinator rejected request ({status} {}): {}", error_name(.body.error), .body.message)]
    Rejected { status: u16, body: ErrorBody },

    #[error("unexpected status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("downloaded digest {actual} does not match {expected}")]
    DigestMismatch { expected: String, actual: String },

    #[error("unexpected response: {0}")]
    Unexpected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn error_name(code: ErrorCode) -> String {
    serde_json::to_value(code)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{code:?}"))
}

impl ClientError {
    /// The coordinator's error code, when it sent one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Rejected { body, .. } => Some(body.error),
            _ => None,
        }
    }

    pub fn failure_class(&self) -> FailureClass {
        match self {
            ClientError::Rejected { body, .. } => match body.error {
                ErrorCode::CorruptChunk => FailureClass::Integrity,
                ErrorCode::Internal => FailureClass::Transient,
                _ => FailureClass::Protocol,
            },
            ClientError::Status { status, .. } => {
                if *status >= 500 || *status == 408 || *status == 429 {
                    FailureClass::Transient
                } else {
                    FailureClass::Protocol
                }
            }
            ClientError::Http(e) => {
                if e.is_builder() || e.is_decode() {
                    FailureClass::Protocol
                } else {
                    FailureClass::Transient
                }
            }
            ClientError::Timeout => FailureClass::Transient,
            ClientError::DigestMismatch { .. } => FailureClass::Integrity,
            ClientError::Unexpected(_) | ClientError::Io(_) => FailureClass::Protocol,
        }
    }
}

/// Abstract connection to a coordinator.
///
/// Borrowed arguments are copied before the returned future is built, so
/// the future only borrows `self`.
pub trait CoordinatorClient: Send + Sync + 'static {
    fn init_upload(
        &self,
        req: &InitUploadRequest,
    ) -> BoxFuture<'_, Result<InitUploadResponse, ClientError>>;

    fn upload_chunk(
        &self,
        transfer_id: &str,
        chunk_index: u32,
        checksum: &str,
        data: Vec<u8>,
    ) -> BoxFuture<'_, Result<ChunkUploadResponse, ClientError>>;

    fn missing(&self, transfer_id: &str) -> BoxFuture<'_, Result<MissingResponse, ClientError>>;

    fn assemble(&self, transfer_id: &str)
    -> BoxFuture<'_, Result<AssembleResponse, ClientError>>;

    fn cancel(&self, transfer_id: &str) -> BoxFuture<'_, Result<TransferInfo, ClientError>>;
}
