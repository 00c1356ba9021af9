//! HTTP implementation of [`CoordinatorClient`] plus the receiver-side
//! calls used by the CLI.

use std::path::Path;
use std::time::Duration;

use ferry_protocol::constants::{
    ROUTE_ASSEMBLE, ROUTE_CANCEL, ROUTE_CHUNK, ROUTE_DOWNLOAD, ROUTE_FILES, ROUTE_HEALTH,
    ROUTE_INIT, ROUTE_MISSING,
};
use ferry_protocol::{
    AssembleResponse, ChunkQuery, ChunkUploadResponse, ErrorBody, HealthResponse,
    InitUploadRequest, InitUploadResponse, MissingResponse, TransferInfo,
};
use ferry_transfer::Sha256Digest;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::client::{BoxFuture, ClientError, CoordinatorClient};

/// Coordinator reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCoordinator {
    client: reqwest::Client,
    base: String,
    timeout: Duration,
}

/// Result of a verified download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadReport {
    pub bytes: u64,
    pub checksum: String,
}

impl HttpCoordinator {
    /// Creates a client for `endpoint`. `timeout` bounds every API call;
    /// downloads are not bounded.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base: endpoint.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Builds `count` independent clients for a connection pool.
    pub fn pool(endpoint: &str, timeout: Duration, count: usize) -> Result<Vec<Self>, ClientError> {
        (0..count.max(1))
            .map(|_| Self::new(endpoint, timeout))
            .collect()
    }

    pub fn endpoint(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        let resp = self
            .client
            .get(self.url(ROUTE_HEALTH))
            .timeout(self.timeout)
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn list_files(&self) -> Result<Vec<TransferInfo>, ClientError> {
        let resp = self
            .client
            .get(self.url(ROUTE_FILES))
            .timeout(self.timeout)
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn file_info(&self, transfer_id: &str) -> Result<TransferInfo, ClientError> {
        let resp = self
            .client
            .get(self.url(&format!("{ROUTE_FILES}/{transfer_id}")))
            .timeout(self.timeout)
            .send()
            .await?;
        decode(resp).await
    }

    /// Streams a verified transfer to `dest` and checks the digest of the
    /// received bytes against the transfer's declared checksum. The partial
    /// file is removed on mismatch.
    pub async fn download_to(
        &self,
        transfer_id: &str,
        dest: &Path,
    ) -> Result<DownloadReport, ClientError> {
        let info = self.file_info(transfer_id).await?;
        let resp = self
            .client
            .get(self.url(&format!("{ROUTE_DOWNLOAD}/{transfer_id}")))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(error_from(resp).await);
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut digest = Sha256Digest::new();
        let mut stream = resp.bytes_stream();
        while let Some(piece) = stream.next().await {
            let piece = piece?;
            digest.update(&piece);
            file.write_all(&piece).await?;
        }
        file.flush().await?;
        drop(file);

        let bytes = digest.bytes();
        let checksum = digest.finalize();
        if checksum != info.overall_checksum {
            let _ = tokio::fs::remove_file(dest).await;
            return Err(ClientError::DigestMismatch {
                expected: info.overall_checksum,
                actual: checksum,
            });
        }

        info!(transfer = %transfer_id, bytes, dest = %dest.display(), "download verified");
        Ok(DownloadReport { bytes, checksum })
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    if resp.status().is_success() {
        let body = resp.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ClientError::Unexpected(e.to_string()))
    } else {
        Err(error_from(resp).await)
    }
}

async fn error_from(resp: reqwest::Response) -> ClientError {
    let status = resp.status().as_u16();
    let body = match resp.bytes().await {
        Ok(body) => body,
        Err(e) => return ClientError::Http(e),
    };
    match serde_json::from_slice::<ErrorBody>(&body) {
        Ok(body) => ClientError::Rejected { status, body },
        Err(_) => ClientError::Status {
            status,
            message: String::from_utf8_lossy(&body).into_owned(),
        },
    }
}

impl CoordinatorClient for HttpCoordinator {
    fn init_upload(
        &self,
        req: &InitUploadRequest,
    ) -> BoxFuture<'_, Result<InitUploadResponse, ClientError>> {
        let req = req.clone();
        Box::pin(async move {
            let resp = self
                .client
                .post(self.url(ROUTE_INIT))
                .timeout(self.timeout)
                .json(&req)
                .send()
                .await?;
            decode(resp).await
        })
    }

    fn upload_chunk(
        &self,
        transfer_id: &str,
        chunk_index: u32,
        checksum: &str,
        data: Vec<u8>,
    ) -> BoxFuture<'_, Result<ChunkUploadResponse, ClientError>> {
        let query = ChunkQuery {
            transfer_id: transfer_id.to_string(),
            chunk_index,
            checksum: checksum.to_string(),
        };
        Box::pin(async move {
            debug!(transfer = %query.transfer_id, chunk = chunk_index, bytes = data.len(), "POST chunk");
            let resp = self
                .client
                .post(self.url(ROUTE_CHUNK))
                .timeout(self.timeout)
                .query(&query)
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(data)
                .send()
                .await?;
            decode(resp).await
        })
    }

    fn missing(&self, transfer_id: &str) -> BoxFuture<'_, Result<MissingResponse, ClientError>> {
        let url = self.url(&format!("{ROUTE_MISSING}/{transfer_id}"));
        Box::pin(async move {
            let resp = self.client.get(url).timeout(self.timeout).send().await?;
            decode(resp).await
        })
    }

    fn assemble(
        &self,
        transfer_id: &str,
    ) -> BoxFuture<'_, Result<AssembleResponse, ClientError>> {
        let url = self.url(&format!("{ROUTE_ASSEMBLE}/{transfer_id}"));
        Box::pin(async move {
            // Assembly of a large file can outlast a regular request.
            let resp = self
                .client
                .post(url)
                .timeout(self.timeout * 10)
                .send()
                .await?;
            decode(resp).await
        })
    }

    fn cancel(&self, transfer_id: &str) -> BoxFuture<'_, Result<TransferInfo, ClientError>> {
        let url = self.url(&format!("{ROUTE_CANCEL}/{transfer_id}"));
        Box::pin(async move {
            let resp = self.client.post(url).timeout(self.timeout).send().await?;
            decode(resp).await
        })
    }
}
