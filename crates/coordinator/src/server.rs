//! HTTP surface of the coordinator.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use chrono::Utc;
use ferry_protocol::constants::{
    PROTOCOL_VERSION, ROUTE_ASSEMBLE, ROUTE_CANCEL, ROUTE_CHUNK, ROUTE_DOWNLOAD, ROUTE_FILES,
    ROUTE_HEALTH, ROUTE_INIT, ROUTE_MISSING,
};
use ferry_protocol::{
    AssembleResponse, ChunkQuery, ChunkUploadResponse, ErrorBody, HealthResponse,
    InitUploadRequest, InitUploadResponse, MissingResponse, TransferInfo,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::CoordinatorConfig;
use crate::error::CoordinatorError;
use crate::store::{AssembledFile, FsStore, Store};
use crate::Coordinator;

type AppState = Arc<Coordinator>;

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let code = self.code();
        let status =
            StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %self, "request failed");
        } else {
            debug!(error = %self, code = ?code, "request rejected");
        }
        (status, Json(ErrorBody::new(code, self.to_string()))).into_response()
    }
}

/// Builds the router over a coordinator.
pub fn router(coordinator: Arc<Coordinator>, max_body_bytes: usize) -> Router {
    Router::new()
        .route(ROUTE_INIT, post(init_upload))
        .route(ROUTE_CHUNK, post(upload_chunk))
        .route(&format!("{ROUTE_MISSING}/:id"), get(missing_chunks))
        .route(&format!("{ROUTE_CANCEL}/:id"), post(cancel_transfer))
        .route(&format!("{ROUTE_ASSEMBLE}/:id"), post(assemble))
        .route(ROUTE_FILES, get(list_files))
        .route(&format!("{ROUTE_FILES}/:id"), get(file_info))
        .route(&format!("{ROUTE_DOWNLOAD}/:id"), get(download))
        .route(ROUTE_HEALTH, get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(coordinator)
}

/// Opens the filesystem store under `config.data_dir` and serves until
/// `shutdown` is cancelled.
pub async fn serve(config: &CoordinatorConfig, shutdown: CancellationToken) -> Result<(), CoordinatorError> {
    let store: Arc<dyn Store> = Arc::new(FsStore::open(&config.data_dir)?);
    let coordinator = Arc::new(Coordinator::open(store).await?);
    let listener = TcpListener::bind(&config.bind).await?;
    info!(
        addr = %listener.local_addr()?,
        data_dir = %config.data_dir.display(),
        "coordinator listening"
    );
    serve_on(listener, coordinator, config.max_body_bytes, shutdown).await
}

/// Serves on an already bound listener.
pub async fn serve_on(
    listener: TcpListener,
    coordinator: Arc<Coordinator>,
    max_body_bytes: usize,
    shutdown: CancellationToken,
) -> Result<(), CoordinatorError> {
    let app = router(coordinator, max_body_bytes);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("coordinator stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn init_upload(
    State(coordinator): State<AppState>,
    payload: Result<Json<InitUploadRequest>, JsonRejection>,
) -> Result<Json<InitUploadResponse>, CoordinatorError> {
    let Json(req) = payload.map_err(|e| CoordinatorError::InvalidRequest(e.body_text()))?;
    Ok(Json(coordinator.init(&req).await?))
}

async fn upload_chunk(
    State(coordinator): State<AppState>,
    query: Result<Query<ChunkQuery>, QueryRejection>,
    body: Bytes,
) -> Result<Json<ChunkUploadResponse>, CoordinatorError> {
    let Query(q) = query.map_err(|e| CoordinatorError::InvalidRequest(e.body_text()))?;
    let resp = coordinator
        .put_chunk(&q.transfer_id, q.chunk_index, body.to_vec(), &q.checksum)
        .await?;
    Ok(Json(resp))
}

async fn missing_chunks(
    State(coordinator): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MissingResponse>, CoordinatorError> {
    let missing = coordinator.missing(&id)?;
    Ok(Json(MissingResponse {
        transfer_id: id,
        missing,
    }))
}

async fn cancel_transfer(
    State(coordinator): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TransferInfo>, CoordinatorError> {
    Ok(Json(coordinator.cancel(&id).await?))
}

async fn assemble(
    State(coordinator): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AssembleResponse>, CoordinatorError> {
    Ok(Json(coordinator.assemble(&id).await?))
}

async fn list_files(State(coordinator): State<AppState>) -> Json<Vec<TransferInfo>> {
    Json(coordinator.registry().list())
}

async fn file_info(
    State(coordinator): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TransferInfo>, CoordinatorError> {
    Ok(Json(coordinator.registry().info(&id)?))
}

async fn download(
    State(coordinator): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, CoordinatorError> {
    let (info, file) = coordinator.download(&id).await?;
    let body = match file {
        AssembledFile::Path(path) => {
            let file = tokio::fs::File::open(&path).await?;
            Body::from_stream(tokio_util::io::ReaderStream::new(file))
        }
        AssembledFile::Bytes(bytes) => Body::from(bytes),
    };
    info!(transfer = %id, filename = %info.filename, "serving download");

    let disposition = format!("attachment; filename=\"{}\"", info.filename.replace('"', ""));
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, info.total_size.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        version: PROTOCOL_VERSION.into(),
        timestamp: Utc::now(),
    })
}
