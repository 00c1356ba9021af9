//! Transfer session: drives one file from planning to a verified assembly.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ferry_protocol::{InitUploadRequest, Priority, TransferStatus};
use ferry_transfer::{ChunkPlan, calculate_file_checksum};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{BoxFuture, ClientError, CoordinatorClient};
use crate::engine::{ChunkEvent, ChunkTask, UploadEngine, UploadJob};
use crate::error::SendError;
use crate::retry::{RetryDecision, RetryState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Planning,
    Negotiating,
    Uploading,
    Finalizing,
    AwaitingVerification,
    Done,
    Failed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Planning => "planning",
            SessionState::Negotiating => "negotiating",
            SessionState::Uploading => "uploading",
            SessionState::Finalizing => "finalizing",
            SessionState::AwaitingVerification => "awaiting_verification",
            SessionState::Done => "done",
            SessionState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress snapshot published while a session runs.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    pub state: SessionState,
    pub transfer_id: Option<String>,
    pub chunks_stored: u32,
    pub chunks_total: u32,
    pub bytes_stored: u64,
    pub total_bytes: u64,
    pub bytes_per_second: f64,
    pub eta: Option<Duration>,
}

impl TransferProgress {
    fn new() -> Self {
        Self {
            state: SessionState::Planning,
            transfer_id: None,
            chunks_stored: 0,
            chunks_total: 0,
            bytes_stored: 0,
            total_bytes: 0,
            bytes_per_second: 0.0,
            eta: None,
        }
    }

    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.bytes_stored as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferReport {
    pub transfer_id: String,
    pub filename: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub chunk_count: u32,
    pub resumed: bool,
    /// Chunks already stored when the session started.
    pub chunks_skipped: u32,
    /// Chunks this session uploaded.
    pub chunks_uploaded: u32,
    pub retries: u32,
    /// Payload bytes this session uploaded.
    pub bytes_sent: u64,
    pub checksum: String,
    pub elapsed: Duration,
}

impl TransferReport {
    /// Average rate over the bytes this session actually sent.
    pub fn average_bytes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.bytes_sent as f64 / secs
    }
}

/// Drives one file through the engine.
pub struct TransferSession<'e, C: CoordinatorClient> {
    engine: &'e UploadEngine<C>,
    path: PathBuf,
    transfer_id: Option<String>,
    priority: Priority,
    chunk_size: Option<u64>,
    cancel: CancellationToken,
    progress: watch::Sender<TransferProgress>,
}

/// Counters of one upload run.
#[derive(Default)]
struct Tally {
    uploaded: u32,
    retries: u32,
    bytes_sent: u64,
}

impl Tally {
    /// Average upload rate of this session so far.
    fn rate(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.bytes_sent as f64 / secs
    }
}

impl<'e, C: CoordinatorClient> TransferSession<'e, C> {
    pub fn new(engine: &'e UploadEngine<C>, path: impl Into<PathBuf>) -> Self {
        let (progress, _) = watch::channel(TransferProgress::new());
        Self {
            engine,
            path: path.into(),
            transfer_id: None,
            priority: Priority::Normal,
            chunk_size: None,
            cancel: engine.cancel_token().child_token(),
            progress,
        }
    }

    /// Uses an explicit transfer identity instead of the content-derived one.
    pub fn transfer_id(mut self, id: impl Into<String>) -> Self {
        self.transfer_id = Some(id.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Overrides the planner's recommended chunk size.
    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn progress(&self) -> watch::Receiver<TransferProgress> {
        self.progress.subscribe()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the session to completion.
    pub async fn run(self) -> Result<TransferReport, SendError> {
        let result = self.drive().await;
        match &result {
            Ok(report) => {
                self.set_state(SessionState::Done);
                info!(
                    transfer = %report.transfer_id,
                    chunks = report.chunk_count,
                    uploaded = report.chunks_uploaded,
                    retries = report.retries,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "transfer verified"
                );
            }
            Err(e) => {
                self.set_state(SessionState::Failed);
                warn!(path = %self.path.display(), error = %e, "transfer failed");
            }
        }
        result
    }

    async fn drive(&self) -> Result<TransferReport, SendError> {
        let started = Instant::now();

        // Planning
        self.set_state(SessionState::Planning);
        self.check_cancelled()?;
        let total_size = tokio::fs::metadata(&self.path).await?.len();
        if total_size == 0 {
            return Err(SendError::EmptyFile(self.path.clone()));
        }
        let filename = file_name(&self.path)?;
        let chunk_size = self
            .chunk_size
            .unwrap_or_else(|| self.engine.quality().next_chunk_size);
        let plan = ChunkPlan::new(total_size, chunk_size)?;
        let checksum = {
            let path = self.path.clone();
            tokio::task::spawn_blocking(move || calculate_file_checksum(&path))
                .await
                .map_err(|e| SendError::Protocol(format!("checksum task failed: {e}")))??
        };
        debug!(
            file = %filename,
            total_size,
            chunk_size,
            chunks = plan.chunk_count(),
            "planned transfer"
        );
        self.progress.send_modify(|p| {
            p.chunks_total = plan.chunk_count();
            p.total_bytes = total_size;
        });

        // Negotiating
        self.set_state(SessionState::Negotiating);
        let req = InitUploadRequest {
            transfer_id: self.transfer_id.clone(),
            filename: filename.clone(),
            total_size,
            chunk_count: plan.chunk_count(),
            chunk_size: plan.chunk_size(),
            overall_checksum: checksum.clone(),
            priority: self.priority,
        };
        let init = self.request(|c| c.init_upload(&req)).await?;
        let transfer_id = init.transfer_id;
        // A re-attached transfer keeps the chunking it was started with.
        let plan = if (init.chunk_size, init.chunk_count) == (plan.chunk_size(), plan.chunk_count()) {
            plan
        } else {
            let stored = ChunkPlan::from_manifest(total_size, init.chunk_size, init.chunk_count)
                .map_err(|e| SendError::Protocol(format!("coordinator chunk plan: {e}")))?;
            debug!(
                transfer = %transfer_id,
                planned = plan.chunk_size(),
                stored = stored.chunk_size(),
                "adopting stored chunk plan"
            );
            self.progress.send_modify(|p| p.chunks_total = stored.chunk_count());
            stored
        };
        let mut missing = self.request(|c| c.missing(&transfer_id)).await?.missing;
        let skipped = plan.chunk_count().saturating_sub(missing.len() as u32);
        info!(
            transfer = %transfer_id,
            file = %filename,
            resumed = init.resumed,
            stored = skipped,
            missing = missing.len(),
            "upload negotiated"
        );

        // Uploading / Finalizing
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let job = Arc::new(UploadJob {
            transfer_id: transfer_id.clone(),
            path: self.path.clone(),
            plan,
            priority: self.priority,
            cancel: self.cancel.child_token(),
            events: events_tx,
        });
        let upload_started = Instant::now();
        let mut tally = Tally::default();
        let mut round = 0;

        loop {
            self.reset_progress(&transfer_id, &plan, &missing);
            if !missing.is_empty() {
                self.set_state(SessionState::Uploading);
                self.upload_round(&job, &missing, &mut events_rx, upload_started, &mut tally)
                    .await?;
            }

            self.set_state(SessionState::Finalizing);
            missing = self.request(|c| c.missing(&transfer_id)).await?.missing;
            if missing.is_empty() {
                break;
            }
            round += 1;
            if round > self.engine.policy().max_retries {
                return Err(SendError::Incomplete { missing });
            }
            warn!(
                transfer = %transfer_id,
                round,
                stragglers = missing.len(),
                "chunks still missing, uploading another round"
            );
        }
        self.reset_progress(&transfer_id, &plan, &missing);

        // AwaitingVerification
        self.set_state(SessionState::AwaitingVerification);
        let assembled = self.request(|c| c.assemble(&transfer_id)).await?;
        match assembled.status {
            TransferStatus::Verified => Ok(TransferReport {
                transfer_id,
                filename,
                total_size,
                chunk_size: plan.chunk_size(),
                chunk_count: plan.chunk_count(),
                resumed: init.resumed,
                chunks_skipped: skipped,
                chunks_uploaded: tally.uploaded,
                retries: tally.retries,
                bytes_sent: tally.bytes_sent,
                checksum,
                elapsed: started.elapsed(),
            }),
            TransferStatus::Failed => {
                let (reason, message) = match assembled.failure {
                    Some(f) => (Some(f.reason), f.message),
                    None => (None, "coordinator reported failure".to_string()),
                };
                Err(SendError::AssemblyFailed { reason, message })
            }
            other => Err(SendError::Protocol(format!(
                "unexpected assembly status {other}"
            ))),
        }
    }

    /// Uploads `indices` and waits for all of them. On the first permanent
    /// failure the remaining tasks of this session are withdrawn.
    async fn upload_round(
        &self,
        job: &Arc<UploadJob>,
        indices: &[u32],
        events: &mut mpsc::UnboundedReceiver<ChunkEvent>,
        upload_started: Instant,
        tally: &mut Tally,
    ) -> Result<(), SendError> {
        for &index in indices {
            let span = job.plan.span(index)?;
            self.engine.submit(ChunkTask::new(Arc::clone(job), span))?;
        }

        let mut outstanding: HashSet<u32> = indices.iter().copied().collect();
        while !outstanding.is_empty() {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.abort(job);
                    return Err(SendError::Cancelled);
                }
                event = events.recv() => event.ok_or(SendError::EngineStopped)?,
            };

            match event {
                ChunkEvent::Stored { index, bytes, .. } => {
                    if outstanding.remove(&index) {
                        tally.uploaded += 1;
                        tally.bytes_sent += bytes;
                        let rate = tally.rate(upload_started.elapsed());
                        self.progress.send_modify(|p| {
                            p.chunks_stored += 1;
                            p.bytes_stored += bytes;
                            p.bytes_per_second = rate;
                            p.eta = (rate > 0.0).then(|| {
                                let remaining = p.total_bytes.saturating_sub(p.bytes_stored);
                                Duration::from_secs_f64(remaining as f64 / rate)
                            });
                        });
                    }
                }
                ChunkEvent::Retrying { .. } => tally.retries += 1,
                ChunkEvent::Failed { index, error } => {
                    warn!(transfer = %job.transfer_id, chunk = index, error = %error, "aborting session");
                    self.abort(job);
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    fn abort(&self, job: &Arc<UploadJob>) {
        job.cancel.cancel();
        let withdrawn = self.engine.withdraw(job);
        debug!(transfer = %job.transfer_id, withdrawn, "withdrew queued chunks");
    }

    /// Runs a session-level call on a pooled connection, retrying transient
    /// failures with the engine's policy.
    async fn request<T, F>(&self, op: F) -> Result<T, SendError>
    where
        F: for<'c> Fn(&'c C) -> BoxFuture<'c, Result<T, ClientError>>,
    {
        let policy = self.engine.policy();
        let mut retry = RetryState::default();
        loop {
            self.check_cancelled()?;
            let result = {
                let conn = self.engine.connection().await?;
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(SendError::Cancelled),
                    result = tokio::time::timeout(self.engine.request_timeout(), op(&*conn)) => {
                        result.unwrap_or(Err(ClientError::Timeout))
                    }
                }
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            let tier = self.engine.adaptive().tier();
            match retry.record_failure(error.failure_class(), policy, tier) {
                RetryDecision::GiveUp => return Err(error.into()),
                RetryDecision::Retry { delay, .. } => {
                    warn!(
                        path = %self.path.display(),
                        attempt = retry.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "coordinator call failed, retrying"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(SendError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn reset_progress(&self, transfer_id: &str, plan: &ChunkPlan, missing: &[u32]) {
        let stored = plan.chunk_count().saturating_sub(missing.len() as u32);
        let bytes = plan.total_size().saturating_sub(plan.bytes_in(missing));
        self.progress.send_modify(|p| {
            p.transfer_id = Some(transfer_id.to_string());
            p.chunks_stored = stored;
            p.bytes_stored = bytes;
        });
    }

    fn set_state(&self, state: SessionState) {
        self.progress.send_modify(|p| p.state = state);
    }

    fn check_cancelled(&self) -> Result<(), SendError> {
        if self.cancel.is_cancelled() {
            Err(SendError::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn file_name(path: &Path) -> Result<String, SendError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| SendError::InvalidPath(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::AttemptReport;
    use crate::test_support::{LocalCoordinator, payload, test_config};
    use ferry_protocol::ErrorCode;
    use ferry_protocol::constants::{INITIAL_CHUNK_SIZE, MIN_CHUNK_SIZE};
    use ferry_transfer::checksum_bytes;

    fn write_file(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn rate_averages_over_elapsed_time() {
        let tally = Tally {
            uploaded: 2,
            retries: 0,
            bytes_sent: 3000,
        };
        assert_eq!(tally.rate(Duration::from_secs(2)), 1500.0);
        assert_eq!(tally.rate(Duration::ZERO), 0.0);
    }

    #[tokio::test]
    async fn uploads_and_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let data = payload(10_000);
        let path = write_file(&dir, "data.bin", &data);

        let coordinator = LocalCoordinator::new().await;
        let engine = UploadEngine::with_client(&test_config(), coordinator.clone());
        let session = TransferSession::new(&engine, &path).chunk_size(1024);
        let progress = session.progress();
        let report = session.run().await.unwrap();

        assert_eq!(report.chunk_count, 10);
        assert_eq!(report.chunks_uploaded, 10);
        assert_eq!(report.chunks_skipped, 0);
        assert_eq!(report.bytes_sent, 10_000);
        assert_eq!(report.checksum, checksum_bytes(&data));
        assert!(!report.resumed);

        let last = progress.borrow().clone();
        assert_eq!(last.state, SessionState::Done);
        assert_eq!(last.chunks_stored, 10);
        assert_eq!(last.bytes_stored, 10_000);

        let info = coordinator.inner.registry().info(&report.transfer_id).unwrap();
        assert_eq!(info.status, TransferStatus::Verified);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn resumes_only_missing_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let data = payload(4096);
        let path = write_file(&dir, "resume.bin", &data);

        let coordinator = LocalCoordinator::new().await;
        let req = InitUploadRequest {
            transfer_id: None,
            filename: "resume.bin".into(),
            total_size: 4096,
            chunk_count: 4,
            chunk_size: 1024,
            overall_checksum: checksum_bytes(&data),
            priority: Priority::Normal,
        };
        let id = coordinator.inner.init(&req).await.unwrap().transfer_id;
        for index in [0u32, 2] {
            let part = data[index as usize * 1024..(index as usize + 1) * 1024].to_vec();
            let sum = checksum_bytes(&part);
            coordinator.inner.put_chunk(&id, index, part, &sum).await.unwrap();
        }

        let engine = UploadEngine::with_client(&test_config(), coordinator.clone());
        let report = TransferSession::new(&engine, &path)
            .chunk_size(1024)
            .run()
            .await
            .unwrap();

        assert_eq!(report.transfer_id, id);
        assert!(report.resumed);
        assert_eq!(report.chunks_skipped, 2);
        assert_eq!(report.chunks_uploaded, 2);
        let mut uploaded = coordinator.uploads();
        uploaded.sort_unstable();
        assert_eq!(uploaded, [1, 3]);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "flaky.bin", &payload(3000));

        let coordinator = LocalCoordinator::new().await;
        coordinator.fail_chunk(1, 2);
        let engine = UploadEngine::with_client(&test_config(), coordinator.clone());
        let report = TransferSession::new(&engine, &path)
            .chunk_size(1024)
            .run()
            .await
            .unwrap();

        assert_eq!(report.retries, 2);
        assert_eq!(coordinator.uploads().iter().filter(|&&i| i == 1).count(), 3);
    }

    #[tokio::test]
    async fn corrupt_chunk_is_reread_and_resent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "corrupt.bin", &payload(3000));

        let coordinator = LocalCoordinator::new().await;
        coordinator.corrupt_chunk(0, 1);
        let engine = UploadEngine::with_client(&test_config(), coordinator.clone());
        let report = TransferSession::new(&engine, &path)
            .chunk_size(1024)
            .run()
            .await
            .unwrap();

        assert_eq!(report.retries, 1);
        let info = coordinator.inner.registry().info(&report.transfer_id).unwrap();
        assert_eq!(info.status, TransferStatus::Verified);
    }

    #[tokio::test]
    async fn exhausted_chunk_fails_session_but_transfer_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "exhaust.bin", &payload(4096));

        let coordinator = LocalCoordinator::new().await;
        coordinator.fail_chunk(2, 100);
        let engine = UploadEngine::with_client(&test_config(), coordinator.clone());
        let err = TransferSession::new(&engine, &path)
            .chunk_size(1024)
            .run()
            .await
            .unwrap_err();
        match err {
            SendError::ChunkExhausted {
                index, attempts, ..
            } => {
                assert_eq!(index, 2);
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(engine.pending(), 0);

        // The network recovers; a fresh session re-attaches.
        coordinator.fail_chunk(2, 0);
        let report = TransferSession::new(&engine, &path)
            .chunk_size(1024)
            .run()
            .await
            .unwrap();
        assert!(report.resumed);
        assert!(report.chunks_skipped >= 1);
        let info = coordinator.inner.registry().info(&report.transfer_id).unwrap();
        assert_eq!(info.status, TransferStatus::Verified);
    }

    #[tokio::test]
    async fn adaptive_transfer_resumes_after_quality_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "adaptive.bin", &payload(1024 * 1024));

        let coordinator = LocalCoordinator::new().await;
        coordinator.fail_chunk(2, 100);
        let engine = UploadEngine::with_client(&test_config(), coordinator.clone());
        let err = TransferSession::new(&engine, &path).run().await.unwrap_err();
        assert!(matches!(err, SendError::ChunkExhausted { index: 2, .. }));

        let transfers = coordinator.inner.registry().list();
        assert_eq!(transfers.len(), 1);
        let first = &transfers[0];
        assert_eq!(first.chunk_size, INITIAL_CHUNK_SIZE);
        let stored = first.received_chunks;

        // Push the planner to its floor so the next plan differs.
        for attempt in 1..=8 {
            engine
                .adaptive()
                .report(AttemptReport {
                    chunk_index: 2,
                    attempt,
                    started_at: Instant::now(),
                    success: false,
                    bytes: 0,
                    elapsed: Duration::from_millis(5),
                })
                .await;
        }
        engine
            .adaptive()
            .subscribe()
            .wait_for(|e| e.next_chunk_size == MIN_CHUNK_SIZE)
            .await
            .unwrap();

        coordinator.fail_chunk(2, 0);
        let report = TransferSession::new(&engine, &path).run().await.unwrap();
        assert_eq!(report.transfer_id, first.transfer_id);
        assert!(report.resumed);
        assert_eq!(report.chunk_size, INITIAL_CHUNK_SIZE);
        assert_eq!(report.chunk_count, 4);
        assert_eq!(report.chunks_skipped, stored);
        assert_eq!(report.chunks_uploaded, 4 - stored);
        assert_eq!(coordinator.inner.registry().len(), 1);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn closed_transfer_is_a_protocol_failure() {
        let dir = tempfile::tempdir().unwrap();
        let data = payload(2048);
        let path = write_file(&dir, "closed.bin", &data);

        let coordinator = LocalCoordinator::new().await;
        let req = InitUploadRequest {
            transfer_id: Some("closed-1".into()),
            filename: "closed.bin".into(),
            total_size: 2048,
            chunk_count: 2,
            chunk_size: 1024,
            overall_checksum: checksum_bytes(&data),
            priority: Priority::High,
        };
        coordinator.inner.init(&req).await.unwrap();
        coordinator.inner.cancel("closed-1").await.unwrap();

        let engine = UploadEngine::with_client(&test_config(), coordinator.clone());
        let err = TransferSession::new(&engine, &path)
            .transfer_id("closed-1")
            .priority(Priority::High)
            .chunk_size(1024)
            .run()
            .await
            .unwrap_err();
        match err {
            SendError::Client(e) => assert_eq!(e.code(), Some(ErrorCode::TransferClosed)),
            other => panic!("unexpected error: {other}"),
        }
        assert!(coordinator.uploads().is_empty());
    }

    #[tokio::test]
    async fn empty_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "empty.bin", b"");
        let coordinator = LocalCoordinator::new().await;
        let engine = UploadEngine::with_client(&test_config(), coordinator);
        let err = TransferSession::new(&engine, &path).run().await.unwrap_err();
        assert!(matches!(err, SendError::EmptyFile(_)));
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "cancel.bin", &payload(100));
        let coordinator = LocalCoordinator::new().await;
        let engine = UploadEngine::with_client(&test_config(), coordinator);
        let session = TransferSession::new(&engine, &path);
        session.cancel_token().cancel();
        let progress = session.progress();
        assert!(matches!(session.run().await, Err(SendError::Cancelled)));
        assert_eq!(progress.borrow().state, SessionState::Failed);
    }

    #[tokio::test]
    async fn engine_shutdown_cancels_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "shutdown.bin", &payload(100));
        let coordinator = LocalCoordinator::new().await;
        let engine = UploadEngine::with_client(&test_config(), coordinator);
        engine.shutdown().await;
        let result = TransferSession::new(&engine, &path).run().await;
        assert!(matches!(result, Err(SendError::Cancelled)));
    }

    #[tokio::test]
    async fn manifest_mismatch_is_a_protocol_failure() {
        let dir = tempfile::tempdir().unwrap();
        let data = payload(2048);
        let path = write_file(&dir, "swap.bin", &data);

        let coordinator = LocalCoordinator::new().await;
        let req = InitUploadRequest {
            transfer_id: Some("swap-1".into()),
            filename: "swap.bin".into(),
            total_size: 2048,
            chunk_count: 2,
            chunk_size: 1024,
            overall_checksum: checksum_bytes(b"something else"),
            priority: Priority::Normal,
        };
        coordinator.inner.init(&req).await.unwrap();

        let engine = UploadEngine::with_client(&test_config(), coordinator.clone());
        let err = TransferSession::new(&engine, &path)
            .transfer_id("swap-1")
            .chunk_size(1024)
            .run()
            .await
            .unwrap_err();
        match err {
            SendError::Client(e) => assert_eq!(e.code(), Some(ErrorCode::ManifestMismatch)),
            other => panic!("unexpected error: {other}"),
        }
    }
}
