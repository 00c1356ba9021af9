//! Upload engine: a fixed set of workers pulling chunk tasks from the shared
//! priority scheduler.
//!
//! Each task reads its chunk from the source file, borrows a pooled
//! connection and uploads it. Failures go through the retry policy; a
//! retried task sits out its backoff delay and is pushed back into the
//! scheduler. Outcomes are reported to the owning session over its event
//! channel and to the quality owner as [`AttemptReport`]s.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ferry_protocol::{ChunkOutcome, Priority};
use ferry_transfer::{ChunkPlan, ChunkReader, ChunkSpan};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adaptive::{AdaptiveHandle, AttemptReport};
use crate::client::{ClientError, CoordinatorClient};
use crate::config::SenderConfig;
use crate::error::SendError;
use crate::pool::{ConnectionPool, PooledConnection};
use crate::quality::QualityEstimate;
use crate::retry::{FailureClass, RetryDecision, RetryPolicy, RetryState};
use crate::scheduler::PriorityScheduler;

/// Per-chunk outcome delivered to the owning session.
#[derive(Debug)]
pub enum ChunkEvent {
    Stored {
        index: u32,
        bytes: u64,
        outcome: ChunkOutcome,
        attempts: u32,
    },
    Retrying {
        index: u32,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    Failed {
        index: u32,
        error: SendError,
    },
}

/// State shared by every task of one transfer.
pub(crate) struct UploadJob {
    pub(crate) transfer_id: String,
    pub(crate) path: PathBuf,
    pub(crate) plan: ChunkPlan,
    pub(crate) priority: Priority,
    pub(crate) cancel: CancellationToken,
    pub(crate) events: mpsc::UnboundedSender<ChunkEvent>,
}

impl UploadJob {
    fn emit(&self, event: ChunkEvent) {
        // The session stops listening once it has failed.
        let _ = self.events.send(event);
    }
}

pub(crate) struct ChunkTask {
    job: Arc<UploadJob>,
    span: ChunkSpan,
    retry: RetryState,
    /// Bytes and checksum kept across transient retries.
    payload: Option<(Vec<u8>, String)>,
}

impl ChunkTask {
    pub(crate) fn new(job: Arc<UploadJob>, span: ChunkSpan) -> Self {
        Self {
            job,
            span,
            retry: RetryState::default(),
            payload: None,
        }
    }
}

struct EngineShared<C> {
    scheduler: PriorityScheduler<ChunkTask>,
    pool: Arc<ConnectionPool<C>>,
    adaptive: AdaptiveHandle,
    policy: RetryPolicy,
    request_timeout: Duration,
    cancel: CancellationToken,
}

/// Shared worker pool serving every session of a sender.
pub struct UploadEngine<C: CoordinatorClient> {
    shared: Arc<EngineShared<C>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<C: CoordinatorClient> UploadEngine<C> {
    /// Starts `config.concurrency` workers over the given connections.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: &SenderConfig, connections: Vec<C>) -> Self {
        let shared = Arc::new(EngineShared {
            scheduler: PriorityScheduler::new(config.aging_threshold()),
            pool: Arc::new(ConnectionPool::new(connections)),
            adaptive: AdaptiveHandle::spawn(config),
            policy: config.retry_policy(),
            request_timeout: config.request_timeout(),
            cancel: CancellationToken::new(),
        });

        let workers = (0..config.concurrency.max(1))
            .map(|id| tokio::spawn(worker_loop(Arc::clone(&shared), id)))
            .collect();

        info!(
            workers = config.concurrency.max(1),
            connections = shared.pool.size(),
            "upload engine started"
        );

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Shares one client across `config.pool_size` pool slots.
    pub fn with_client(config: &SenderConfig, client: C) -> Self
    where
        C: Clone,
    {
        let connections = vec![client; config.pool_size.max(1)];
        Self::new(config, connections)
    }

    pub fn quality(&self) -> QualityEstimate {
        self.shared.adaptive.current()
    }

    pub fn adaptive(&self) -> &AdaptiveHandle {
        &self.shared.adaptive
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.shared.policy
    }

    pub fn request_timeout(&self) -> Duration {
        self.shared.request_timeout
    }

    /// Parent token of every session started on this engine.
    pub fn cancel_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    pub fn pending(&self) -> usize {
        self.shared.scheduler.len()
    }

    pub async fn connection(&self) -> Result<PooledConnection<C>, SendError> {
        self.shared.pool.acquire().await
    }

    pub(crate) fn submit(&self, task: ChunkTask) -> Result<(), SendError> {
        let priority = task.job.priority;
        if self.shared.scheduler.push(task, priority) {
            Ok(())
        } else {
            Err(SendError::EngineStopped)
        }
    }

    /// Drops every queued task of `job`. Returns the number withdrawn.
    pub(crate) fn withdraw(&self, job: &Arc<UploadJob>) -> usize {
        self.shared
            .scheduler
            .retain(|task| !Arc::ptr_eq(&task.job, job))
    }

    /// Cancels every session, stops the workers and waits for them.
    pub async fn shutdown(&self) {
        self.stop();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            let _ = worker.await;
        }
        info!("upload engine stopped");
    }

    fn stop(&self) {
        self.shared.cancel.cancel();
        self.shared.scheduler.close();
        self.shared.pool.close();
    }
}

impl<C: CoordinatorClient> Drop for UploadEngine<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn worker_loop<C: CoordinatorClient>(shared: Arc<EngineShared<C>>, id: usize) {
    debug!(worker = id, "worker started");
    loop {
        let task = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            task = shared.scheduler.next() => match task {
                Some(task) => task,
                None => break,
            },
        };
        if task.job.cancel.is_cancelled() {
            continue;
        }
        run_task(&shared, task).await;
    }
    debug!(worker = id, "worker stopped");
}

async fn run_task<C: CoordinatorClient>(shared: &Arc<EngineShared<C>>, mut task: ChunkTask) {
    let job = Arc::clone(&task.job);
    let index = task.span.index;
    let attempt = task.retry.attempts() + 1;

    let (data, checksum) = match task.payload.take() {
        Some(payload) => payload,
        None => match read_chunk(&job, index).await {
            Ok(payload) => payload,
            Err(e) => {
                job.emit(ChunkEvent::Failed { index, error: e });
                return;
            }
        },
    };

    let conn = tokio::select! {
        _ = job.cancel.cancelled() => return,
        conn = shared.pool.acquire() => match conn {
            Ok(conn) => conn,
            Err(e) => {
                job.emit(ChunkEvent::Failed { index, error: e });
                return;
            }
        },
    };

    let started_at = Instant::now();
    let result = tokio::select! {
        biased;
        _ = job.cancel.cancelled() => return,
        result = tokio::time::timeout(
            shared.request_timeout,
            conn.upload_chunk(&job.transfer_id, index, &checksum, data.clone()),
        ) => result.unwrap_or(Err(ClientError::Timeout)),
    };
    let elapsed = started_at.elapsed();
    drop(conn);

    let class = result.as_ref().err().map(ClientError::failure_class);
    // Protocol rejections say nothing about the network.
    if class != Some(FailureClass::Protocol) {
        shared
            .adaptive
            .report(AttemptReport {
                chunk_index: index,
                attempt,
                started_at,
                success: result.is_ok(),
                bytes: data.len() as u64,
                elapsed,
            })
            .await;
    }

    let error = match result {
        Ok(resp) => {
            debug!(
                transfer = %job.transfer_id,
                chunk = index,
                outcome = ?resp.outcome,
                received = resp.received,
                total = resp.total,
                "chunk stored"
            );
            job.emit(ChunkEvent::Stored {
                index,
                bytes: task.span.size,
                outcome: resp.outcome,
                attempts: attempt,
            });
            return;
        }
        Err(e) => e,
    };

    let class = error.failure_class();
    let tier = shared.adaptive.tier();
    match task.retry.record_failure(class, &shared.policy, tier) {
        RetryDecision::GiveUp => {
            warn!(
                transfer = %job.transfer_id,
                chunk = index,
                attempts = task.retry.attempts(),
                error = %error,
                "chunk failed permanently"
            );
            let error = if class == FailureClass::Protocol {
                SendError::Client(error)
            } else {
                SendError::ChunkExhausted {
                    index,
                    attempts: task.retry.attempts(),
                    last_error: error.to_string(),
                }
            };
            job.emit(ChunkEvent::Failed { index, error });
        }
        RetryDecision::Retry { delay, recompute } => {
            debug!(
                transfer = %job.transfer_id,
                chunk = index,
                attempt,
                delay_ms = delay.as_millis() as u64,
                recompute,
                error = %error,
                "retrying chunk"
            );
            job.emit(ChunkEvent::Retrying {
                index,
                attempt,
                delay,
                error: error.to_string(),
            });
            if !recompute {
                task.payload = Some((data, checksum));
            }
            schedule_retry(Arc::clone(shared), task, delay);
        }
    }
}

fn schedule_retry<C: CoordinatorClient>(shared: Arc<EngineShared<C>>, task: ChunkTask, delay: Duration) {
    tokio::spawn(async move {
        let cancel = task.job.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                let priority = task.job.priority;
                shared.scheduler.push(task, priority);
            }
        }
    });
}

/// Reads and checksums one chunk off the async runtime.
async fn read_chunk(job: &UploadJob, index: u32) -> Result<(Vec<u8>, String), SendError> {
    let path = job.path.clone();
    let plan = job.plan;
    let chunk = tokio::task::spawn_blocking(move || {
        ChunkReader::open(&path, plan)?.read_chunk(index)
    })
    .await
    .map_err(|e| SendError::Protocol(format!("chunk reader task failed: {e}")))??;
    Ok((chunk.data, chunk.checksum))
}
