//! Ferry sender: splits files into checksummed chunks and uploads them with
//! adaptive sizing, priority scheduling and retry.
//!
//! # Components
//!
//! - [`NetworkQualityMonitor`] and [`AdaptiveChunkPlanner`], owned by a
//!   single task behind [`AdaptiveHandle`]
//! - [`RetryPolicy`]: per-chunk exponential backoff with jitter
//! - [`PriorityScheduler`]: three priority lanes with aging
//! - [`UploadEngine`]: worker tasks and the connection pool
//! - [`TransferSession`]: one file from planning to verified assembly

pub mod adaptive;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod planner;
pub mod pool;
pub mod quality;
pub mod retry;
pub mod scheduler;
pub mod session;

pub use adaptive::{AdaptiveHandle, AttemptReport};
pub use client::{BoxFuture, ClientError, CoordinatorClient};
pub use config::SenderConfig;
pub use engine::{ChunkEvent, UploadEngine};
pub use error::SendError;
pub use http::{DownloadReport, HttpCoordinator};
pub use planner::AdaptiveChunkPlanner;
pub use pool::{ConnectionPool, PooledConnection};
pub use quality::{NetworkQualityMonitor, QualityEstimate, QualityTier};
pub use retry::{FailureClass, RetryDecision, RetryPolicy, RetryState};
pub use scheduler::PriorityScheduler;
pub use session::{SessionState, TransferProgress, TransferReport, TransferSession};
