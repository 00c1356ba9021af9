//! Harness that runs a real HTTP coordinator on a loopback port.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ferry_coordinator::{Coordinator, FsStore, Store, server};
use ferry_protocol::constants::MAX_BODY_SIZE;
use ferry_sender::{HttpCoordinator, SenderConfig};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A coordinator serving one data directory.
pub struct TestServer {
    pub endpoint: String,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(data_dir: &Path) -> Self {
        let store: Arc<dyn Store> = Arc::new(FsStore::open(data_dir).unwrap());
        let coordinator = Arc::new(Coordinator::open(store).await.unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            server::serve_on(listener, coordinator, MAX_BODY_SIZE, token)
                .await
                .unwrap();
        });
        Self {
            endpoint,
            shutdown,
            handle,
        }
    }

    pub fn client(&self) -> HttpCoordinator {
        HttpCoordinator::new(&self.endpoint, Duration::from_secs(10)).unwrap()
    }

    pub fn sender_config(&self) -> SenderConfig {
        SenderConfig {
            endpoint: self.endpoint.clone(),
            base_delay_ms: 5,
            max_delay_ms: 50,
            max_retries: 5,
            ..Default::default()
        }
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}

/// Writes `len` bytes of a fixed pseudo-random pattern under `dir`.
pub fn write_payload(dir: &Path, name: &str, len: usize) -> PathBuf {
    let mut state: u32 = 0x2545_f491;
    let data: Vec<u8> = (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect();
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}
