//! Subcommand implementations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use ferry_coordinator::CoordinatorConfig;
use ferry_protocol::{Priority, TransferInfo};
use ferry_sender::{
    HttpCoordinator, SenderConfig, SessionState, TransferProgress, TransferReport,
    TransferSession, UploadEngine,
};
use futures_util::future::join_all;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Per-invocation overrides for `send`.
pub struct SendOptions {
    pub priority: Option<Priority>,
    pub chunk_size: Option<u64>,
    pub transfer_id: Option<String>,
}

pub async fn serve(config: CoordinatorConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());
    ferry_coordinator::server::serve(&config, shutdown).await?;
    Ok(())
}

pub async fn send(config: &SenderConfig, files: &[PathBuf], opts: SendOptions) -> anyhow::Result<()> {
    if opts.transfer_id.is_some() && files.len() > 1 {
        anyhow::bail!("--transfer-id applies to a single file");
    }

    let clients = HttpCoordinator::pool(&config.endpoint, config.request_timeout(), config.pool_size)?;
    let engine = UploadEngine::new(config, clients);
    cancel_on_ctrl_c(engine.cancel_token());

    let priority = opts.priority.unwrap_or(config.priority);
    let runs = files.iter().map(|path| {
        let mut session = TransferSession::new(&engine, path).priority(priority);
        if let Some(size) = opts.chunk_size {
            session = session.chunk_size(size);
        }
        if let Some(id) = &opts.transfer_id {
            session = session.transfer_id(id.clone());
        }
        let printer = tokio::spawn(print_progress(display_name(path), session.progress()));
        async move {
            let result = session.run().await;
            let _ = printer.await;
            result
        }
    });
    let results = join_all(runs).await;

    let mut failed = 0;
    for (path, result) in files.iter().zip(results) {
        match result {
            Ok(report) => print_report(&report),
            Err(e) => {
                failed += 1;
                eprintln!("{}: failed: {e}", display_name(path));
            }
        }
    }

    let quality = engine.quality();
    println!(
        "network: {} | success rate {:.1}% | next chunk size {}",
        quality.tier,
        quality.success_rate() * 100.0,
        format_bytes(quality.next_chunk_size)
    );
    engine.shutdown().await;

    if failed > 0 {
        anyhow::bail!("{failed} of {} transfers failed", files.len());
    }
    Ok(())
}

pub async fn list(client: &HttpCoordinator) -> anyhow::Result<()> {
    let transfers = client.list_files().await?;
    if transfers.is_empty() {
        println!("no transfers");
        return Ok(());
    }
    println!(
        "{:<34} {:<26} {:>10} {:>7} {}",
        "ID", "FILE", "SIZE", "DONE", "STATUS"
    );
    for t in &transfers {
        println!(
            "{:<34} {:<26} {:>10} {:>6.1}% {}",
            t.transfer_id,
            truncate(&t.filename, 26),
            format_bytes(t.total_size),
            t.percentage(),
            t.status
        );
    }
    Ok(())
}

pub async fn info(client: &HttpCoordinator, id: &str) -> anyhow::Result<()> {
    let t = client.file_info(id).await?;
    print_info(&t);
    Ok(())
}

pub async fn download(
    client: &HttpCoordinator,
    id: &str,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let dest = match output {
        Some(path) => path,
        None => PathBuf::from(client.file_info(id).await?.filename),
    };
    let report = client
        .download_to(id, &dest)
        .await
        .with_context(|| format!("downloading {id}"))?;
    println!(
        "{} ({}) verified, sha256 {}",
        dest.display(),
        format_bytes(report.bytes),
        report.checksum
    );
    Ok(())
}

pub async fn cancel(client: &HttpCoordinator, id: &str) -> anyhow::Result<()> {
    use ferry_sender::CoordinatorClient;

    let t = client.cancel(id).await?;
    println!("{} is now {}", t.transfer_id, t.status);
    Ok(())
}

pub async fn health(client: &HttpCoordinator) -> anyhow::Result<()> {
    let health = client.health().await?;
    println!(
        "{} is {} (protocol {}, {})",
        client.endpoint(),
        health.status,
        health.version,
        health.timestamp.to_rfc3339()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            token.cancel();
        }
    });
}

/// Prints a line per 10% step and per state change until the session ends.
async fn print_progress(name: String, mut rx: watch::Receiver<TransferProgress>) {
    let mut last_step = None;
    let mut last_state = None;
    loop {
        {
            let p = rx.borrow_and_update();
            let step = (p.percentage() / 10.0).floor() as u32;
            if p.state == SessionState::Uploading && last_step != Some(step) {
                println!(
                    "{name}: {}/{} chunks {:>5.1}% {}/s eta {}",
                    p.chunks_stored,
                    p.chunks_total,
                    p.percentage(),
                    format_bytes(p.bytes_per_second as u64),
                    p.eta.map(format_duration).unwrap_or_else(|| "-".into())
                );
                last_step = Some(step);
            }
            if last_state != Some(p.state) {
                info!(file = %name, state = %p.state, "session state");
                last_state = Some(p.state);
            }
            if matches!(p.state, SessionState::Done | SessionState::Failed) {
                return;
            }
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn print_report(report: &TransferReport) {
    println!("{} -> {}", report.filename, report.transfer_id);
    println!(
        "  {} in {} chunks of {} | uploaded {} | skipped {} | retries {}",
        format_bytes(report.total_size),
        report.chunk_count,
        format_bytes(report.chunk_size),
        report.chunks_uploaded,
        report.chunks_skipped,
        report.retries
    );
    println!(
        "  elapsed {} | average {}/s | sha256 {}",
        format_duration(report.elapsed),
        format_bytes(report.average_bytes_per_second() as u64),
        report.checksum
    );
}

fn print_info(t: &TransferInfo) {
    println!("id:        {}", t.transfer_id);
    println!("file:      {}", t.filename);
    println!("size:      {} ({} bytes)", format_bytes(t.total_size), t.total_size);
    println!(
        "chunks:    {}/{} ({:.1}%) of {}",
        t.received_chunks,
        t.chunk_count,
        t.percentage(),
        format_bytes(t.chunk_size)
    );
    println!("priority:  {}", t.priority);
    println!("status:    {}", t.status);
    println!("sha256:    {}", t.overall_checksum);
    println!("created:   {}", t.created_at.to_rfc3339());
    println!("updated:   {}", t.updated_at.to_rfc3339());
    if let Some(done) = t.completed_at {
        println!("completed: {}", done.to_rfc3339());
    }
    if let Some(failure) = &t.failure {
        println!("failure:   {}", failure.message);
        if !failure.suspect_chunks.is_empty() {
            println!("suspects:  {:?}", failure.suspect_chunks);
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{head}…")
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, secs % 3600 / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}
