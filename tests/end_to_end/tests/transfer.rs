//! Sender and coordinator talking over real HTTP.

use std::time::Duration;

use end_to_end::{TestServer, write_payload};
use ferry_protocol::{ChunkOutcome, ErrorCode, InitUploadRequest, Priority, TransferStatus};
use ferry_sender::{ClientError, CoordinatorClient, HttpCoordinator, TransferSession, UploadEngine};
use ferry_transfer::{ChunkPlan, ChunkReader, calculate_file_checksum, checksum_bytes};

const KIB: usize = 1024;
const MIB: usize = 1024 * 1024;

fn engine(server: &TestServer) -> UploadEngine<HttpCoordinator> {
    let config = server.sender_config();
    let clients =
        HttpCoordinator::pool(&server.endpoint, Duration::from_secs(10), config.pool_size).unwrap();
    UploadEngine::new(&config, clients)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ten_mebibytes_in_forty_chunks() {
    let data_dir = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let source = write_payload(work.path(), "big.bin", 10 * MIB);
    let expected = calculate_file_checksum(&source).unwrap();

    let server = TestServer::start(data_dir.path()).await;
    let engine = engine(&server);
    let report = TransferSession::new(&engine, &source)
        .chunk_size(256 * KIB as u64)
        .run()
        .await
        .unwrap();

    assert_eq!(report.chunk_count, 40);
    assert_eq!(report.chunks_uploaded, 40);
    assert_eq!(report.checksum, expected);

    let client = server.client();
    let info = client.file_info(&report.transfer_id).await.unwrap();
    assert_eq!(info.status, TransferStatus::Verified);
    assert_eq!(info.received_chunks, 40);

    let dest = work.path().join("downloaded.bin");
    let download = client.download_to(&report.transfer_id, &dest).await.unwrap();
    assert_eq!(download.bytes, (10 * MIB) as u64);
    assert_eq!(download.checksum, expected);
    assert_eq!(calculate_file_checksum(&dest).unwrap(), expected);

    engine.shutdown().await;
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resumes_after_coordinator_restart() {
    let data_dir = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let source = write_payload(work.path(), "resume.bin", 300 * KIB);
    let chunk_size = 64 * KIB as u64;
    let plan = ChunkPlan::new(300 * KIB as u64, chunk_size).unwrap();
    assert_eq!(plan.chunk_count(), 5);

    // First run stores chunks 0 and 2, then the coordinator goes away.
    let server = TestServer::start(data_dir.path()).await;
    let client = server.client();
    let init = client
        .init_upload(&InitUploadRequest {
            transfer_id: None,
            filename: "resume.bin".into(),
            total_size: plan.total_size(),
            chunk_count: plan.chunk_count(),
            chunk_size,
            overall_checksum: calculate_file_checksum(&source).unwrap(),
            priority: Priority::Normal,
        })
        .await
        .unwrap();
    let mut reader = ChunkReader::open(&source, plan).unwrap();
    for index in [0, 2] {
        let chunk = reader.read_chunk(index).unwrap();
        client
            .upload_chunk(&init.transfer_id, index, &chunk.checksum, chunk.data)
            .await
            .unwrap();
    }
    server.stop().await;

    let server = TestServer::start(data_dir.path()).await;
    let missing = server.client().missing(&init.transfer_id).await.unwrap();
    assert_eq!(missing.missing, vec![1, 3, 4]);

    // No override: the engine would plan 256 KiB chunks, the stored plan wins.
    let engine = engine(&server);
    assert_ne!(engine.quality().next_chunk_size, chunk_size);
    let report = TransferSession::new(&engine, &source).run().await.unwrap();

    assert_eq!(report.transfer_id, init.transfer_id);
    assert!(report.resumed);
    assert_eq!(report.chunk_size, chunk_size);
    assert_eq!(report.chunk_count, 5);
    assert_eq!(report.chunks_skipped, 2);
    assert_eq!(report.chunks_uploaded, 3);
    assert_eq!(report.bytes_sent, plan.bytes_in(&[1, 3, 4]));

    engine.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn repeated_chunk_is_a_duplicate() {
    let data_dir = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let source = write_payload(work.path(), "dup.bin", 8 * KIB);
    let plan = ChunkPlan::new(8 * KIB as u64, 4 * KIB as u64).unwrap();

    let server = TestServer::start(data_dir.path()).await;
    let client = server.client();
    let init = client
        .init_upload(&InitUploadRequest {
            transfer_id: Some("dup-transfer".into()),
            filename: "dup.bin".into(),
            total_size: plan.total_size(),
            chunk_count: plan.chunk_count(),
            chunk_size: plan.chunk_size(),
            overall_checksum: calculate_file_checksum(&source).unwrap(),
            priority: Priority::Low,
        })
        .await
        .unwrap();
    assert_eq!(init.transfer_id, "dup-transfer");

    let chunk = ChunkReader::open(&source, plan).unwrap().read_chunk(1).unwrap();
    let first = client
        .upload_chunk("dup-transfer", 1, &chunk.checksum, chunk.data.clone())
        .await
        .unwrap();
    let second = client
        .upload_chunk("dup-transfer", 1, &chunk.checksum, chunk.data)
        .await
        .unwrap();

    assert_eq!(first.outcome, ChunkOutcome::Stored);
    assert_eq!(second.outcome, ChunkOutcome::Duplicate);
    assert_eq!(second.received, 1);
    assert_eq!(client.missing("dup-transfer").await.unwrap().missing, vec![0]);

    server.stop().await;
}

#[tokio::test]
async fn conflicting_chunk_is_refused() {
    let data_dir = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let source = write_payload(work.path(), "clash.bin", 8 * KIB);
    let plan = ChunkPlan::new(8 * KIB as u64, 4 * KIB as u64).unwrap();

    let server = TestServer::start(data_dir.path()).await;
    let client = server.client();
    let init = client
        .init_upload(&InitUploadRequest {
            transfer_id: Some("clash-transfer".into()),
            filename: "clash.bin".into(),
            total_size: plan.total_size(),
            chunk_count: plan.chunk_count(),
            chunk_size: plan.chunk_size(),
            overall_checksum: calculate_file_checksum(&source).unwrap(),
            priority: Priority::Normal,
        })
        .await
        .unwrap();

    let mut reader = ChunkReader::open(&source, plan).unwrap();
    let good = reader.read_chunk(0).unwrap();
    client
        .upload_chunk(&init.transfer_id, 0, &good.checksum, good.data.clone())
        .await
        .unwrap();

    let mut other = good.data.clone();
    other[0] ^= 0xff;
    let other_checksum = checksum_bytes(&other);
    let err = client
        .upload_chunk(&init.transfer_id, 0, &other_checksum, other)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::ChunkConflict));
    assert!(matches!(err, ClientError::Rejected { status: 409, .. }));

    // The first bytes are kept: the transfer still verifies.
    let last = reader.read_chunk(1).unwrap();
    client
        .upload_chunk(&init.transfer_id, 1, &last.checksum, last.data)
        .await
        .unwrap();
    let assembled = client.assemble(&init.transfer_id).await.unwrap();
    assert_eq!(assembled.status, TransferStatus::Verified);

    server.stop().await;
}

#[tokio::test]
async fn cancelled_transfer_refuses_chunks() {
    let data_dir = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let source = write_payload(work.path(), "gone.bin", 4 * KIB);
    let plan = ChunkPlan::new(4 * KIB as u64, KIB as u64).unwrap();

    let server = TestServer::start(data_dir.path()).await;
    let client = server.client();
    let init = client
        .init_upload(&InitUploadRequest {
            transfer_id: None,
            filename: "gone.bin".into(),
            total_size: plan.total_size(),
            chunk_count: plan.chunk_count(),
            chunk_size: plan.chunk_size(),
            overall_checksum: calculate_file_checksum(&source).unwrap(),
            priority: Priority::Normal,
        })
        .await
        .unwrap();

    let info = client.cancel(&init.transfer_id).await.unwrap();
    assert_eq!(info.status, TransferStatus::Cancelled);

    let chunk = ChunkReader::open(&source, plan).unwrap().read_chunk(0).unwrap();
    let err = client
        .upload_chunk(&init.transfer_id, 0, &chunk.checksum, chunk.data)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::TransferClosed));

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sessions_share_one_engine() {
    let data_dir = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let urgent = write_payload(work.path(), "urgent.bin", 512 * KIB);
    let bulk = write_payload(work.path(), "bulk.bin", 2 * MIB);

    let server = TestServer::start(data_dir.path()).await;
    let engine = engine(&server);
    let (a, b) = tokio::join!(
        TransferSession::new(&engine, &urgent)
            .priority(Priority::High)
            .chunk_size(64 * KIB as u64)
            .run(),
        TransferSession::new(&engine, &bulk)
            .priority(Priority::Low)
            .chunk_size(128 * KIB as u64)
            .run(),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.chunk_count, 8);
    assert_eq!(b.chunk_count, 16);

    let listed = server.client().list_files().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|t| t.status == TransferStatus::Verified));

    engine.shutdown().await;
    server.stop().await;
}
