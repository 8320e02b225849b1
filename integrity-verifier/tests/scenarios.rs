use std::sync::Arc;
use std::time::Duration;

use blob_store::{InMemoryObjectStore, LocalObjectStore, ObjectMetadata, ObjectStore, ReconnectPolicy};
use integrity_verifier::{
    ChunkLayout, Payload, RunContext, RunOutcome, RunState, Stores, VerifierConfig, VerifyErr,
};
use tempfile::tempdir;

const BLOCK: usize = 512 * 1024;

fn config(disconnect: bool) -> VerifierConfig {
    VerifierConfig {
        disconnect_between_chunks: disconnect,
        reconnect: ReconnectPolicy {
            max_attempts: 2,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        },
        key_prefix: "verify/".to_string(),
        ..VerifierConfig::for_bucket("test-bucket")
    }
}

fn downloaded_blocks(context: &RunContext) -> Vec<usize> {
    context
        .history()
        .iter()
        .filter_map(|s| match s {
            RunState::Downloading { chunk } => Some(*chunk),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_missing_bucket_is_skipped() {
    let store = Arc::new(InMemoryObjectStore::without_bucket("test-bucket"));
    let mut context = RunContext::new(config(true));

    let outcome = context.run_with(Stores::single(store.clone())).await.unwrap();

    assert!(matches!(outcome, RunOutcome::Skipped(_)));
    assert_eq!(context.state(), RunState::Skipped);
    assert_eq!(context.object_key(), None);
    assert!(store.is_empty());
    assert!(!context.history().contains(&RunState::Cleaned));
}

#[tokio::test]
async fn test_unconfigured_bucket_is_skipped() {
    let mut context = RunContext::new(VerifierConfig::default());

    let outcome = context.run().await.unwrap();

    assert!(matches!(outcome, RunOutcome::Skipped(_)));
    assert_eq!(context.history(), &[RunState::Init, RunState::RegionResolved, RunState::Skipped]);
}

#[tokio::test]
async fn test_clean_stream_round_trip() {
    let store = Arc::new(InMemoryObjectStore::new("test-bucket"));
    let mut context = RunContext::new(config(false));

    let outcome = context.run_with(Stores::single(store.clone())).await.unwrap();

    let report = match outcome {
        RunOutcome::Passed(report) => report,
        other => panic!("expected a pass, got {other:?}"),
    };
    assert_eq!(report.bytes_verified, 4 * BLOCK as u64);
    assert_eq!(report.chunks, 4);
    assert_eq!(report.reconnects, 0);
    assert!(report.key.starts_with("verify/"));
    assert_eq!(context.object_key(), Some(report.key.as_str()));
    assert_eq!(store.opens(), 1);

    assert_eq!(downloaded_blocks(&context), vec![0, 1, 2, 3]);
    assert_eq!(
        &context.history()[..4],
        &[RunState::Init, RunState::RegionResolved, RunState::BucketVerified, RunState::Uploaded]
    );
    assert_eq!(&context.history()[context.history().len() - 2..], &[RunState::Cleaned, RunState::Passed]);
    assert!(!store.object_exists(&report.key).await.unwrap());
}

#[tokio::test]
async fn test_disconnect_after_every_block_still_matches() {
    let store = Arc::new(InMemoryObjectStore::new("test-bucket"));
    let mut context = RunContext::new(config(true));

    let outcome = context.run_with(Stores::single(store.clone())).await.unwrap();

    let report = match outcome {
        RunOutcome::Passed(report) => report,
        other => panic!("expected a pass, got {other:?}"),
    };
    // the cut after the last block is never followed by another read
    assert_eq!(report.reconnects, 3);
    assert_eq!(store.opens(), 4);
    assert!(store.is_empty());
    assert_eq!(context.state(), RunState::Passed);
}

#[tokio::test]
async fn test_partial_reads_and_transport_faults_recover() {
    let store = Arc::new(InMemoryObjectStore::new("test-bucket").with_delivery_size(1000));
    store.inject_read_fault_at(BLOCK as u64 + 12_345);
    store.inject_read_fault_at(3 * BLOCK as u64 + 1);
    let mut context = RunContext::new(config(true));

    let outcome = context.run_with(Stores::single(store.clone())).await.unwrap();

    let report = match outcome {
        RunOutcome::Passed(report) => report,
        other => panic!("expected a pass, got {other:?}"),
    };
    assert_eq!(report.reconnects, 5);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_corrupted_block_fails_and_is_cleaned_up() {
    let store = Arc::new(InMemoryObjectStore::new("test-bucket").with_corruption_at(2 * BLOCK as u64 + 100));
    let mut context = RunContext::new(config(true));

    let err = context.run_with(Stores::single(store.clone())).await.unwrap_err();

    assert!(matches!(
        err,
        VerifyErr::ChunkMismatch { chunk: 2, first_difference: Some(100), .. }
    ));
    assert_eq!(err.failed_chunk(), Some(2));
    assert!(err.to_string().contains("block 2"));
    assert_eq!(downloaded_blocks(&context), vec![0, 1, 2]);
    assert_eq!(context.state(), RunState::Failed);
    assert!(context.history().contains(&RunState::Cleaned));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_failed_cleanup_does_not_fail_a_passing_run() {
    let store = Arc::new(InMemoryObjectStore::new("test-bucket").with_failing_deletes());
    let mut context = RunContext::new(config(true));

    let outcome = context.run_with(Stores::single(store.clone())).await.unwrap();

    let report = match outcome {
        RunOutcome::Passed(report) => report,
        other => panic!("expected a pass, got {other:?}"),
    };
    assert_eq!(&context.history()[context.history().len() - 2..], &[RunState::Cleaned, RunState::Passed]);
    // the delete was attempted and failed, so the object is left behind
    assert_eq!(store.metadata(&report.key), Some(ObjectMetadata::octet_stream(4 * BLOCK as u64)));
}

#[tokio::test]
async fn test_failed_cleanup_keeps_the_mismatch_error() {
    let store = Arc::new(
        InMemoryObjectStore::new("test-bucket")
            .with_corruption_at(2 * BLOCK as u64 + 100)
            .with_failing_deletes(),
    );
    let mut context = RunContext::new(config(true));

    let err = context.run_with(Stores::single(store.clone())).await.unwrap_err();

    assert!(matches!(err, VerifyErr::ChunkMismatch { chunk: 2, .. }), "got {err:?}");
    assert_eq!(&context.history()[context.history().len() - 2..], &[RunState::Cleaned, RunState::Failed]);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_unrecoverable_stream_fails_naming_block() {
    let store = Arc::new(InMemoryObjectStore::new("test-bucket"));
    for _ in 0..3 {
        store.inject_read_fault_at(BLOCK as u64 + 10);
    }
    let mut context = RunContext::new(config(false));

    let err = context.run_with(Stores::single(store.clone())).await.unwrap_err();

    assert!(matches!(err, VerifyErr::Read { chunk: 1, .. }));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_upload_failure_is_fatal() {
    let store = Arc::new(InMemoryObjectStore::new("test-bucket").with_failing_puts());
    let mut context = RunContext::new(config(true));

    let err = context.run_with(Stores::single(store.clone())).await.unwrap_err();

    assert!(matches!(err, VerifyErr::Upload { .. }));
    assert!(downloaded_blocks(&context).is_empty());
    // a key was assigned, so cleanup still ran
    assert!(context.history().contains(&RunState::Cleaned));
    assert_eq!(context.state(), RunState::Failed);
}

#[tokio::test]
async fn test_layout_mismatch_is_caught_before_upload() {
    let store = Arc::new(InMemoryObjectStore::new("test-bucket"));
    let mut context = RunContext::new(config(true)).with_payload(Payload::from_bytes(vec![7u8; 4 * BLOCK - 1]));

    let err = context.run_with(Stores::single(store.clone())).await.unwrap_err();

    assert!(matches!(err, VerifyErr::InvalidLayout(_)));
    assert_eq!(context.object_key(), None);
    assert!(store.is_empty());
    assert_eq!(store.opens(), 0);
}

#[tokio::test]
async fn test_seeded_run_uploads_seeded_payload() {
    let layout = ChunkLayout::new(1024, 3).unwrap();
    let store = Arc::new(InMemoryObjectStore::new("test-bucket"));
    let mut context = RunContext::new(VerifierConfig {
        layout,
        seed: Some(1234),
        ..config(true)
    });

    let outcome = context.run_with(Stores::single(store)).await.unwrap();

    let report = match outcome {
        RunOutcome::Passed(report) => report,
        other => panic!("expected a pass, got {other:?}"),
    };
    assert_eq!(report.seed, Some(1234));
    assert_eq!(report.bytes_verified, 3 * 1024);
}

#[tokio::test]
async fn test_local_filesystem_backend() {
    let root = tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("test-bucket")).unwrap();
    let store = Arc::new(LocalObjectStore::new(root.path(), "test-bucket"));
    let mut context = RunContext::new(config(true));

    let outcome = context.run_with(Stores::single(store.clone())).await.unwrap();

    assert!(matches!(outcome, RunOutcome::Passed(_)));
    let key = context.object_key().unwrap().to_string();
    assert!(!store.object_exists(&key).await.unwrap());
    // a second delete of the same key is harmless
    store.delete_object(&key).await.unwrap();
}
