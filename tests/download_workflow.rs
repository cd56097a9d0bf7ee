//! End-to-end local-download runs against the mock transport.

mod common;

use std::sync::Arc;

use chanrelay::client::{ChannelRef, ClientError, MediaKind, MockOp};
use chanrelay::distribute::Strategy;
use chanrelay::driver::{RunRequest, WorkflowDriver};
use chanrelay::report::RunMode;
use chanrelay::session::SessionState;

use common::{message, started_pool, MockNet};

fn download_request(start: i64, end: i64) -> RunRequest {
    RunRequest {
        mode: RunMode::Download,
        source: ChannelRef::new("@src"),
        start_id: start,
        end_id: end,
        targets: Vec::new(),
        strategy: Strategy::MediaGroupAware,
    }
}

/// S1: singleton + group + singleton across two sessions; all five
/// files land on disk under the pattern, the group stays on one
/// session.
#[tokio::test(start_paused = true)]
async fn download_singleton_and_group() {
    let net = MockNet::new(&["alpha", "bravo"]);
    let source = ChannelRef::new("@src");
    net.seed_all(&source, &[
        message(100, MediaKind::Photo, 1_000, None),
        message(101, MediaKind::Photo, 2_000, Some("g1")),
        message(102, MediaKind::Video, 3_000, Some("g1")),
        message(103, MediaKind::Document, 4_000, Some("g1")),
        message(104, MediaKind::Document, 5_000, None),
    ]);

    let pool = started_pool(&net, &["alpha", "bravo"]).await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::base_config();
    config.download.output_dir = dir.path().to_path_buf();

    let driver = WorkflowDriver::new(Arc::new(config), pool);
    let report = driver.run(download_request(100, 104)).await.unwrap();

    assert_eq!(report.outcomes.len(), 3, "three atomic units");
    assert_eq!(report.failed(), 0);
    assert!(report.is_full_success());
    assert_eq!(report.exit_code(), 0);

    // The group unit lives on exactly one session.
    let group_outcome = report.outcomes.iter().find(|o| o.first_id == 101).unwrap();
    assert_eq!(group_outcome.files.len(), 3);

    // All five files on disk, named by pattern, in the channel dir.
    let channel_dir = dir.path().join("src");
    let mut names: Vec<String> = std::fs::read_dir(&channel_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    assert_eq!(names.len(), 5);
    assert_eq!(names[0], "20240501_100_src_file100.jpg");
    assert!(names.iter().all(|n| n.starts_with("20240501_")));
    assert!(!names.iter().any(|n| n.ends_with(".part")));

    // Byte counts verified against declared sizes.
    assert_eq!(report.bytes_transferred(), 15_000);
}

#[tokio::test(start_paused = true)]
async fn kind_filter_reports_skipped() {
    let net = MockNet::new(&["alpha"]);
    let source = ChannelRef::new("@src");
    net.seed_all(&source, &[
        message(1, MediaKind::Photo, 100, None),
        message(2, MediaKind::Document, 100, None),
    ]);

    let pool = started_pool(&net, &["alpha"]).await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::base_config();
    config.download.output_dir = dir.path().to_path_buf();
    config.download.include_kinds = vec![MediaKind::Photo];

    let driver = WorkflowDriver::new(Arc::new(config), pool);
    let report = driver.run(download_request(1, 2)).await.unwrap();

    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.failed(), 0);
    assert!(report.is_full_success());
}

/// S5: a session dies mid-run; its units are reassigned and every unit
/// completes exactly once.
#[tokio::test(start_paused = true)]
async fn session_loss_reassigns_units() {
    let net = MockNet::new(&["alpha", "bravo"]);
    let source = ChannelRef::new("@src");
    let messages: Vec<_> = (1..=8)
        .map(|id| message(id, MediaKind::Photo, 100 * id as u64, None))
        .collect();
    net.seed_all(&source, &messages);

    // The first download on alpha kills the session.
    net.mock("alpha").fail_next(MockOp::Download, None, ClientError::Unauthorized);

    let pool = started_pool(&net, &["alpha", "bravo"]).await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::base_config();
    config.download.output_dir = dir.path().to_path_buf();

    let driver = WorkflowDriver::new(Arc::new(config), pool.clone());
    let report = driver.run(download_request(1, 8)).await.unwrap();

    // Alpha dropped out but every unit finished, no duplicates.
    assert_eq!(pool.get("alpha").unwrap().state(), SessionState::Error);
    assert_eq!(report.outcomes.len(), 8);
    assert_eq!(report.failed(), 0);
    let mut ids: Vec<i64> = report.outcomes.iter().map(|o| o.first_id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8, "each unit completed exactly once");

    // Alpha completed nothing; everything ran on bravo.
    assert!(report.outcomes.iter().all(|o| o.session == "bravo"));
}

#[tokio::test(start_paused = true)]
async fn deleted_source_ids_are_skipped_silently() {
    let net = MockNet::new(&["alpha"]);
    let source = ChannelRef::new("@src");
    // Only 3 of 6 requested ids exist.
    net.seed_all(&source, &[
        message(1, MediaKind::Photo, 10, None),
        message(3, MediaKind::Photo, 10, None),
        message(5, MediaKind::Photo, 10, None),
    ]);

    let pool = started_pool(&net, &["alpha"]).await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::base_config();
    config.download.output_dir = dir.path().to_path_buf();

    let driver = WorkflowDriver::new(Arc::new(config), pool);
    let report = driver.run(download_request(1, 6)).await.unwrap();

    assert_eq!(report.outcomes.len(), 3);
    assert!(report.is_full_success());
}

#[tokio::test(start_paused = true)]
async fn validation_rejects_targets_in_download_mode() {
    let net = MockNet::new(&["alpha"]);
    let pool = started_pool(&net, &["alpha"]).await;
    let driver = WorkflowDriver::new(Arc::new(common::base_config()), pool);

    let mut request = download_request(1, 5);
    request.targets = vec![ChannelRef::new("@d1")];
    let err = driver.run(request).await.unwrap_err();
    assert!(err.to_string().contains("no targets"));
}

#[tokio::test(start_paused = true)]
async fn validation_rejects_inverted_range() {
    let net = MockNet::new(&["alpha"]);
    let pool = started_pool(&net, &["alpha"]).await;
    let driver = WorkflowDriver::new(Arc::new(common::base_config()), pool);

    let err = driver.run(download_request(10, 5)).await.unwrap_err();
    assert!(err.to_string().contains("invalid id range"));
}
