//! # Local Pipeline Integration Tests
//!
//! Full batches through the filesystem storage adapter and a `cp` transform
//! command: objects land at their destinations and staging is left empty.

#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;

use tokio_test::{assert_err, assert_ok};

use conveyor_core::adapters::{CommandTransformer, LocalFsStorage, LocalSteps};
use conveyor_core::logging::Verbosity;
use conveyor_core::models::{BatchDefaults, BatchInput, JobStatus, StepKind};
use conveyor_core::orchestration::{BatchDispatcher, LocalJobRunner, WorkflowSettings};
use conveyor_core::ErrorClassification;

fn write_object(root: &Path, bucket: &str, key: &str, bytes: &[u8]) {
    let path = root.join(bucket).join(key);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}

fn copy_steps(root: &Path, staging: &Path) -> Arc<LocalSteps> {
    Arc::new(LocalSteps::new(
        LocalFsStorage::new(root, staging),
        CommandTransformer::new(
            vec!["cp".to_string(), "{input}".to_string(), "{output}".to_string()],
            "png",
        ),
    ))
}

#[tokio::test]
async fn comma_list_batch_stores_every_object() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("data");
    let staging = dir.path().join("staging");
    write_object(&root, "source-bucket", "cats/tom.png", b"tom");
    write_object(&root, "source-bucket", "felix.png", b"felix");

    let defaults = BatchDefaults {
        source_bucket: "source-bucket".to_string(),
        destination_bucket: "dest-bucket".to_string(),
        destination_prefix: "enhanced_".to_string(),
        instruction: Some("brighten".to_string()),
    };
    let jobs = assert_ok!(BatchInput::parse("cats/tom.png, felix.png", &defaults));

    let runner = LocalJobRunner::new(copy_steps(&root, &staging), WorkflowSettings::default(), "enhance");
    let dispatcher = BatchDispatcher::new(Arc::new(runner), Verbosity::Quiet);
    let report = assert_ok!(dispatcher.run_batch(jobs, 2).await);

    assert!(report.summary.all_succeeded());
    assert_eq!(
        std::fs::read(root.join("dest-bucket/cats/enhanced_tom.png")).unwrap(),
        b"tom"
    );
    assert_eq!(
        std::fs::read(root.join("dest-bucket/enhanced_felix.png")).unwrap(),
        b"felix"
    );
    assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
}

#[tokio::test]
async fn missing_source_fails_without_retry_and_leaves_no_staging() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("data");
    let staging = dir.path().join("staging");
    write_object(&root, "source-bucket", "present.png", b"here");

    let jobs = assert_ok!(BatchInput::parse(
        r#"[{"source_bucket": "source-bucket", "source_key": "present.png",
             "dest_bucket": "dest-bucket", "dest_key": "out/present.png"},
            {"source_bucket": "source-bucket", "source_key": "absent.png",
             "dest_bucket": "dest-bucket", "dest_key": "out/absent.png"}]"#,
        &BatchDefaults::default(),
    ));

    let runner = LocalJobRunner::new(copy_steps(&root, &staging), WorkflowSettings::default(), "enhance");
    let dispatcher = BatchDispatcher::new(Arc::new(runner), Verbosity::Quiet);
    let report = assert_ok!(dispatcher.run_batch(jobs, 2).await);

    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(report.summary.failed, 1);
    let failed = report.failures().next().unwrap();
    let failure = failed.failure.as_ref().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failure.step, Some(StepKind::Fetch));
    assert_eq!(failure.attempts, 1);
    assert_eq!(failure.classification, ErrorClassification::NonRetryable);

    assert!(root.join("dest-bucket/out/present.png").exists());
    assert!(!root.join("dest-bucket/out/absent.png").exists());
    assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
}

#[tokio::test]
async fn malformed_json_batch_is_rejected() {
    assert_err!(BatchInput::parse("[{\"source\": 1}]", &BatchDefaults::default()));
}
