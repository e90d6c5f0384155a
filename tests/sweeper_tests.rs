mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use file_drop::config::{SweeperConfig, UploadPolicy};
use file_drop::data::DataBackend;
use file_drop::models::{File, Upload};
use file_drop::sweeper::{SweepReport, Sweeper};

use common::{test_env, TestEnv};

fn sweeper(env: &TestEnv) -> Sweeper {
    Sweeper::new(
        Arc::clone(&env.metadata),
        Arc::clone(&env.data) as Arc<dyn DataBackend>,
        &SweeperConfig::default(),
    )
}

/// Store an upload that expired a minute ago, with one file on disk.
async fn expired_upload(env: &TestEnv, stream: bool) -> Upload {
    let mut upload = Upload::new(10);
    upload.created_at = Utc::now() - chrono::Duration::seconds(60);
    upload.stream = stream;
    let file = File::new("file1", "old.txt");
    upload.files.push(file.clone());
    env.metadata.create_upload(&upload).unwrap();

    if !stream {
        let mut reader = &b"stale"[..];
        env.data.add_file(&upload, &file, &mut reader).await.unwrap();
    }
    upload
}

fn upload_dir(env: &TestEnv, upload: &Upload) -> std::path::PathBuf {
    env.dir
        .path()
        .join("files")
        .join(&upload.id[..2])
        .join(&upload.id)
}

#[tokio::test]
async fn test_clean_removes_expired_uploads() {
    let env = test_env(UploadPolicy::default());
    let expired = expired_upload(&env, false).await;
    let live = Upload::new(3600);
    env.metadata.create_upload(&live).unwrap();

    let report = sweeper(&env).clean().await.unwrap();
    assert_eq!(
        report,
        SweepReport {
            removed: 1,
            failed: 0
        }
    );

    assert!(env.metadata.get_upload(&expired.id).unwrap().is_none());
    assert!(!upload_dir(&env, &expired).exists());
    assert!(env.metadata.get_upload(&live.id).unwrap().is_some());
}

#[tokio::test]
async fn test_clean_keeps_uploads_it_cannot_empty() {
    let env = test_env(UploadPolicy::default());
    let expired = expired_upload(&env, false).await;

    env.data.set_fail_removals(true);
    let report = sweeper(&env).clean().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.removed, 0);
    assert!(env.metadata.get_upload(&expired.id).unwrap().is_some());

    // The next cycle picks it up again
    env.data.set_fail_removals(false);
    let report = sweeper(&env).clean().await.unwrap();
    assert_eq!(report.removed, 1);
    assert!(env.metadata.get_upload(&expired.id).unwrap().is_none());
}

#[tokio::test]
async fn test_clean_skips_data_of_stream_uploads() {
    let env = test_env(UploadPolicy::default());
    let expired = expired_upload(&env, true).await;

    // Would fail if the data backend were asked
    env.data.set_fail_removals(true);
    let report = sweeper(&env).clean().await.unwrap();
    assert_eq!(report.removed, 1);
    assert!(env.metadata.get_upload(&expired.id).unwrap().is_none());
}

#[tokio::test]
async fn test_failure_does_not_stop_other_uploads() {
    let env = test_env(UploadPolicy::default());
    let file_upload = expired_upload(&env, false).await;
    let stream_upload = expired_upload(&env, true).await;

    env.data.set_fail_removals(true);
    let report = sweeper(&env).clean().await.unwrap();
    assert_eq!(
        report,
        SweepReport {
            removed: 1,
            failed: 1
        }
    );
    assert!(env.metadata.get_upload(&file_upload.id).unwrap().is_some());
    assert!(env.metadata.get_upload(&stream_upload.id).unwrap().is_none());
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let env = test_env(UploadPolicy::default());
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(sweeper(&env).run(shutdown.clone()));

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("sweeper should stop")
        .unwrap();
}

#[tokio::test]
async fn test_run_sweeps_periodically() {
    let env = test_env(UploadPolicy::default());
    let expired = expired_upload(&env, false).await;

    let config = SweeperConfig {
        min_offset: Duration::from_millis(10),
        random_delay: Duration::ZERO,
    };
    let sweeper = Sweeper::new(
        Arc::clone(&env.metadata),
        Arc::clone(&env.data) as Arc<dyn DataBackend>,
        &config,
    );
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(sweeper.run(shutdown.clone()));

    for _ in 0..200 {
        if env.metadata.get_upload(&expired.id).unwrap().is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(env.metadata.get_upload(&expired.id).unwrap().is_none());

    shutdown.cancel();
    handle.await.unwrap();
}
