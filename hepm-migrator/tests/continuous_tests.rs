//! Continuous mode: drop directory, liveness file and cancellation

mod helpers;

use std::time::Duration;

use hepm_migrator::db::mirror;
use hepm_migrator::model::MigratedStatus;
use helpers::*;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_cycle_ingests_drop_dir_and_touches_lastrun() {
    let (dir, pool) = create_test_db().await.unwrap();
    let drop_dir = dir.path().join("incoming");
    std::fs::create_dir_all(&drop_dir).unwrap();
    write_dump(&drop_dir, "batch-1.xml", &standard_dump());

    let mut config = test_config(&dir);
    config.migration.drop_dir = Some(drop_dir.clone());
    let lastrun = config.migration.lastrun_file.clone();
    let (migrator, index) = create_test_migrator(&pool, config);

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    let runner = tokio::spawn(async move { migrator.run_continuously(stopper).await });

    // Wait for the first cycle to finish
    let mut migrated = false;
    for _ in 0..100 {
        if drop_dir.join("done").join("batch-1.xml").exists()
            && mirror::get(&pool, 667).await.unwrap().map(|row| row.migrated_status)
                == Some(MigratedStatus::Migrated)
        {
            migrated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cancel.cancel();
    let cycles = runner.await.unwrap().unwrap();

    assert!(migrated, "drop dir file was not migrated");
    assert!(cycles >= 1);
    assert!(!drop_dir.join("batch-1.xml").exists());
    assert!(lastrun.exists());
    let stamp = std::fs::read_to_string(&lastrun).unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(stamp.trim()).is_ok());

    assert_eq!(mirror_status(&pool, 668).await, MigratedStatus::Broken);
    let cited = literature(&pool, 666).await;
    assert_eq!(derived(&cited, "citation_count"), 1);
    assert!(index.get(cited.uuid).await.is_some());
}

#[tokio::test]
async fn test_cancelled_token_stops_after_current_cycle() {
    let (dir, pool) = create_test_db().await.unwrap();
    let mut config = test_config(&dir);
    config.migration.polling_interval_ms = 60_000;
    let (migrator, _index) = create_test_migrator(&pool, config);

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    let runner = tokio::spawn(async move { migrator.run_continuously(stopper).await });

    // The loop is asleep after its first cycle; cancellation wakes it
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    let cycles = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("loop did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(cycles, 1);
}

#[tokio::test]
async fn test_already_cancelled_token_runs_no_cycle() {
    let (dir, pool) = create_test_db().await.unwrap();
    let config = test_config(&dir);
    let lastrun = config.migration.lastrun_file.clone();
    let (migrator, _index) = create_test_migrator(&pool, config);

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert_eq!(migrator.run_continuously(cancel).await.unwrap(), 0);
    assert!(!lastrun.exists());
}

#[tokio::test]
async fn test_unreadable_dump_moves_to_failed() {
    let (dir, pool) = create_test_db().await.unwrap();
    let drop_dir = dir.path().join("incoming");
    std::fs::create_dir_all(&drop_dir).unwrap();
    // gzip magic followed by garbage
    std::fs::write(drop_dir.join("broken.xml.gz"), [0x1f, 0x8b, 0x00, 0x01, 0x02]).unwrap();

    let mut config = test_config(&dir);
    config.migration.drop_dir = Some(drop_dir.clone());
    let (migrator, _index) = create_test_migrator(&pool, config);

    migrator.run_cycle().await.unwrap();
    assert!(drop_dir.join("failed").join("broken.xml.gz").exists());
    assert!(!drop_dir.join("broken.xml.gz").exists());
}
