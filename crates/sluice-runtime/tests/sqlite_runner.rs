//! End-to-end runs against SQLite database files.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use sluice_core::config::LockConfig;
use sluice_core::error::SluiceError;
use sluice_core::migration::{CodeSource, MigrationUnit};
use sluice_core::run::{RunEvent, RunOutcome, RunState};
use sluice_core::schema::ColumnType;
use sluice_core::target::TargetIdentity;
use sluice_runtime::{MigrationRunner, MigrationRunnerBuilder};
use sqlx::{Connection, SqliteConnection};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn url(dir: &TempDir) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join("app.db").display())
}

fn baseline() -> MigrationUnit {
    MigrationUnit::new(0, "Baseline").up(|s| {
        s.create_table("Person", |t| {
            t.column("Uid", ColumnType::Guid).primary_key();
            t.column("Name", ColumnType::string());
        });
    })
}

fn add_email() -> MigrationUnit {
    MigrationUnit::new(1, "Add email").up(|s| {
        s.add_column("Person", "Email", ColumnType::String(Some(320)), |c| {
            c.nullable();
        });
    })
}

fn broken() -> MigrationUnit {
    MigrationUnit::new(1, "Broken index").up(|s| {
        s.create_table("Audit", |t| {
            t.column("Id", ColumnType::Int64).primary_key();
        })
        .create_index("Person", &["Missing"], None, false);
    })
}

fn runner(dir: &TempDir, units: Vec<MigrationUnit>) -> MigrationRunnerBuilder {
    MigrationRunner::builder(TargetIdentity::new("sqlite", &url(dir), None)).source(units)
}

async fn connect(dir: &TempDir) -> SqliteConnection {
    SqliteConnection::connect(&url(dir)).await.unwrap()
}

async fn ledger_versions(dir: &TempDir) -> Vec<i64> {
    let mut conn = connect(dir).await;
    sqlx::query_scalar::<_, i64>("SELECT \"Version\" FROM \"VersionInfo\" ORDER BY \"Version\"")
        .fetch_all(&mut conn)
        .await
        .unwrap()
}

async fn columns(dir: &TempDir, table: &str) -> Vec<String> {
    let mut conn = connect(dir).await;
    sqlx::query_scalar::<_, String>("SELECT name FROM pragma_table_info(?) ORDER BY cid")
        .bind(table)
        .fetch_all(&mut conn)
        .await
        .unwrap()
}

async fn table_exists(dir: &TempDir, table: &str) -> bool {
    let mut conn = connect(dir).await;
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
    )
    .bind(table)
    .fetch_one(&mut conn)
    .await
    .unwrap();
    count > 0
}

async fn lock_rows(dir: &TempDir) -> i64 {
    let mut conn = connect(dir).await;
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM \"VersionInfoLock\"")
        .fetch_one(&mut conn)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_baseline_creates_table_and_ledger_row() {
    let dir = TempDir::new().unwrap();
    let mut runner = runner(&dir, vec![baseline()]).build().unwrap();

    let report = runner.migrate().await.unwrap();
    assert_eq!(report.applied, vec![0]);
    assert_eq!(report.max_version, Some(0));
    assert_eq!(runner.state(), RunState::LockReleased);

    assert_eq!(columns(&dir, "Person").await, vec!["Uid", "Name"]);

    let status = runner.status().await.unwrap();
    assert_eq!(status.applied.len(), 1);
    assert_eq!(status.applied[0].version, 0);
    assert_eq!(status.applied[0].description, "Baseline");
    assert!(status.pending.is_empty());
    assert_eq!(lock_rows(&dir).await, 0);
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let mut runner = runner(&dir, vec![baseline()]).build().unwrap();

    runner.migrate().await.unwrap();
    let before = runner.status().await.unwrap().applied;

    let report = runner.migrate().await.unwrap();
    assert_eq!(report.applied_count(), 0);
    assert_eq!(report.max_version, Some(0));
    assert_eq!(runner.status().await.unwrap().applied, before);
}

#[tokio::test]
async fn test_only_pending_versions_are_applied() {
    let dir = TempDir::new().unwrap();
    runner(&dir, vec![baseline()])
        .build()
        .unwrap()
        .migrate()
        .await
        .unwrap();

    let mut runner = runner(&dir, vec![baseline(), add_email()]).build().unwrap();
    let report = runner.migrate().await.unwrap();

    assert_eq!(report.applied, vec![1]);
    assert_eq!(ledger_versions(&dir).await, vec![0, 1]);
    assert_eq!(columns(&dir, "Person").await, vec!["Uid", "Name", "Email"]);
}

#[tokio::test]
async fn test_failing_migration_leaves_no_trace() {
    let dir = TempDir::new().unwrap();
    let mut runner = runner(&dir, vec![baseline(), broken()]).build().unwrap();

    let report = runner.run(CancellationToken::new()).await;
    assert_eq!(report.applied, vec![0]);
    assert_eq!(report.failed_migration(), Some((1, "Broken index")));
    assert_eq!(runner.state(), RunState::Failed);

    assert_eq!(ledger_versions(&dir).await, vec![0]);
    assert!(!table_exists(&dir, "Audit").await);
    assert_eq!(lock_rows(&dir).await, 0);

    // The next run retries the same version.
    let err = runner.migrate().await.unwrap_err();
    assert_eq!(err.failed_version(), Some(1));
}

#[tokio::test]
async fn test_cancel_between_migrations() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    let mut runner = runner(&dir, vec![baseline(), add_email()])
        .observer(move |event: &RunEvent<'_>| {
            if let RunEvent::MigrationCommitted { version: 0, .. } = event {
                trigger.cancel();
            }
        })
        .build()
        .unwrap();

    let report = runner.run(cancel).await;
    assert!(matches!(report.outcome, RunOutcome::Cancelled));
    assert_eq!(report.applied, vec![0]);
    assert_eq!(ledger_versions(&dir).await, vec![0]);
    assert_eq!(lock_rows(&dir).await, 0);

    let err = report.into_result().unwrap_err();
    assert!(matches!(err, SluiceError::Cancelled { applied: 1 }));
}

async fn insert_lock_row(dir: &TempDir, owner: &str, acquired_on: DateTime<Utc>) {
    let mut conn = connect(dir).await;
    sqlx::query(
        "CREATE TABLE \"VersionInfoLock\" (\"Id\" INTEGER NOT NULL PRIMARY KEY, \"Owner\" TEXT NOT NULL, \"AcquiredOn\" DATETIME NOT NULL)",
    )
    .execute(&mut conn)
    .await
    .unwrap();
    sqlx::query("INSERT INTO \"VersionInfoLock\" VALUES (1, ?, ?)")
        .bind(owner)
        .bind(acquired_on)
        .execute(&mut conn)
        .await
        .unwrap();
    conn.close().await.unwrap();
}

fn short_lock() -> LockConfig {
    LockConfig {
        timeout_secs: 1,
        poll_interval_ms: 50,
        ..LockConfig::default()
    }
}

#[tokio::test]
async fn test_lock_held_elsewhere_times_out() {
    let dir = TempDir::new().unwrap();
    insert_lock_row(&dir, "another-runner", Utc::now()).await;

    let mut runner = runner(&dir, vec![baseline()]).lock(short_lock()).build().unwrap();

    let err = runner.migrate().await.unwrap_err();
    assert!(matches!(err, SluiceError::LockTimeout { .. }));
    assert!(!table_exists(&dir, "VersionInfo").await);
    assert!(!table_exists(&dir, "Person").await);
    assert_eq!(lock_rows(&dir).await, 1);
}

#[tokio::test]
async fn test_lock_left_by_dead_runner_is_taken_over() {
    let dir = TempDir::new().unwrap();
    insert_lock_row(&dir, "crashed-runner", Utc::now() - chrono::Duration::hours(2)).await;

    let mut runner = runner(&dir, vec![baseline()]).lock(short_lock()).build().unwrap();

    let report = runner.migrate().await.unwrap();
    assert_eq!(report.applied, vec![0]);
    assert_eq!(ledger_versions(&dir).await, vec![0]);
    assert_eq!(lock_rows(&dir).await, 0);
}

#[tokio::test]
async fn test_concurrent_runners_apply_each_version_once() {
    let dir = TempDir::new().unwrap();
    let units = || vec![baseline(), add_email()];
    let lock = LockConfig {
        timeout_secs: 30,
        poll_interval_ms: 20,
        ..LockConfig::default()
    };

    let mut first = runner(&dir, units()).lock(lock.clone()).build().unwrap();
    let mut second = runner(&dir, units()).lock(lock).build().unwrap();

    let (a, b) = tokio::join!(first.migrate(), second.migrate());
    let (a, b) = (a.unwrap(), b.unwrap());

    let mut applied: Vec<i64> = a.applied.iter().chain(&b.applied).copied().collect();
    applied.sort_unstable();
    assert_eq!(applied, vec![0, 1]);
    assert_eq!(ledger_versions(&dir).await, vec![0, 1]);
}

#[tokio::test]
async fn test_rollback_reverses_newest_first() {
    let dir = TempDir::new().unwrap();
    let mut runner = runner(&dir, vec![baseline(), add_email()]).build().unwrap();
    runner.migrate().await.unwrap();

    let report = runner.rollback_to(0).await.unwrap();
    assert_eq!(report.reverted, vec![1]);
    assert_eq!(report.max_version, Some(0));
    assert_eq!(columns(&dir, "Person").await, vec!["Uid", "Name"]);

    let report = runner.rollback_to(-1).await.unwrap();
    assert_eq!(report.reverted, vec![0]);
    assert_eq!(report.max_version, None);
    assert!(!table_exists(&dir, "Person").await);

    // Everything is pending again.
    let status = runner.status().await.unwrap();
    assert_eq!(status.pending.len(), 2);
}

#[tokio::test]
async fn test_rollback_refuses_irreversible_migration() {
    let dir = TempDir::new().unwrap();
    let seed = MigrationUnit::new(1, "Seed").up(|s| {
        s.sql("INSERT INTO \"Person\" (\"Uid\", \"Name\") VALUES ('a', 'Ada')");
    });
    let mut runner = runner(&dir, vec![baseline(), seed]).build().unwrap();
    runner.migrate().await.unwrap();

    let err = runner.rollback_to(-1).await.unwrap_err();
    assert!(matches!(err, SluiceError::IrreversibleMigration { version: 1, .. }));
    assert_eq!(ledger_versions(&dir).await, vec![0, 1]);
}

#[tokio::test]
async fn test_observer_sees_run_in_order() {
    let dir = TempDir::new().unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let mut runner = runner(&dir, vec![baseline(), add_email()])
        .observer(move |event: &RunEvent<'_>| {
            let line = match event {
                RunEvent::LockAcquired { .. } => "lock".to_string(),
                RunEvent::MigrationStarting { version, .. } => format!("start {}", version),
                RunEvent::MigrationCommitted { version, .. } => format!("commit {}", version),
                RunEvent::RunFinished { report } => format!("finished {}", report.applied_count()),
            };
            sink.lock().unwrap().push(line);
        })
        .build()
        .unwrap();

    runner.migrate().await.unwrap();
    assert_eq!(
        *events.lock().unwrap(),
        vec!["lock", "start 0", "commit 0", "start 1", "commit 1", "finished 2"]
    );
}

#[tokio::test]
async fn test_duplicate_versions_fail_before_touching_the_database() {
    let dir = TempDir::new().unwrap();
    let source = CodeSource::new()
        .unit(baseline())
        .unit(MigrationUnit::new(0, "Another baseline"));

    let mut runner = MigrationRunner::builder(TargetIdentity::new("sqlite", &url(&dir), None))
        .source(source)
        .build()
        .unwrap();

    let err = runner.migrate().await.unwrap_err();
    assert!(matches!(err, SluiceError::DuplicateVersion { version: 0, .. }));
    assert!(!Path::new(&dir.path().join("app.db")).exists());
}

#[tokio::test]
async fn test_sql_directory_migrations() {
    let dir = TempDir::new().unwrap();
    let migrations = dir.path().join("migrations");
    std::fs::create_dir(&migrations).unwrap();
    std::fs::write(
        migrations.join("0001_create_notes.sql"),
        "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);\nINSERT INTO notes (body) VALUES ('first; note');",
    )
    .unwrap();
    std::fs::write(migrations.join("0001_create_notes.down.sql"), "DROP TABLE notes;").unwrap();

    let mut runner = MigrationRunner::builder(TargetIdentity::new("sqlite", &url(&dir), None))
        .source(sluice_runtime::DirectorySource::new(&migrations))
        .build()
        .unwrap();

    let report = runner.migrate().await.unwrap();
    assert_eq!(report.applied, vec![1]);
    assert_eq!(columns(&dir, "notes").await, vec!["id", "body"]);

    runner.rollback_to(0).await.unwrap();
    assert!(!table_exists(&dir, "notes").await);
}

#[tokio::test]
async fn test_comment_only_down_file_cannot_roll_back() {
    let dir = TempDir::new().unwrap();
    let migrations = dir.path().join("migrations");
    std::fs::create_dir(&migrations).unwrap();
    std::fs::write(migrations.join("0001_create_notes.sql"), "CREATE TABLE notes (id INTEGER);")
        .unwrap();
    std::fs::write(
        migrations.join("0001_create_notes.down.sql"),
        "-- Revert: create notes\n",
    )
    .unwrap();

    let mut runner = MigrationRunner::builder(TargetIdentity::new("sqlite", &url(&dir), None))
        .source(sluice_runtime::DirectorySource::new(&migrations))
        .build()
        .unwrap();
    runner.migrate().await.unwrap();

    let err = runner.rollback_to(0).await.unwrap_err();
    assert!(matches!(err, SluiceError::IrreversibleMigration { version: 1, .. }));
    assert!(table_exists(&dir, "notes").await);
    assert_eq!(ledger_versions(&dir).await, vec![1]);
    assert_eq!(lock_rows(&dir).await, 0);
}

#[tokio::test]
async fn test_empty_explicit_down_is_refused() {
    let dir = TempDir::new().unwrap();
    let unit = MigrationUnit::new(1, "Create notes")
        .up(|s| {
            s.create_table("Notes", |t| {
                t.column("Id", ColumnType::Int64).primary_key();
            });
        })
        .down(|_| {});
    let mut runner = runner(&dir, vec![unit]).build().unwrap();
    runner.migrate().await.unwrap();

    let err = runner.rollback_to(0).await.unwrap_err();
    assert!(matches!(err, SluiceError::IrreversibleMigration { version: 1, .. }));
    assert!(table_exists(&dir, "Notes").await);
    assert_eq!(ledger_versions(&dir).await, vec![1]);
}
