use serde_json::json;
use std::time::Duration;
use tokio_test::assert_ok;

use suiterun::cache::{CacheStore, Storage};
use suiterun::database::Database;
use suiterun::history::{self, HistoryEntry};
use suiterun::report::Summary;

mod common;
use common::setup_database;

#[tokio::test]
async fn test_database_creation_and_ping() {
    let (temp_dir, db) = setup_database().await.unwrap();

    assert!(temp_dir.path().join("test.db").exists());
    assert_ok!(db.ping().await);
    assert_eq!(Storage::driver(&db), "sqlite");
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let (temp_dir, db) = setup_database().await.unwrap();
    db.put("kept", json!("value"), Duration::from_secs(60)).await.unwrap();
    db.close().await;

    let reopened = Database::new(temp_dir.path().join("test.db")).await.unwrap();
    assert_eq!(reopened.get("kept").await.unwrap(), Some(json!("value")));
}

#[tokio::test]
async fn test_cache_round_trip() {
    let (_temp_dir, db) = setup_database().await.unwrap();

    assert_eq!(db.get("missing").await.unwrap(), None);

    let value = json!({"suites": ["unit", "api"], "passed": 2});
    db.put("key", value.clone(), Duration::from_secs(60)).await.unwrap();
    assert_eq!(db.get("key").await.unwrap(), Some(value));

    db.put("key", json!(3), Duration::from_secs(60)).await.unwrap();
    assert_eq!(db.get("key").await.unwrap(), Some(json!(3)));

    db.forget("key").await.unwrap();
    assert_eq!(db.get("key").await.unwrap(), None);
}

#[tokio::test]
async fn test_expired_entries_are_not_returned() {
    let (_temp_dir, db) = setup_database().await.unwrap();

    db.put("short", json!(true), Duration::from_millis(1)).await.unwrap();
    db.put("long", json!(true), Duration::from_secs(60)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(db.purge_expired().await.unwrap(), 1);
    assert_eq!(db.get("short").await.unwrap(), None);
    assert_eq!(db.get("long").await.unwrap(), Some(json!(true)));
}

#[tokio::test]
async fn test_history_persists_in_sqlite() {
    let (_temp_dir, db) = setup_database().await.unwrap();

    let entry = HistoryEntry {
        session_id: uuid::Uuid::new_v4(),
        timestamp: chrono::Utc::now(),
        summary: Summary::default(),
        records: Vec::new(),
    };
    let count = history::append(&db, entry.clone()).await.unwrap();

    assert_eq!(count, 1);
    assert_eq!(history::load(&db).await.unwrap(), vec![entry]);
}
