use crate::db::*;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_database_creation() {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path();

    let db = Database::new(db_path).await.unwrap();

    // Verify tables exist
    let mut conn = db.pool.acquire().await.unwrap();

    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .fetch_all(&mut *conn)
            .await
            .unwrap();

    assert!(tables.contains(&"retrieve_task".to_string()));
    assert!(tables.contains(&"queue_msg".to_string()));
    assert!(tables.contains(&"schema_version".to_string()));

    drop(conn);
    db.close().await;
}

#[tokio::test]
async fn test_lookup_columns_are_indexed() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let indexes: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='index' AND tbl_name='retrieve_task' AND name LIKE 'idx_%'",
    )
    .fetch_all(db.pool())
    .await
    .unwrap();

    for column in [
        "device_name",
        "queue_name",
        "local_aet",
        "remote_aet",
        "destination_aet",
        "created_time",
        "updated_time",
        "scheduled_time",
        "study_iuid",
        "batch_id",
    ] {
        let name = format!("idx_retrieve_task_{}", column);
        assert!(indexes.contains(&name), "missing index {name}");
    }
}

#[tokio::test]
async fn test_reopen_does_not_rerun_migrations() {
    let temp_file = NamedTempFile::new().unwrap();

    let db = Database::new(temp_file.path()).await.unwrap();
    db.insert_retrieve_task(&super::new_task("DEV1"))
        .await
        .unwrap();
    db.close().await;

    // A second v1 run would fail on CREATE TABLE
    let db = Database::new(temp_file.path()).await.unwrap();

    let versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_version")
        .fetch_all(db.pool())
        .await
        .unwrap();
    assert_eq!(versions, vec![1]);

    let count = db.count_retrieve_tasks(&TaskFilter::default()).await.unwrap();
    assert_eq!(count, 1, "data must survive reopening");
}

#[tokio::test]
async fn test_creates_missing_parent_directory() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("nested").join("tasks.db");

    let db = Database::new(&db_path).await.unwrap();
    assert!(db_path.exists());
    db.close().await;
}
