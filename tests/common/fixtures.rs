//! Database and task fixtures

use retrieve_tasks::Database;
use retrieve_tasks::db::{NewQueueMessage, NewRetrieveTask, TaskProgress};
use tempfile::TempDir;

/// Open a fresh database in its own temporary directory
///
/// Keep the returned `TempDir` alive for as long as the database is used.
pub async fn open_database() -> (Database, TempDir) {
    let temp_dir = tempfile::tempdir().expect("create temp dir");
    let db = Database::new(&temp_dir.path().join("retrieve-tasks.db"))
        .await
        .expect("open database");
    (db, temp_dir)
}

/// Study-level retrieve from PACS to VIEWER for `device`
pub fn study_retrieve(device: &str) -> NewRetrieveTask {
    NewRetrieveTask {
        device_name: device.to_string(),
        queue_name: "Retrieve1".to_string(),
        local_aet: "ARCHIVE".to_string(),
        remote_aet: "PACS".to_string(),
        destination_aet: "VIEWER".to_string(),
        study_iuid: "1.2.840.113619.2.55.3.604688119".to_string(),
        ..Default::default()
    }
}

/// Queue message for the default retrieve queue
pub fn queue_message(message_id: &str) -> NewQueueMessage {
    NewQueueMessage {
        message_id: message_id.to_string(),
        queue_name: "Retrieve1".to_string(),
    }
}

/// Progress report without a final status
pub fn progress(remaining: i32, completed: i32, failed: i32, warning: i32) -> TaskProgress {
    TaskProgress {
        remaining,
        completed,
        failed,
        warning,
        status_code: -1,
        error_comment: None,
    }
}
