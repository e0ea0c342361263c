mod migrations;

use crate::db::{Database, NewQueueMessage, NewRetrieveTask};
use crate::types::TaskId;
use tempfile::NamedTempFile;

async fn setup() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

fn new_task(device: &str) -> NewRetrieveTask {
    NewRetrieveTask {
        device_name: device.to_string(),
        queue_name: "Retrieve1".to_string(),
        local_aet: "ARCHIVE".to_string(),
        remote_aet: "PACS".to_string(),
        destination_aet: "VIEWER".to_string(),
        study_iuid: "1.2.840.113619.2.1".to_string(),
        ..Default::default()
    }
}

fn new_message(message_id: &str) -> NewQueueMessage {
    NewQueueMessage {
        message_id: message_id.to_string(),
        queue_name: "Retrieve1".to_string(),
    }
}

/// Insert a task for `device` and claim it with `message_id`
async fn claimed_task(
    db: &Database,
    device: &str,
    message_id: &str,
) -> (TaskId, crate::types::QueueMessageId) {
    let task = db.insert_retrieve_task(&new_task(device)).await.unwrap();
    let message = db
        .claim_retrieve_task(task.pk, &new_message(message_id))
        .await
        .unwrap()
        .expect("fresh task should be claimable");
    (task.pk, message.pk)
}
