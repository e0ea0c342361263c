//! End-to-end retrieve task lifecycle: schedule, claim, progress, export

mod common;

use async_trait::async_trait;
use chrono::Duration;
use common::{open_database, progress, queue_message, study_retrieve};
use retrieve_tasks::config::DispatchConfig;
use retrieve_tasks::db::{QueueMessage, QueueMessageUpdate, RetrieveTask, TaskFilter, TaskProgress};
use retrieve_tasks::dispatch::{DispatchTask, RetrieveDispatcher};
use retrieve_tasks::export::{ExportOptions, csv, json};
use retrieve_tasks::utils::now_millis;
use retrieve_tasks::{QueueMessageId, QueueStatus, project};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn due_lookup_is_scoped_to_device() {
    let (db, _dir) = open_database().await;

    let mut task = study_retrieve("DEV1");
    task.scheduled_time = Some(now_millis() - Duration::seconds(1));
    let created = db.insert_retrieve_task(&task).await.unwrap();

    assert_eq!(
        db.find_scheduled_by_device_name("DEV1").await.unwrap(),
        vec![created.pk]
    );
    assert!(
        !db.find_scheduled_by_device_name("DEV2")
            .await
            .unwrap()
            .contains(&created.pk)
    );
}

#[tokio::test]
async fn new_task_projects_to_schedule() {
    let (db, _dir) = open_database().await;
    let created = db.insert_retrieve_task(&study_retrieve("DEV1")).await.unwrap();

    assert_eq!(created.remaining, -1);
    assert_eq!(
        (created.completed, created.failed, created.warning),
        (0, 0, 0)
    );
    assert_eq!(created.status_code, -1);
    assert_eq!(created.created_time(), created.updated_time());
    assert_eq!(project(&created, None).status, QueueStatus::ToSchedule);
}

#[tokio::test]
async fn in_process_progress_is_exported() {
    let (db, _dir) = open_database().await;
    let created = db.insert_retrieve_task(&study_retrieve("DEV1")).await.unwrap();
    let message = db
        .claim_retrieve_task(created.pk, &queue_message("ID:b"))
        .await
        .unwrap()
        .unwrap();
    db.update_queue_message(
        message.pk,
        &QueueMessageUpdate {
            status: QueueStatus::InProcess,
            num_failures: 0,
            processing_start_time: Some(now_millis()),
            processing_end_time: None,
            error_message: None,
            outcome_message: None,
        },
    )
    .await
    .unwrap();

    let rows = db
        .update_by_queue_message(message.pk, &progress(5, 2, 0, 0))
        .await
        .unwrap();
    assert_eq!(rows, 1);

    let (task, message) = db
        .get_retrieve_task_with_message(created.pk)
        .await
        .unwrap()
        .unwrap();
    let value = json::to_json(&task, message.as_ref(), &ExportOptions::default());

    assert_eq!(value["completed"], 2);
    assert_eq!(value["status"], "IN_PROCESS");
    assert!(value.get("statusCode").is_none());
    assert!(value.get("errorComment").is_none());
}

#[tokio::test]
async fn failed_status_code_is_hex_in_both_exports() {
    let (db, _dir) = open_database().await;
    let created = db.insert_retrieve_task(&study_retrieve("DEV1")).await.unwrap();
    let message = db
        .claim_retrieve_task(created.pk, &queue_message("ID:c"))
        .await
        .unwrap()
        .unwrap();

    db.update_by_queue_message(
        message.pk,
        &TaskProgress {
            status_code: 0xA701,
            error_comment: Some("Refused: Out of Resources".into()),
            ..progress(0, 0, 3, 0)
        },
    )
    .await
    .unwrap();
    db.update_queue_message(
        message.pk,
        &QueueMessageUpdate {
            status: QueueStatus::Failed,
            num_failures: 1,
            processing_start_time: Some(now_millis()),
            processing_end_time: Some(now_millis()),
            error_message: Some("C-MOVE failed".into()),
            outcome_message: None,
        },
    )
    .await
    .unwrap();

    let (task, message) = db
        .get_retrieve_task_with_message(created.pk)
        .await
        .unwrap()
        .unwrap();
    let options = ExportOptions::default();

    let value = json::to_json(&task, message.as_ref(), &options);
    assert_eq!(value["statusCode"], "A701");
    assert_eq!(value["status"], "FAILED");

    let row = csv::to_csv_row(&task, message.as_ref(), &options);
    let status_code = csv::HEADER.iter().position(|c| *c == "statusCode").unwrap();
    assert_eq!(row[status_code], "A701");
}

#[tokio::test]
async fn update_for_unknown_message_touches_nothing() {
    let (db, _dir) = open_database().await;
    let created = db.insert_retrieve_task(&study_retrieve("DEV1")).await.unwrap();

    let rows = db
        .update_by_queue_message(QueueMessageId(424_242), &progress(1, 1, 0, 0))
        .await
        .unwrap();
    assert_eq!(rows, 0);

    let stored = db.get_retrieve_task(created.pk).await.unwrap().unwrap();
    assert_eq!(stored, created);
}

#[tokio::test]
async fn counters_are_monotonic_across_updates() {
    let (db, _dir) = open_database().await;
    let created = db.insert_retrieve_task(&study_retrieve("DEV1")).await.unwrap();
    let message = db
        .claim_retrieve_task(created.pk, &queue_message("ID:mono"))
        .await
        .unwrap()
        .unwrap();

    let reports = [
        progress(10, 0, 0, 0),
        progress(8, 2, 0, 0),
        progress(5, 4, 1, 0),
        progress(6, 3, 0, 0), // late, out-of-order report
        progress(0, 8, 1, 1),
    ];

    let mut last = (0, 0, 0);
    for report in &reports {
        db.update_by_queue_message(message.pk, report).await.unwrap();
        let stored = db.get_retrieve_task(created.pk).await.unwrap().unwrap();
        let now = (stored.completed, stored.failed, stored.warning);
        assert!(now.0 >= last.0 && now.1 >= last.1 && now.2 >= last.2);
        last = now;
    }
    assert_eq!(last, (8, 1, 1));
}

#[derive(Default)]
struct Collecting {
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl RetrieveDispatcher for Collecting {
    async fn dispatch(
        &self,
        _task: &RetrieveTask,
        message: &QueueMessage,
    ) -> retrieve_tasks::Result<()> {
        self.messages.lock().unwrap().push(message.message_id.clone());
        Ok(())
    }
}

#[tokio::test]
async fn dispatch_then_complete_then_export() {
    let (db, _dir) = open_database().await;
    let db = Arc::new(db);
    for _ in 0..3 {
        db.insert_retrieve_task(&study_retrieve("DEV1")).await.unwrap();
    }
    db.insert_retrieve_task(&study_retrieve("DEV2")).await.unwrap();

    let collecting = Arc::new(Collecting::default());
    let config = DispatchConfig {
        device_name: "DEV1".to_string(),
        ..Default::default()
    };
    let dispatch = DispatchTask::new(
        db.clone(),
        collecting.clone(),
        config,
        CancellationToken::new(),
    );

    let report = dispatch.run_once().await.unwrap();
    assert_eq!((report.due, report.claimed, report.lost), (3, 3, 0));

    // Workers report each message as completed
    let message_ids = collecting.messages.lock().unwrap().clone();
    for message_id in &message_ids {
        let message = db
            .get_queue_message_by_message_id(message_id)
            .await
            .unwrap()
            .unwrap();
        db.update_by_queue_message(
            message.pk,
            &TaskProgress {
                status_code: 0,
                ..progress(0, 5, 0, 0)
            },
        )
        .await
        .unwrap();
        db.update_queue_message(
            message.pk,
            &QueueMessageUpdate {
                status: QueueStatus::Completed,
                num_failures: 0,
                processing_start_time: Some(now_millis()),
                processing_end_time: Some(now_millis()),
                error_message: None,
                outcome_message: Some("5 instances retrieved".into()),
            },
        )
        .await
        .unwrap();
    }

    let completed = TaskFilter {
        status: Some(QueueStatus::Completed),
        ..Default::default()
    };
    let rows = db.list_retrieve_tasks(&completed).await.unwrap();
    assert_eq!(rows.len(), 3);

    let options = ExportOptions::default();
    let mut out = Vec::new();
    csv::write_header(&mut out).unwrap();
    for (task, message) in &rows {
        csv::write_record(&mut out, task, message.as_ref(), &options).unwrap();
    }
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.split_terminator("\r\n").collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[1..].iter().all(|line| line.contains(",0000,")));
    assert!(lines[1..].iter().all(|line| line.contains(",COMPLETED,")));

    let mut out = Vec::new();
    json::write_json(
        &mut out,
        rows.iter().map(|(task, message)| (task, message.as_ref())),
        &options,
    )
    .unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let items = parsed.as_array().unwrap();
    assert_eq!(items.len(), 3);
    for item in items {
        assert_eq!(item["statusCode"], "0000");
        assert_eq!(item["completed"], 5);
        assert!(item.get("remaining").is_none(), "remaining 0 is omitted");
        assert_eq!(item["outcomeMessage"], "5 instances retrieved");
    }

    // The other device's task is still waiting
    let waiting = TaskFilter {
        status: Some(QueueStatus::ToSchedule),
        ..Default::default()
    };
    let rows = db.list_retrieve_tasks(&waiting).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0.device_name, "DEV2");
}
