//! Task exporters
//!
//! Both renderings read the same ordered field mapping ([`task_fields`]), so
//! a JSON object and a CSV row built from the same task and queue message
//! always agree:
//! - [`json`] omits absent fields and integer zeros
//! - [`csv`] keeps every column and leaves absent ones empty

pub mod csv;
pub mod json;

use crate::db::{QueueMessage, RetrieveTask};
use crate::projection::project;
use crate::utils::{format_timestamp, status_code_hex};
use chrono::{DateTime, FixedOffset, Offset, Utc};

/// Canonical field names, in export order
pub const COLUMNS: [&str; 26] = [
    "pk",
    "createdTime",
    "updatedTime",
    "localAET",
    "remoteAET",
    "destinationAET",
    "studyInstanceUID",
    "seriesInstanceUID",
    "sopInstanceUID",
    "remaining",
    "completed",
    "failed",
    "warning",
    "statusCode",
    "errorComment",
    "batchID",
    "deviceName",
    "queueName",
    "scheduledTime",
    "status",
    "messageId",
    "failureCount",
    "processingStart",
    "processingEnd",
    "errorMessage",
    "outcomeMessage",
];

/// Rendering options shared by both exporters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    /// Offset applied to every rendered timestamp
    pub offset: FixedOffset,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }
}

/// One typed export value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    /// Integer field (pk, counters, failure count)
    Int(i64),
    /// Text field
    Text(String),
    /// Timestamp, rendered at [`ExportOptions::offset`]
    Time(DateTime<Utc>),
}

impl Cell {
    /// Text form used by both exporters
    pub fn render(&self, options: &ExportOptions) -> String {
        match self {
            Cell::Int(n) => n.to_string(),
            Cell::Text(s) => s.clone(),
            Cell::Time(t) => format_timestamp(*t, &options.offset),
        }
    }
}

/// Ordered export fields of a task and its queue message
///
/// Positions match [`COLUMNS`]. `None` marks an absent value: an unset
/// optional attribute, the `-1` status code sentinel, a zero failure count,
/// or any queue-derived field of an unclaimed task.
pub fn task_fields(
    task: &RetrieveTask,
    message: Option<&QueueMessage>,
) -> [(&'static str, Option<Cell>); 26] {
    let view = project(task, message);
    let text = |s: &Option<String>| s.clone().map(Cell::Text);
    let time = |t: Option<DateTime<Utc>>| t.map(Cell::Time);

    let values = [
        Some(Cell::Int(task.pk.get())),
        Some(Cell::Time(task.created_time())),
        Some(Cell::Time(task.updated_time())),
        Some(Cell::Text(task.local_aet.clone())),
        Some(Cell::Text(task.remote_aet.clone())),
        Some(Cell::Text(task.destination_aet.clone())),
        Some(Cell::Text(task.study_iuid.clone())),
        text(&task.series_iuid),
        text(&task.sop_iuid),
        Some(Cell::Int(task.remaining.into())),
        Some(Cell::Int(task.completed.into())),
        Some(Cell::Int(task.failed.into())),
        Some(Cell::Int(task.warning.into())),
        status_code_hex(task.status_code).map(Cell::Text),
        text(&task.error_comment),
        text(&task.batch_id),
        Some(Cell::Text(task.device_name.clone())),
        Some(Cell::Text(task.queue_name.clone())),
        time(task.scheduled_time),
        Some(Cell::Text(view.status.as_str().to_string())),
        view.message_id.map(Cell::Text),
        view.failure_count.map(|n| Cell::Int(n.into())),
        time(view.processing_start),
        time(view.processing_end),
        view.error_message.map(Cell::Text),
        view.outcome_message.map(Cell::Text),
    ];

    let mut values = values.into_iter();
    COLUMNS.map(|name| (name, values.next().flatten()))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::db::{NewRetrieveTask, QueueMessage, RetrieveTask};
    use crate::types::{QueueMessageId, QueueStatus, TaskId};
    use crate::utils::from_millis;

    /// 2024-03-01T12:00:00.000Z
    pub const T0: i64 = 1_709_294_400_000;

    pub fn task() -> RetrieveTask {
        let new = NewRetrieveTask {
            device_name: "DEV1".into(),
            queue_name: "Retrieve1".into(),
            local_aet: "ARCHIVE".into(),
            remote_aet: "PACS".into(),
            destination_aet: "VIEWER".into(),
            study_iuid: "1.2.840.113619.2.1".into(),
            batch_id: Some("batch-7".into()),
            ..Default::default()
        };
        RetrieveTask::create(TaskId(12), &new, from_millis(T0))
    }

    pub fn message(status: QueueStatus) -> QueueMessage {
        QueueMessage {
            pk: QueueMessageId(3),
            message_id: "ID:00c0ffee".into(),
            queue_name: "Retrieve1".into(),
            status,
            num_failures: 0,
            processing_start_time: Some(from_millis(T0 + 1_250)),
            processing_end_time: None,
            error_message: None,
            outcome_message: None,
            created_time: from_millis(T0 + 1_000),
            updated_time: from_millis(T0 + 1_250),
        }
    }
}
