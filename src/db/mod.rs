//! Database layer for retrieve-tasks
//!
//! Handles SQLite persistence for retrieve task records and the queue
//! messages attached to them.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`retrieve_tasks`]: Task records: create, due lookup, progress updates, purge
//! - [`queue_messages`]: Claim step and the messaging subsystem's status writes

use crate::types::{QueueMessageId, QueueStatus, REMAINING_UNKNOWN, STATUS_CODE_PENDING, TaskId};
use crate::utils::from_millis;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod queue_messages;
mod retrieve_tasks;

/// New retrieve task to be inserted into the database
#[derive(Debug, Clone, Default)]
pub struct NewRetrieveTask {
    /// Device that owns and schedules this task
    pub device_name: String,
    /// Queue the work is submitted to
    pub queue_name: String,
    /// Calling AE title
    pub local_aet: String,
    /// AE title of the remote source
    pub remote_aet: String,
    /// AE title of the move destination
    pub destination_aet: String,
    /// Study Instance UID to retrieve
    pub study_iuid: String,
    /// Optional Series Instance UID narrowing the scope
    pub series_iuid: Option<String>,
    /// Optional SOP Instance UID narrowing the scope
    pub sop_iuid: Option<String>,
    /// Groups related tasks
    pub batch_id: Option<String>,
    /// Earliest dispatch time (None = eligible immediately)
    pub scheduled_time: Option<DateTime<Utc>>,
}

/// Retrieve task record
#[derive(Debug, Clone, PartialEq)]
pub struct RetrieveTask {
    /// Surrogate key
    pub pk: TaskId,
    /// Device that owns and schedules this task
    pub device_name: String,
    /// Queue the work is submitted to
    pub queue_name: String,
    created_time: DateTime<Utc>,
    updated_time: DateTime<Utc>,
    /// Earliest dispatch time
    pub scheduled_time: Option<DateTime<Utc>>,
    /// Calling AE title
    pub local_aet: String,
    /// AE title of the remote source
    pub remote_aet: String,
    /// AE title of the move destination
    pub destination_aet: String,
    /// Study Instance UID
    pub study_iuid: String,
    /// Series Instance UID
    pub series_iuid: Option<String>,
    /// SOP Instance UID
    pub sop_iuid: Option<String>,
    /// Batch identifier
    pub batch_id: Option<String>,
    /// Remaining sub-operations (-1 until the first progress report)
    pub remaining: i32,
    /// Completed sub-operations
    pub completed: i32,
    /// Failed sub-operations
    pub failed: i32,
    /// Sub-operations completed with warnings
    pub warning: i32,
    /// Final 16-bit protocol status (-1 until terminal)
    pub status_code: i32,
    /// Error comment reported with the status
    pub error_comment: Option<String>,
    /// Attached queue message, once claimed
    pub queue_message: Option<QueueMessageId>,
}

impl RetrieveTask {
    /// Build the record a fresh insert produces: both timestamps set to
    /// `now`, counters and status code at their sentinels, no queue message.
    pub fn create(pk: TaskId, new: &NewRetrieveTask, now: DateTime<Utc>) -> Self {
        Self {
            pk,
            device_name: new.device_name.clone(),
            queue_name: new.queue_name.clone(),
            created_time: now,
            updated_time: now,
            scheduled_time: new.scheduled_time,
            local_aet: new.local_aet.clone(),
            remote_aet: new.remote_aet.clone(),
            destination_aet: new.destination_aet.clone(),
            study_iuid: new.study_iuid.clone(),
            series_iuid: new.series_iuid.clone(),
            sop_iuid: new.sop_iuid.clone(),
            batch_id: new.batch_id.clone(),
            remaining: REMAINING_UNKNOWN,
            completed: 0,
            failed: 0,
            warning: 0,
            status_code: STATUS_CODE_PENDING,
            error_comment: None,
            queue_message: None,
        }
    }

    /// Set once at creation
    pub fn created_time(&self) -> DateTime<Utc> {
        self.created_time
    }

    /// Refreshed on every mutation
    pub fn updated_time(&self) -> DateTime<Utc> {
        self.updated_time
    }

    /// Record a mutation at `now`
    ///
    /// `updated_time` never moves before `created_time`. The store applies
    /// the same rule in SQL (`MAX(created_time, now)`) on every write.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_time = now.max(self.created_time);
    }

    /// Whether any progress has been reported yet
    pub fn has_progress(&self) -> bool {
        self.remaining != REMAINING_UNKNOWN
    }

    /// Whether a terminal protocol status has been recorded
    pub fn is_terminal(&self) -> bool {
        self.status_code != STATUS_CODE_PENDING
    }
}

impl std::fmt::Display for RetrieveTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RetrieveTask[pk={}, RetrieveAET={}, DestinationAET={}]",
            self.pk, self.remote_aet, self.destination_aet
        )
    }
}

/// Retrieve task record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct RetrieveTaskRow {
    /// Surrogate key
    pub pk: TaskId,
    /// Owning device
    pub device_name: String,
    /// Queue name
    pub queue_name: String,
    /// Creation time, epoch millis
    pub created_time: i64,
    /// Last update time, epoch millis
    pub updated_time: i64,
    /// Scheduled time, epoch millis
    pub scheduled_time: Option<i64>,
    /// Calling AE title
    pub local_aet: String,
    /// Remote AE title
    pub remote_aet: String,
    /// Destination AE title
    pub destination_aet: String,
    /// Study Instance UID
    pub study_iuid: String,
    /// Series Instance UID
    pub series_iuid: Option<String>,
    /// SOP Instance UID
    pub sop_iuid: Option<String>,
    /// Batch identifier
    pub batch_id: Option<String>,
    /// Remaining sub-operations
    pub remaining: i32,
    /// Completed sub-operations
    pub completed: i32,
    /// Failed sub-operations
    pub failed: i32,
    /// Warning sub-operations
    pub warning: i32,
    /// Protocol status code
    pub status_code: i32,
    /// Error comment
    pub error_comment: Option<String>,
    /// Attached queue message
    pub queue_msg_fk: Option<QueueMessageId>,
}

impl From<RetrieveTaskRow> for RetrieveTask {
    fn from(row: RetrieveTaskRow) -> Self {
        RetrieveTask {
            pk: row.pk,
            device_name: row.device_name,
            queue_name: row.queue_name,
            created_time: from_millis(row.created_time),
            updated_time: from_millis(row.updated_time),
            scheduled_time: row.scheduled_time.map(from_millis),
            local_aet: row.local_aet,
            remote_aet: row.remote_aet,
            destination_aet: row.destination_aet,
            study_iuid: row.study_iuid,
            series_iuid: row.series_iuid,
            sop_iuid: row.sop_iuid,
            batch_id: row.batch_id,
            remaining: row.remaining,
            completed: row.completed,
            failed: row.failed,
            warning: row.warning,
            status_code: row.status_code,
            error_comment: row.error_comment,
            queue_message: row.queue_msg_fk,
        }
    }
}

/// Progress and result values pushed by a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskProgress {
    /// Remaining sub-operations (-1 = unknown)
    pub remaining: i32,
    /// Completed sub-operations
    pub completed: i32,
    /// Failed sub-operations
    pub failed: i32,
    /// Sub-operations completed with warnings
    pub warning: i32,
    /// Protocol status code (-1 = not terminal)
    pub status_code: i32,
    /// Optional error comment
    pub error_comment: Option<String>,
}

/// New queue message created by the claim step
#[derive(Debug, Clone)]
pub struct NewQueueMessage {
    /// Broker message identifier (unique)
    pub message_id: String,
    /// Queue the message was sent to
    pub queue_name: String,
}

/// Queue message record, written by the messaging subsystem
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    /// Surrogate key
    pub pk: QueueMessageId,
    /// Broker message identifier
    pub message_id: String,
    /// Queue the message was sent to
    pub queue_name: String,
    /// Processing status
    pub status: QueueStatus,
    /// Number of failed delivery attempts
    pub num_failures: i32,
    /// When a worker started processing
    pub processing_start_time: Option<DateTime<Utc>>,
    /// When a worker finished processing
    pub processing_end_time: Option<DateTime<Utc>>,
    /// Last error reported by the worker
    pub error_message: Option<String>,
    /// Outcome summary reported by the worker
    pub outcome_message: Option<String>,
    /// Set once at creation
    pub created_time: DateTime<Utc>,
    /// Refreshed on every status write
    pub updated_time: DateTime<Utc>,
}

/// Queue message record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct QueueMessageRow {
    /// Surrogate key
    pub pk: QueueMessageId,
    /// Broker message identifier
    pub message_id: String,
    /// Queue name
    pub queue_name: String,
    /// Status code (see [`QueueStatus::to_i32`])
    pub status: i32,
    /// Failed delivery attempts
    pub num_failures: i32,
    /// Processing start, epoch millis
    pub processing_start_time: Option<i64>,
    /// Processing end, epoch millis
    pub processing_end_time: Option<i64>,
    /// Error message
    pub error_message: Option<String>,
    /// Outcome message
    pub outcome_message: Option<String>,
    /// Creation time, epoch millis
    pub created_time: i64,
    /// Last update time, epoch millis
    pub updated_time: i64,
}

impl From<QueueMessageRow> for QueueMessage {
    fn from(row: QueueMessageRow) -> Self {
        QueueMessage {
            pk: row.pk,
            message_id: row.message_id,
            queue_name: row.queue_name,
            status: QueueStatus::from_i32(row.status),
            num_failures: row.num_failures,
            processing_start_time: row.processing_start_time.map(from_millis),
            processing_end_time: row.processing_end_time.map(from_millis),
            error_message: row.error_message,
            outcome_message: row.outcome_message,
            created_time: from_millis(row.created_time),
            updated_time: from_millis(row.updated_time),
        }
    }
}

/// Status write from the messaging subsystem; every field is stored verbatim
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessageUpdate {
    /// New status (must not be `ToSchedule`)
    pub status: QueueStatus,
    /// Failed delivery attempts so far
    pub num_failures: i32,
    /// When processing started
    pub processing_start_time: Option<DateTime<Utc>>,
    /// When processing ended
    pub processing_end_time: Option<DateTime<Utc>>,
    /// Error message
    pub error_message: Option<String>,
    /// Outcome message
    pub outcome_message: Option<String>,
}

/// Task joined with its (optional) queue message, as read by `LEFT JOIN`
#[derive(Debug, Clone, FromRow)]
pub(crate) struct TaskWithMessageRow {
    #[sqlx(flatten)]
    pub task: RetrieveTaskRow,
    pub m_pk: Option<QueueMessageId>,
    pub m_message_id: Option<String>,
    pub m_queue_name: Option<String>,
    pub m_status: Option<i32>,
    pub m_num_failures: Option<i32>,
    pub m_processing_start_time: Option<i64>,
    pub m_processing_end_time: Option<i64>,
    pub m_error_message: Option<String>,
    pub m_outcome_message: Option<String>,
    pub m_created_time: Option<i64>,
    pub m_updated_time: Option<i64>,
}

impl From<TaskWithMessageRow> for (RetrieveTask, Option<QueueMessage>) {
    fn from(row: TaskWithMessageRow) -> Self {
        let message = match (row.m_pk, row.m_message_id) {
            (Some(pk), Some(message_id)) => Some(QueueMessage {
                pk,
                message_id,
                queue_name: row.m_queue_name.unwrap_or_default(),
                status: QueueStatus::from_i32(row.m_status.unwrap_or_default()),
                num_failures: row.m_num_failures.unwrap_or_default(),
                processing_start_time: row.m_processing_start_time.map(from_millis),
                processing_end_time: row.m_processing_end_time.map(from_millis),
                error_message: row.m_error_message,
                outcome_message: row.m_outcome_message,
                created_time: from_millis(row.m_created_time.unwrap_or_default()),
                updated_time: from_millis(row.m_updated_time.unwrap_or_default()),
            }),
            _ => None,
        };
        (RetrieveTask::from(row.task), message)
    }
}

/// Ad-hoc monitoring filter over retrieve tasks
///
/// Every populated field narrows the result (`AND`). `status:
/// Some(QueueStatus::ToSchedule)` selects tasks without a queue message.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Owning device
    pub device_name: Option<String>,
    /// Queue name
    pub queue_name: Option<String>,
    /// Calling AE title
    pub local_aet: Option<String>,
    /// Remote AE title
    pub remote_aet: Option<String>,
    /// Destination AE title
    pub destination_aet: Option<String>,
    /// Study Instance UID
    pub study_iuid: Option<String>,
    /// Batch identifier
    pub batch_id: Option<String>,
    /// Projected status
    pub status: Option<QueueStatus>,
    /// Created at or after
    pub created_after: Option<DateTime<Utc>>,
    /// Created strictly before
    pub created_before: Option<DateTime<Utc>>,
    /// Updated at or after
    pub updated_after: Option<DateTime<Utc>>,
    /// Updated strictly before
    pub updated_before: Option<DateTime<Utc>>,
    /// Maximum rows returned by list queries
    pub limit: Option<i64>,
    /// Rows skipped by list queries
    pub offset: Option<i64>,
}

/// Database handle for retrieve-tasks
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
