//! Combined status view of a retrieve task and its queue message.

use crate::db::{QueueMessage, RetrieveTask};
use crate::types::QueueStatus;
use chrono::{DateTime, Utc};

/// Externally visible status of one task
///
/// All queue-derived fields are `None` while the task is unclaimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusView {
    /// `ToSchedule` without a queue message, otherwise the message status
    pub status: QueueStatus,
    /// Broker message id
    pub message_id: Option<String>,
    /// Only set when the message recorded at least one failure
    pub failure_count: Option<i32>,
    /// Processing start
    pub processing_start: Option<DateTime<Utc>>,
    /// Processing end
    pub processing_end: Option<DateTime<Utc>>,
    /// Error message
    pub error_message: Option<String>,
    /// Outcome message
    pub outcome_message: Option<String>,
}

impl StatusView {
    /// View of a task that has not been dispatched yet
    pub fn to_schedule() -> Self {
        Self {
            status: QueueStatus::ToSchedule,
            message_id: None,
            failure_count: None,
            processing_start: None,
            processing_end: None,
            error_message: None,
            outcome_message: None,
        }
    }
}

/// Project a task and its optional queue message onto one status view
///
/// The task itself only matters through its association: a message passed
/// in for a task is taken to be the attached one.
pub fn project(_task: &RetrieveTask, message: Option<&QueueMessage>) -> StatusView {
    let Some(message) = message else {
        return StatusView::to_schedule();
    };

    StatusView {
        status: message.status,
        message_id: Some(message.message_id.clone()),
        failure_count: (message.num_failures > 0).then_some(message.num_failures),
        processing_start: message.processing_start_time,
        processing_end: message.processing_end_time,
        error_message: message.error_message.clone(),
        outcome_message: message.outcome_message.clone(),
    }
}
