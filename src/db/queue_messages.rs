//! Queue message records: the claim step and the messaging subsystem's status writes.

use crate::error::{DatabaseError, query_failed};
use crate::types::{QueueMessageId, QueueStatus, TERMINAL_STATUS_CODES, TaskId};
use crate::utils::{now_millis, to_millis};
use crate::{Error, Result};

use super::{Database, NewQueueMessage, QueueMessage, QueueMessageRow, QueueMessageUpdate};

const MESSAGE_COLUMNS: &str = r#"
    pk, message_id, queue_name, status, num_failures, processing_start_time,
    processing_end_time, error_message, outcome_message, created_time, updated_time
"#;

impl Database {
    /// Claim a due task by attaching a freshly created queue message
    ///
    /// The message insert and the attach happen in one transaction, and the
    /// attach only succeeds while the task has no message yet. Returns
    /// `None` when another dispatcher claimed the task first (or the task is
    /// gone); nothing is written in that case.
    pub async fn claim_retrieve_task(
        &self,
        task: TaskId,
        message: &NewQueueMessage,
    ) -> Result<Option<QueueMessage>> {
        if message.message_id.trim().is_empty() {
            return Err(Error::validation("message_id", "must not be empty"));
        }
        if message.queue_name.trim().is_empty() {
            return Err(Error::validation("queue_name", "must not be empty"));
        }

        let now = now_millis();
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO queue_msg (
                message_id, queue_name, status, num_failures, created_time, updated_time
            ) VALUES (?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&message.message_id)
        .bind(&message.queue_name)
        .bind(QueueStatus::Scheduled.to_i32())
        .bind(to_millis(now))
        .bind(to_millis(now))
        .execute(&mut *tx)
        .await
        .map_err(|e| query_failed("Failed to insert queue message", e))?;
        let pk = QueueMessageId(inserted.last_insert_rowid());

        let attached = sqlx::query(
            r#"
            UPDATE retrieve_task
            SET queue_msg_fk = ?, updated_time = MAX(created_time, ?)
            WHERE pk = ? AND queue_msg_fk IS NULL
            "#,
        )
        .bind(pk)
        .bind(to_millis(now))
        .bind(task)
        .execute(&mut *tx)
        .await
        .map_err(|e| query_failed("Failed to attach queue message", e))?;

        if attached.rows_affected() == 0 {
            tx.rollback().await.map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to roll back lost claim: {}",
                    e
                )))
            })?;
            tracing::debug!(task = %task, "Retrieve task already claimed");
            return Ok(None);
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit claim: {}",
                e
            )))
        })?;

        tracing::debug!(
            task = %task,
            message_id = %message.message_id,
            "Claimed retrieve task"
        );

        Ok(Some(QueueMessage {
            pk,
            message_id: message.message_id.clone(),
            queue_name: message.queue_name.clone(),
            status: QueueStatus::Scheduled,
            num_failures: 0,
            processing_start_time: None,
            processing_end_time: None,
            error_message: None,
            outcome_message: None,
            created_time: now,
            updated_time: now,
        }))
    }

    /// Get a queue message by ID
    pub async fn get_queue_message(&self, id: QueueMessageId) -> Result<Option<QueueMessage>> {
        let row = sqlx::query_as::<_, QueueMessageRow>(&format!(
            "SELECT {} FROM queue_msg WHERE pk = ?",
            MESSAGE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to get queue message", e))?;

        Ok(row.map(QueueMessage::from))
    }

    /// Get a queue message by its broker message id
    pub async fn get_queue_message_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<QueueMessage>> {
        let row = sqlx::query_as::<_, QueueMessageRow>(&format!(
            "SELECT {} FROM queue_msg WHERE message_id = ?",
            MESSAGE_COLUMNS
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to get queue message by message id", e))?;

        Ok(row.map(QueueMessage::from))
    }

    /// Record a processing status reported by the messaging subsystem
    ///
    /// Once a message holds a terminal status it is never rewritten: the
    /// update then affects 0 rows, as it does for an unknown message.
    pub async fn update_queue_message(
        &self,
        id: QueueMessageId,
        update: &QueueMessageUpdate,
    ) -> Result<u64> {
        if update.status == QueueStatus::ToSchedule {
            return Err(Error::validation(
                "status",
                "TO_SCHEDULE is not a queue message status",
            ));
        }
        if update.num_failures < 0 {
            return Err(Error::validation("num_failures", "must not be negative"));
        }

        let terminal = TERMINAL_STATUS_CODES
            .iter()
            .map(i32::to_string)
            .collect::<Vec<_>>()
            .join(", ");

        let result = sqlx::query(&format!(
            r#"
            UPDATE queue_msg SET
                status = ?,
                num_failures = ?,
                processing_start_time = ?,
                processing_end_time = ?,
                error_message = ?,
                outcome_message = ?,
                updated_time = MAX(created_time, ?)
            WHERE pk = ? AND status NOT IN ({})
            "#,
            terminal
        ))
        .bind(update.status.to_i32())
        .bind(update.num_failures)
        .bind(update.processing_start_time.map(to_millis))
        .bind(update.processing_end_time.map(to_millis))
        .bind(&update.error_message)
        .bind(&update.outcome_message)
        .bind(to_millis(now_millis()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to update queue message", e))?;

        let rows = result.rows_affected();
        if rows == 0 {
            tracing::debug!(
                queue_message = %id,
                status = %update.status,
                "Queue message missing or already terminal, status not written"
            );
        }
        Ok(rows)
    }
}
