//! Retrieve task CRUD, due-task lookup and progress updates.

use crate::error::{DatabaseError, query_failed};
use crate::types::{QueueMessageId, QueueStatus, REMAINING_UNKNOWN, STATUS_CODE_PENDING, TaskId};
use crate::utils::{now_millis, to_millis};
use crate::{Error, Result};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::{
    Database, NewRetrieveTask, QueueMessage, RetrieveTask, RetrieveTaskRow, TaskFilter,
    TaskProgress, TaskWithMessageRow,
};

const TASK_COLUMNS: &str = r#"
    pk, device_name, queue_name, created_time, updated_time, scheduled_time,
    local_aet, remote_aet, destination_aet, study_iuid, series_iuid, sop_iuid,
    batch_id, remaining, completed, failed, warning, status_code, error_comment,
    queue_msg_fk
"#;

const TASK_WITH_MESSAGE_SELECT: &str = r#"
    SELECT
        t.pk, t.device_name, t.queue_name, t.created_time, t.updated_time,
        t.scheduled_time, t.local_aet, t.remote_aet, t.destination_aet,
        t.study_iuid, t.series_iuid, t.sop_iuid, t.batch_id, t.remaining,
        t.completed, t.failed, t.warning, t.status_code, t.error_comment,
        t.queue_msg_fk,
        m.pk AS m_pk, m.message_id AS m_message_id, m.queue_name AS m_queue_name,
        m.status AS m_status, m.num_failures AS m_num_failures,
        m.processing_start_time AS m_processing_start_time,
        m.processing_end_time AS m_processing_end_time,
        m.error_message AS m_error_message, m.outcome_message AS m_outcome_message,
        m.created_time AS m_created_time, m.updated_time AS m_updated_time
    FROM retrieve_task t
    LEFT JOIN queue_msg m ON m.pk = t.queue_msg_fk
"#;

/// Rows per `IN (...)` list when purging, well below SQLite's variable limit
const PURGE_CHUNK: usize = 500;

impl Database {
    /// Insert a new retrieve task
    ///
    /// Required identifying fields are checked first; a validation failure
    /// writes nothing. The returned record carries the stamped timestamps
    /// (`created_time == updated_time`) and the sentinel counters.
    pub async fn insert_retrieve_task(&self, task: &NewRetrieveTask) -> Result<RetrieveTask> {
        validate_new_task(task)?;
        let now = now_millis();

        let result = sqlx::query(
            r#"
            INSERT INTO retrieve_task (
                device_name, queue_name, created_time, updated_time, scheduled_time,
                local_aet, remote_aet, destination_aet, study_iuid, series_iuid,
                sop_iuid, batch_id, remaining, completed, failed, warning, status_code
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, 0, ?)
            "#,
        )
        .bind(&task.device_name)
        .bind(&task.queue_name)
        .bind(to_millis(now))
        .bind(to_millis(now))
        .bind(task.scheduled_time.map(to_millis))
        .bind(&task.local_aet)
        .bind(&task.remote_aet)
        .bind(&task.destination_aet)
        .bind(&task.study_iuid)
        .bind(&task.series_iuid)
        .bind(&task.sop_iuid)
        .bind(&task.batch_id)
        .bind(REMAINING_UNKNOWN)
        .bind(STATUS_CODE_PENDING)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to insert retrieve task", e))?;

        let record = RetrieveTask::create(TaskId(result.last_insert_rowid()), task, now);
        tracing::debug!(task = %record, device = %record.device_name, "Created retrieve task");
        Ok(record)
    }

    /// Get a retrieve task by ID
    pub async fn get_retrieve_task(&self, id: TaskId) -> Result<Option<RetrieveTask>> {
        let row = sqlx::query_as::<_, RetrieveTaskRow>(&format!(
            "SELECT {} FROM retrieve_task WHERE pk = ?",
            TASK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to get retrieve task", e))?;

        Ok(row.map(RetrieveTask::from))
    }

    /// Get a retrieve task together with its queue message, if one is attached
    pub async fn get_retrieve_task_with_message(
        &self,
        id: TaskId,
    ) -> Result<Option<(RetrieveTask, Option<QueueMessage>)>> {
        let row = sqlx::query_as::<_, TaskWithMessageRow>(&format!(
            "{} WHERE t.pk = ?",
            TASK_WITH_MESSAGE_SELECT
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to get retrieve task", e))?;

        Ok(row.map(Into::into))
    }

    /// Keys of the device's tasks that are due and not yet claimed
    ///
    /// A task is due when its scheduled time is unset or in the past and no
    /// queue message is attached. This is a plain snapshot read: it does not
    /// claim anything, so two schedulers may see the same keys. Only
    /// [`Database::claim_retrieve_task`] decides who dispatches a task.
    pub async fn find_scheduled_by_device_name(&self, device_name: &str) -> Result<Vec<TaskId>> {
        let now = to_millis(now_millis());

        let ids = sqlx::query_scalar::<_, TaskId>(
            r#"
            SELECT pk FROM retrieve_task
            WHERE device_name = ?
              AND (scheduled_time IS NULL OR scheduled_time < ?)
              AND queue_msg_fk IS NULL
            ORDER BY pk
            "#,
        )
        .bind(device_name)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to find scheduled retrieve tasks", e))?;

        Ok(ids)
    }

    /// Push worker progress onto the task that references `message`
    ///
    /// Writes the counters, status code and error comment plus
    /// `updated_time` in one statement. `completed`, `failed` and `warning`
    /// never decrease, and `remaining` must be a real count: the `-1`
    /// sentinel only ever comes from creation or a reschedule. Returns the
    /// number of rows written:
    /// - `1` when the values were applied
    /// - `0` when no task references `message` (deleted or rescheduled
    ///   concurrently), or when the persisted values already match, so a
    ///   retried update does not refresh `updated_time` a second time
    pub async fn update_by_queue_message(
        &self,
        message: QueueMessageId,
        progress: &TaskProgress,
    ) -> Result<u64> {
        validate_progress(progress)?;
        let now = to_millis(now_millis());

        let result = sqlx::query(
            r#"
            UPDATE retrieve_task SET
                updated_time = MAX(created_time, ?),
                remaining = ?,
                completed = MAX(completed, ?),
                failed = MAX(failed, ?),
                warning = MAX(warning, ?),
                status_code = ?,
                error_comment = ?
            WHERE queue_msg_fk = ?
              AND (remaining IS NOT ?
                   OR completed < ?
                   OR failed < ?
                   OR warning < ?
                   OR status_code IS NOT ?
                   OR error_comment IS NOT ?)
            "#,
        )
        .bind(now)
        .bind(progress.remaining)
        .bind(progress.completed)
        .bind(progress.failed)
        .bind(progress.warning)
        .bind(progress.status_code)
        .bind(&progress.error_comment)
        .bind(message)
        .bind(progress.remaining)
        .bind(progress.completed)
        .bind(progress.failed)
        .bind(progress.warning)
        .bind(progress.status_code)
        .bind(&progress.error_comment)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to update retrieve task by queue message", e))?;

        let rows = result.rows_affected();
        tracing::debug!(
            queue_message = %message,
            rows,
            remaining = progress.remaining,
            completed = progress.completed,
            failed = progress.failed,
            warning = progress.warning,
            "Updated retrieve task progress"
        );
        Ok(rows)
    }

    /// Same as [`Database::update_by_queue_message`], keyed by broker message id
    pub async fn update_by_message_id(
        &self,
        message_id: &str,
        progress: &TaskProgress,
    ) -> Result<u64> {
        match self.get_queue_message_by_message_id(message_id).await? {
            Some(message) => self.update_by_queue_message(message.pk, progress).await,
            None => Ok(0),
        }
    }

    /// Set (or clear) the scheduled time
    ///
    /// Returns `false` if the task does not exist.
    pub async fn set_scheduled_time(
        &self,
        id: TaskId,
        scheduled_time: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<bool> {
        let now = to_millis(now_millis());

        let result = sqlx::query(
            r#"
            UPDATE retrieve_task
            SET scheduled_time = ?, updated_time = MAX(created_time, ?)
            WHERE pk = ?
            "#,
        )
        .bind(scheduled_time.map(to_millis))
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to set scheduled time", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Return a task to the to-schedule state
    ///
    /// Deletes the attached queue message, resets progress and status to
    /// their sentinels and sets the new scheduled time, in one transaction.
    /// Returns `false` if the task does not exist.
    pub async fn reschedule_retrieve_task(
        &self,
        id: TaskId,
        scheduled_time: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<bool> {
        let now = to_millis(now_millis());
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        delete_attached_message(&mut *tx, id).await?;

        let result = sqlx::query(
            r#"
            UPDATE retrieve_task SET
                scheduled_time = ?,
                updated_time = MAX(created_time, ?),
                remaining = ?,
                completed = 0,
                failed = 0,
                warning = 0,
                status_code = ?,
                error_comment = NULL,
                queue_msg_fk = NULL
            WHERE pk = ?
            "#,
        )
        .bind(scheduled_time.map(to_millis))
        .bind(now)
        .bind(REMAINING_UNKNOWN)
        .bind(STATUS_CODE_PENDING)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| query_failed("Failed to reschedule retrieve task", e))?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit reschedule: {}",
                e
            )))
        })?;

        tracing::info!(task = %id, "Rescheduled retrieve task");
        Ok(true)
    }

    /// Delete a retrieve task and its queue message
    ///
    /// The queue message is deleted first, then the task, in one
    /// transaction. Returns `false` if the task does not exist.
    pub async fn delete_retrieve_task(&self, id: TaskId) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        delete_attached_message(&mut *tx, id).await?;
        let deleted = delete_tasks(&mut *tx, &[id]).await?;

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit delete: {}",
                e
            )))
        })?;

        Ok(deleted > 0)
    }

    /// List tasks matching `filter`, each with its queue message
    pub async fn list_retrieve_tasks(
        &self,
        filter: &TaskFilter,
    ) -> Result<Vec<(RetrieveTask, Option<QueueMessage>)>> {
        let mut qb = QueryBuilder::<Sqlite>::new(TASK_WITH_MESSAGE_SELECT);
        qb.push(" WHERE 1=1");
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY t.pk");
        if filter.limit.is_some() || filter.offset.is_some() {
            qb.push(" LIMIT ").push_bind(filter.limit.unwrap_or(-1));
            qb.push(" OFFSET ").push_bind(filter.offset.unwrap_or(0).max(0));
        }

        let rows = qb
            .build_query_as::<TaskWithMessageRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to list retrieve tasks", e))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Count tasks matching `filter` (limit/offset are ignored)
    pub async fn count_retrieve_tasks(&self, filter: &TaskFilter) -> Result<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) FROM retrieve_task t LEFT JOIN queue_msg m ON m.pk = t.queue_msg_fk WHERE 1=1",
        );
        push_filter(&mut qb, filter);

        let count: i64 = qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to count retrieve tasks", e))?;

        Ok(count as u64)
    }

    /// Purge all tasks matching `filter`, together with their queue messages
    ///
    /// Returns the number of tasks deleted.
    pub async fn delete_retrieve_tasks(&self, filter: &TaskFilter) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        // Tasks go first: the status filter joins the messages
        let mut qb = QueryBuilder::<Sqlite>::new(
            "DELETE FROM retrieve_task WHERE pk IN (SELECT t.pk FROM retrieve_task t LEFT JOIN queue_msg m ON m.pk = t.queue_msg_fk WHERE 1=1",
        );
        push_filter(&mut qb, filter);
        qb.push(") RETURNING queue_msg_fk");
        let detached: Vec<Option<QueueMessageId>> = qb
            .build_query_scalar()
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| query_failed("Failed to delete retrieve tasks", e))?;

        let deleted = detached.len() as u64;
        let message_ids: Vec<QueueMessageId> = detached.into_iter().flatten().collect();
        delete_queue_messages(&mut *tx, &message_ids).await?;

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit purge: {}",
                e
            )))
        })?;

        tracing::info!(deleted, "Purged retrieve tasks");
        Ok(deleted)
    }
}

/// Delete the queue message attached to task `id`, if any
///
/// Issued as the first statement of a transaction, this takes the SQLite
/// write lock before anything is read, so a concurrent commit elsewhere
/// makes it wait on the busy timeout instead of failing the snapshot.
async fn delete_attached_message(conn: &mut SqliteConnection, id: TaskId) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM queue_msg WHERE pk = (SELECT queue_msg_fk FROM retrieve_task WHERE pk = ?)",
    )
    .bind(id)
    .execute(&mut *conn)
    .await
    .map_err(|e| query_failed("Failed to delete queue message of retrieve task", e))?;
    Ok(result.rows_affected())
}

async fn delete_queue_messages(
    conn: &mut SqliteConnection,
    ids: &[QueueMessageId],
) -> Result<u64> {
    let mut deleted = 0;
    for chunk in ids.chunks(PURGE_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM queue_msg WHERE pk IN (");
        let mut separated = qb.separated(", ");
        for id in chunk {
            separated.push_bind(*id);
        }
        qb.push(")");
        deleted += qb
            .build()
            .execute(&mut *conn)
            .await
            .map_err(|e| query_failed("Failed to delete queue messages", e))?
            .rows_affected();
    }
    Ok(deleted)
}

async fn delete_tasks(conn: &mut SqliteConnection, ids: &[TaskId]) -> Result<u64> {
    let mut deleted = 0;
    for chunk in ids.chunks(PURGE_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM retrieve_task WHERE pk IN (");
        let mut separated = qb.separated(", ");
        for id in chunk {
            separated.push_bind(*id);
        }
        qb.push(")");
        deleted += qb
            .build()
            .execute(&mut *conn)
            .await
            .map_err(|e| query_failed("Failed to delete retrieve tasks", e))?
            .rows_affected();
    }
    Ok(deleted)
}

/// Append `AND` clauses for every populated filter field
///
/// Expects the query to alias `retrieve_task` as `t` and `queue_msg` as `m`.
fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &TaskFilter) {
    let text_columns = [
        ("t.device_name", &filter.device_name),
        ("t.queue_name", &filter.queue_name),
        ("t.local_aet", &filter.local_aet),
        ("t.remote_aet", &filter.remote_aet),
        ("t.destination_aet", &filter.destination_aet),
        ("t.study_iuid", &filter.study_iuid),
        ("t.batch_id", &filter.batch_id),
    ];
    for (column, value) in text_columns {
        if let Some(value) = value {
            qb.push(format!(" AND {} = ", column))
                .push_bind(value.clone());
        }
    }

    match filter.status {
        Some(QueueStatus::ToSchedule) => {
            qb.push(" AND t.queue_msg_fk IS NULL");
        }
        Some(status) => {
            qb.push(" AND m.status = ").push_bind(status.to_i32());
        }
        None => {}
    }

    let time_bounds = [
        ("t.created_time >= ", filter.created_after),
        ("t.created_time < ", filter.created_before),
        ("t.updated_time >= ", filter.updated_after),
        ("t.updated_time < ", filter.updated_before),
    ];
    for (clause, bound) in time_bounds {
        if let Some(bound) = bound {
            qb.push(format!(" AND {}", clause)).push_bind(to_millis(bound));
        }
    }
}

fn validate_new_task(task: &NewRetrieveTask) -> Result<()> {
    let required = [
        ("device_name", &task.device_name),
        ("queue_name", &task.queue_name),
        ("local_aet", &task.local_aet),
        ("remote_aet", &task.remote_aet),
        ("destination_aet", &task.destination_aet),
        ("study_iuid", &task.study_iuid),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(Error::validation(field, "must not be empty"));
        }
    }
    Ok(())
}

fn validate_progress(progress: &TaskProgress) -> Result<()> {
    // -1 is reserved for tasks nothing has been reported for
    if progress.remaining < 0 {
        return Err(Error::validation(
            "remaining",
            "must not be negative in a progress report",
        ));
    }
    let counters = [
        ("completed", progress.completed),
        ("failed", progress.failed),
        ("warning", progress.warning),
    ];
    for (field, value) in counters {
        if value < 0 {
            return Err(Error::validation(field, "must not be negative"));
        }
    }
    if !(STATUS_CODE_PENDING..=0xFFFF).contains(&progress.status_code) {
        return Err(Error::validation(
            "status_code",
            "must be -1 or a 16-bit value",
        ));
    }
    Ok(())
}
