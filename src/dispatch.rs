//! Background dispatch of due retrieve tasks
//!
//! [`DispatchTask`] polls the store for tasks of one device that are due and
//! unclaimed, claims each one by attaching a new queue message, and hands the
//! claimed task to a [`RetrieveDispatcher`]. Losing a claim to another
//! dispatcher is expected and only counted.
//!
//! # Example
//!
//! ```no_run
//! use retrieve_tasks::config::DispatchConfig;
//! use retrieve_tasks::db::{Database, QueueMessage, RetrieveTask};
//! use retrieve_tasks::dispatch::{DispatchTask, RetrieveDispatcher};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! struct LogOnly;
//!
//! #[async_trait::async_trait]
//! impl RetrieveDispatcher for LogOnly {
//!     async fn dispatch(
//!         &self,
//!         task: &RetrieveTask,
//!         message: &QueueMessage,
//!     ) -> retrieve_tasks::Result<()> {
//!         println!("{task} -> {}", message.message_id);
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Arc::new(Database::new(std::path::Path::new("retrieve.db")).await?);
//! let cancel = CancellationToken::new();
//! let task = DispatchTask::new(db, Arc::new(LogOnly), DispatchConfig::default(), cancel.clone());
//!
//! let handle = tokio::spawn(task.run());
//! cancel.cancel();
//! handle.await?;
//! # Ok(())
//! # }
//! ```

use crate::config::DispatchConfig;
use crate::db::{Database, NewQueueMessage, QueueMessage, QueueMessageUpdate, RetrieveTask};
use crate::types::{QueueStatus, TaskId};
use crate::utils::now_millis;
use crate::{Error, Result};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Hands a claimed task to the messaging subsystem
#[async_trait]
pub trait RetrieveDispatcher: Send + Sync {
    /// Submit `task`, now owned by `message`, for processing
    ///
    /// An error marks the queue message as failed.
    async fn dispatch(&self, task: &RetrieveTask, message: &QueueMessage) -> Result<()>;
}

/// Counts from one dispatch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Due task keys returned by the lookup
    pub due: usize,
    /// Tasks this pass claimed
    pub claimed: usize,
    /// Tasks claimed elsewhere first (or deleted meanwhile)
    pub lost: usize,
    /// Claimed tasks the dispatcher rejected
    pub failed: usize,
    /// Tasks skipped because of a store error
    pub errors: usize,
}

/// Periodic dispatcher for one device's retrieve tasks
pub struct DispatchTask {
    db: Arc<Database>,
    dispatcher: Arc<dyn RetrieveDispatcher>,
    config: DispatchConfig,
    cancel_token: CancellationToken,
}

impl DispatchTask {
    /// Creates a new dispatch task
    pub fn new(
        db: Arc<Database>,
        dispatcher: Arc<dyn RetrieveDispatcher>,
        config: DispatchConfig,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            db,
            dispatcher,
            config,
            cancel_token,
        }
    }

    /// Poll every `poll_interval` until the cancel token fires
    ///
    /// A failed pass is logged and retried on the next tick.
    pub async fn run(self) {
        if !self.config.enabled {
            info!(device = %self.config.device_name, "Retrieve dispatch disabled");
            return;
        }

        info!(
            device = %self.config.device_name,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Retrieve dispatch started"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                _ = interval.tick() => {
                    match self.run_once().await {
                        Ok(report) if report.due > 0 => {
                            info!(
                                device = %self.config.device_name,
                                due = report.due,
                                claimed = report.claimed,
                                lost = report.lost,
                                failed = report.failed,
                                errors = report.errors,
                                "Dispatch pass complete"
                            );
                        }
                        Ok(_) => debug!(device = %self.config.device_name, "No due retrieve tasks"),
                        Err(e) => {
                            error!(device = %self.config.device_name, error = %e, "Dispatch pass failed");
                        }
                    }
                }
            }
        }

        info!(device = %self.config.device_name, "Retrieve dispatch stopped");
    }

    /// Run a single pass over the currently due tasks
    ///
    /// Only the due lookup fails the pass. A store error on one task is
    /// logged, counted in [`DispatchReport::errors`] and the pass moves on.
    pub async fn run_once(&self) -> Result<DispatchReport> {
        let due = self
            .db
            .find_scheduled_by_device_name(&self.config.device_name)
            .await?;
        let mut report = DispatchReport {
            due: due.len(),
            ..Default::default()
        };

        for id in due {
            if self.cancel_token.is_cancelled() {
                break;
            }

            if let Err(e) = self.dispatch_one(id, &mut report).await {
                warn!(task = %id, error = %e, "Failed to dispatch retrieve task");
                report.errors += 1;
            }
        }

        Ok(report)
    }

    async fn dispatch_one(&self, id: TaskId, report: &mut DispatchReport) -> Result<()> {
        let Some(task) = self.db.get_retrieve_task(id).await? else {
            report.lost += 1;
            return Ok(());
        };

        let new_message = NewQueueMessage {
            message_id: new_message_id(),
            queue_name: task.queue_name.clone(),
        };
        let Some(message) = self.db.claim_retrieve_task(id, &new_message).await? else {
            debug!(task = %id, "Lost claim on retrieve task");
            report.lost += 1;
            return Ok(());
        };
        report.claimed += 1;

        if let Err(e) = self.dispatcher.dispatch(&task, &message).await {
            warn!(
                task = %id,
                message_id = %message.message_id,
                error = %e,
                "Dispatcher rejected retrieve task"
            );
            report.failed += 1;

            // A claimed task with a SCHEDULED message is never due again
            if let Err(store_err) = self.mark_failed(&message, &e).await {
                self.db
                    .reschedule_retrieve_task(id, task.scheduled_time)
                    .await?;
                info!(task = %id, "Released claim on retrieve task");
                return Err(store_err);
            }
        }

        Ok(())
    }

    async fn mark_failed(&self, message: &QueueMessage, e: &Error) -> Result<()> {
        let update = QueueMessageUpdate {
            status: QueueStatus::Failed,
            num_failures: message.num_failures + 1,
            processing_start_time: message.processing_start_time,
            processing_end_time: Some(now_millis()),
            error_message: Some(e.to_string()),
            outcome_message: None,
        };
        self.db.update_queue_message(message.pk, &update).await?;
        Ok(())
    }
}

/// Broker-style message id: `ID:` followed by 32 lowercase hex digits
fn new_message_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("ID:{}", hex)
}
