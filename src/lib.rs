//! # retrieve-tasks
//!
//! Bookkeeping core for asynchronous DICOM retrieve tasks.
//!
//! A retrieve task records a request to move a study, series or single
//! instance from a remote AE to a destination AE. The work itself runs
//! elsewhere; this crate keeps the durable record and its progress:
//!
//! - **Due lookup** - find tasks of a device whose scheduled time has passed
//!   and that nobody has claimed yet
//! - **Claim** - attach a queue message to a task, at most once per task
//! - **Progress** - workers push counters and the final status keyed by the
//!   queue message
//! - **Status projection** - one combined status for monitoring, `TO_SCHEDULE`
//!   until a queue message exists
//! - **Export** - sparse JSON objects and fixed-column CSV rows
//!
//! ## Quick Start
//!
//! ```no_run
//! use retrieve_tasks::db::{NewQueueMessage, NewRetrieveTask, TaskProgress};
//! use retrieve_tasks::export::{ExportOptions, json};
//! use retrieve_tasks::Database;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::new(Path::new("retrieve-tasks.db")).await?;
//!
//!     let task = db
//!         .insert_retrieve_task(&NewRetrieveTask {
//!             device_name: "DEV1".to_string(),
//!             queue_name: "Retrieve1".to_string(),
//!             local_aet: "ARCHIVE".to_string(),
//!             remote_aet: "PACS".to_string(),
//!             destination_aet: "VIEWER".to_string(),
//!             study_iuid: "1.2.840.113619.2.1".to_string(),
//!             ..Default::default()
//!         })
//!         .await?;
//!
//!     for id in db.find_scheduled_by_device_name("DEV1").await? {
//!         let message = NewQueueMessage {
//!             message_id: format!("ID:{id}"),
//!             queue_name: "Retrieve1".to_string(),
//!         };
//!         if let Some(message) = db.claim_retrieve_task(id, &message).await? {
//!             let progress = TaskProgress {
//!                 remaining: 5,
//!                 completed: 2,
//!                 failed: 0,
//!                 warning: 0,
//!                 status_code: -1,
//!                 error_comment: None,
//!             };
//!             db.update_by_queue_message(message.pk, &progress).await?;
//!         }
//!     }
//!
//!     if let Some((task, message)) = db.get_retrieve_task_with_message(task.pk).await? {
//!         let value = json::to_json(&task, message.as_ref(), &ExportOptions::default());
//!         println!("{value}");
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Background dispatch of due tasks
pub mod dispatch;
/// Error types
pub mod error;
/// JSON and CSV exporters
pub mod export;
/// Combined task/queue message status
pub mod projection;
/// Core types (ids, queue status)
pub mod types;
/// Timestamp and status code helpers
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{DatabaseError, Error, Result};
pub use projection::{StatusView, project};
pub use types::{QueueMessageId, QueueStatus, TaskId};
