//! Core types for retrieve-tasks

use serde::{Deserialize, Serialize};

/// Generates a transparent `i64` surrogate key newtype with sqlx support.
macro_rules! surrogate_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Get the inner i64 value
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl sqlx::Type<sqlx::Sqlite> for $name {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $name {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(Self(id))
            }
        }
    };
}

surrogate_key!(
    /// Surrogate key of a retrieve task record
    TaskId
);

surrogate_key!(
    /// Surrogate key of a queue message record
    QueueMessageId
);

/// Sentinel for `remaining` before any progress has been reported
pub const REMAINING_UNKNOWN: i32 = -1;

/// Sentinel for `status_code` while the task has no terminal protocol outcome
pub const STATUS_CODE_PENDING: i32 = -1;

/// Processing status of a retrieve task as seen by operators
///
/// `ToSchedule` is never stored on a queue message. It is the projected
/// status of a task that has not been claimed yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    /// Dispatched and waiting for a worker
    Scheduled,
    /// A worker is processing the message
    InProcess,
    /// All sub-operations completed
    Completed,
    /// Finished with warnings
    Warning,
    /// Finished with failures
    Failed,
    /// Canceled by an operator
    Canceled,
    /// Not dispatched yet (no queue message)
    ToSchedule,
}

impl QueueStatus {
    /// Convert integer status code to QueueStatus enum
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => QueueStatus::Scheduled,
            1 => QueueStatus::InProcess,
            2 => QueueStatus::Completed,
            3 => QueueStatus::Warning,
            4 => QueueStatus::Failed,
            5 => QueueStatus::Canceled,
            6 => QueueStatus::ToSchedule,
            _ => QueueStatus::Failed, // Default to Failed for unknown status
        }
    }

    /// Convert QueueStatus enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            QueueStatus::Scheduled => 0,
            QueueStatus::InProcess => 1,
            QueueStatus::Completed => 2,
            QueueStatus::Warning => 3,
            QueueStatus::Failed => 4,
            QueueStatus::Canceled => 5,
            QueueStatus::ToSchedule => 6,
        }
    }

    /// Whether the worker will no longer revise this status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueStatus::Completed
                | QueueStatus::Warning
                | QueueStatus::Failed
                | QueueStatus::Canceled
        )
    }

    /// Text rendering used by both exporters
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Scheduled => "SCHEDULED",
            QueueStatus::InProcess => "IN_PROCESS",
            QueueStatus::Completed => "COMPLETED",
            QueueStatus::Warning => "WARNING",
            QueueStatus::Failed => "FAILED",
            QueueStatus::Canceled => "CANCELED",
            QueueStatus::ToSchedule => "TO_SCHEDULE",
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status values that are never reverted once written, as stored integers
pub(crate) const TERMINAL_STATUS_CODES: [i32; 4] = [2, 3, 4, 5];
