//! Configuration types for retrieve-tasks

use crate::export::ExportOptions;
use crate::{Error, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Persistence configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database file (default: "./retrieve-tasks.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Dispatch loop configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Device whose due tasks are dispatched (default: "dcm4chee-arc")
    #[serde(default = "default_device_name")]
    pub device_name: String,

    /// Interval between due-task lookups (default: 60 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Run the dispatch loop at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            poll_interval: default_poll_interval(),
            enabled: true,
        }
    }
}

/// Export configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Offset east of UTC, in seconds, for exported timestamps (default: 0)
    #[serde(default)]
    pub utc_offset_secs: i32,
}

impl ExportConfig {
    /// Rendering options for the exporters
    ///
    /// Fails if the offset is not within ±24 hours.
    pub fn options(&self) -> Result<ExportOptions> {
        let offset = FixedOffset::east_opt(self.utc_offset_secs).ok_or_else(|| Error::Config {
            message: format!(
                "UTC offset {} seconds is out of range",
                self.utc_offset_secs
            ),
            key: Some("export.utc_offset_secs".to_string()),
        })?;
        Ok(ExportOptions { offset })
    }
}

/// Main configuration for retrieve-tasks
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Dispatch loop settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Export settings
    #[serde(default)]
    pub export: ExportConfig,
}

impl Config {
    /// Parse a JSON configuration document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings that serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.persistence.database_path.as_os_str().is_empty() {
            return Err(Error::Config {
                message: "database path must not be empty".to_string(),
                key: Some("persistence.database_path".to_string()),
            });
        }
        if self.dispatch.device_name.trim().is_empty() {
            return Err(Error::Config {
                message: "device name must not be empty".to_string(),
                key: Some("dispatch.device_name".to_string()),
            });
        }
        if self.dispatch.poll_interval.is_zero() {
            return Err(Error::Config {
                message: "poll interval must be at least one second".to_string(),
                key: Some("dispatch.poll_interval".to_string()),
            });
        }
        self.export.options()?;
        Ok(())
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./retrieve-tasks.db")
}

fn default_device_name() -> String {
    "dcm4chee-arc".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
