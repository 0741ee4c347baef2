// Run configuration

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Topic the measurement engine publishes progress on.
pub const PROGRESS_TOPIC: &str = "speed-test-progress";
pub const DEFAULT_CONNECTIONS: usize = 6;
pub const MAX_CONNECTIONS: usize = 32;
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("connections must be between 1 and 32, got {0}")]
    Connections(usize),
    #[error("history capacity must be at least 1")]
    HistoryCapacity,
    #[error("progress topic must not be empty")]
    EmptyTopic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub connections: usize, // Parallel measurement connections handed to the engine
    pub progress_topic: String,
    pub history_capacity: usize, // Most recent results kept in the history log
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            connections: DEFAULT_CONNECTIONS,
            progress_topic: PROGRESS_TOPIC.to_string(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connections == 0 || self.connections > MAX_CONNECTIONS {
            return Err(ConfigError::Connections(self.connections));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::HistoryCapacity);
        }
        if self.progress_topic.trim().is_empty() {
            return Err(ConfigError::EmptyTopic);
        }
        Ok(())
    }
}
