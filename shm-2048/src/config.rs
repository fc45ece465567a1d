use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// POSIX shared memory object name, with or without the leading slash.
    pub name: String,
    /// How long the consumer waits for an outstanding result before giving up on its worker.
    pub response_timeout_ms: u64,
    /// How long a worker waits for the answer to its latest result.
    pub action_timeout_ms: u64,
    /// Longest single block inside `poll`.
    pub poll_interval_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: "dqn2048".to_owned(),
            response_timeout_ms: 5_000,
            action_timeout_ms: 60_000,
            poll_interval_ms: 10,
        }
    }
}

impl ChannelConfig {
    pub const fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub const fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
