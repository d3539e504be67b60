//! Runtime configuration.
//!
//! Defaults are usable as-is for a single node; the binary overrides individual
//! fields from its command line.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How to reach the coordination service and how hard to try.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// `host:port` of every coordination server, tried in order.
    pub hosts: Vec<String>,
    /// Idle time after which the service expires a session.
    pub session_timeout_ms: u64,
    /// Attempts per request before reporting `ConnectionLoss`.
    pub retries: usize,
    /// Initial delay between attempts; doubled per attempt up to 1200ms.
    pub retry_backoff_ms: u64,
    /// Per-request transport timeout.
    pub request_timeout_ms: u64,
    /// How long the server holds a watch long-poll open before answering "not yet".
    pub watch_poll_ms: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["127.0.0.1:2181".to_string()],
            session_timeout_ms: 10_000,
            retries: 3,
            retry_backoff_ms: 150,
            request_timeout_ms: 500,
            watch_poll_ms: 20_000,
        }
    }
}

impl CoordinationConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn watch_poll(&self) -> Duration {
        Duration::from_millis(self.watch_poll_ms)
    }

    /// Heartbeats go out three times per session timeout.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis((self.session_timeout_ms / 3).max(1))
    }
}

/// Scheduler node settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Root of the scheduler's subtree in the coordination service.
    pub root: String,
    /// Address the node's HTTP server listens on.
    pub bind: String,
    /// Number of concurrent executor workers.
    pub workers: usize,
    /// Bound passed to each worker's `poll`.
    pub poll_timeout_ms: u64,
    /// Delay applied before retrying after a transient coordination fault.
    pub transient_backoff_ms: u64,
    pub coordination: CoordinationConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            root: "/delayq".to_string(),
            bind: "127.0.0.1:3000".to_string(),
            workers: 4,
            poll_timeout_ms: 1_000,
            transient_backoff_ms: 100,
            coordination: CoordinationConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn transient_backoff(&self) -> Duration {
        Duration::from_millis(self.transient_backoff_ms)
    }

    pub fn queue_path(&self) -> String {
        format!("{}/queue", self.root.trim_end_matches('/'))
    }

    pub fn tasks_path(&self) -> String {
        format!("{}/tasks", self.root.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_hang_off_root() {
        let mut config = SchedulerConfig::default();
        assert_eq!(config.queue_path(), "/delayq/queue");
        assert_eq!(config.tasks_path(), "/delayq/tasks");

        config.root = "/".to_string();
        assert_eq!(config.queue_path(), "/queue");
    }

    #[test]
    fn test_config_deserializes_from_json() {
        let json = serde_json::to_string(&SchedulerConfig::default()).unwrap();
        let config: SchedulerConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.workers, 4);
        assert_eq!(config.coordination.heartbeat_interval(), Duration::from_millis(3_333));
    }
}
