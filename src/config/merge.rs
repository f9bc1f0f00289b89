use super::schema::{AppConfig, PartialConfig};
use crate::lock::Backoff;
use crate::tracker::TrackerSettings;
use crate::tracker::output::DEFAULT_OUTPUT_CAPACITY;
use std::path::PathBuf;
use std::time::Duration;

/// Default entry prefix for debug sockets.
pub const DEFAULT_SOCKET_PREFIX: &str = "warden-debug";

impl PartialConfig {
    /// Merge self with a lower-priority fallback.
    /// Self's non-None values take precedence.
    /// For forbidden_env: REPLACE semantics (if self has Some, use it entirely).
    pub fn with_fallback(self, fallback: PartialConfig) -> PartialConfig {
        PartialConfig {
            workspace: self.workspace.or(fallback.workspace),
            state_dir: self.state_dir.or(fallback.state_dir),
            output_capacity: self.output_capacity.or(fallback.output_capacity),
            stop_timeout_ms: self.stop_timeout_ms.or(fallback.stop_timeout_ms),
            kill_after_timeout: self.kill_after_timeout.or(fallback.kill_after_timeout),
            lock_initial_backoff_ms: self
                .lock_initial_backoff_ms
                .or(fallback.lock_initial_backoff_ms),
            lock_max_backoff_ms: self.lock_max_backoff_ms.or(fallback.lock_max_backoff_ms),
            lock_max_wait_ms: self.lock_max_wait_ms.or(fallback.lock_max_wait_ms),
            socket_dir: self.socket_dir.or(fallback.socket_dir),
            socket_prefix: self.socket_prefix.or(fallback.socket_prefix),
            socket_poll_ms: self.socket_poll_ms.or(fallback.socket_poll_ms),
            socket_timeout_ms: self.socket_timeout_ms.or(fallback.socket_timeout_ms),
            socket_pid_retries: self.socket_pid_retries.or(fallback.socket_pid_retries),
            forbidden_env: self.forbidden_env.or(fallback.forbidden_env),
        }
    }

    /// Convert to AppConfig, filling any remaining gaps with defaults.
    pub fn finalize(self) -> AppConfig {
        let tmp = std::env::temp_dir();

        AppConfig {
            workspace: self.workspace.unwrap_or_else(|| PathBuf::from(".")),
            state_dir: self.state_dir.unwrap_or_else(|| tmp.join("warden")),
            output_capacity: self.output_capacity.unwrap_or(DEFAULT_OUTPUT_CAPACITY),
            stop_timeout_ms: self.stop_timeout_ms.unwrap_or(5_000),
            kill_after_timeout: self.kill_after_timeout.unwrap_or(true),
            lock_initial_backoff_ms: self.lock_initial_backoff_ms.unwrap_or(25),
            lock_max_backoff_ms: self.lock_max_backoff_ms.unwrap_or(400),
            lock_max_wait_ms: self.lock_max_wait_ms.unwrap_or(30_000),
            socket_dir: self.socket_dir.unwrap_or_else(|| tmp.join("warden-sockets")),
            socket_prefix: self
                .socket_prefix
                .unwrap_or_else(|| DEFAULT_SOCKET_PREFIX.to_string()),
            socket_poll_ms: self.socket_poll_ms.unwrap_or(100),
            socket_timeout_ms: self.socket_timeout_ms.unwrap_or(10_000),
            socket_pid_retries: self.socket_pid_retries.unwrap_or(50),
            forbidden_env: self.forbidden_env.unwrap_or_default(),
        }
    }
}

impl AppConfig {
    pub fn lock_backoff(&self) -> Backoff {
        Backoff {
            initial: Duration::from_millis(self.lock_initial_backoff_ms),
            max_delay: Duration::from_millis(self.lock_max_backoff_ms),
            max_wait: Duration::from_millis(self.lock_max_wait_ms),
        }
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
            kill_after_timeout: self.kill_after_timeout,
            lock_backoff: self.lock_backoff(),
            forbidden_env: self.forbidden_env.clone(),
        }
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    pub fn socket_poll_interval(&self) -> Duration {
        Duration::from_millis(self.socket_poll_ms)
    }
}
