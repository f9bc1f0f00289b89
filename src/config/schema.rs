use serde::Deserialize;
use std::path::PathBuf;

/// The TOML file structure for warden.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub general: Option<GeneralConfig>,
    pub stop: Option<StopConfig>,
    pub locks: Option<LockConfig>,
    pub sockets: Option<SocketConfig>,
    pub env: Option<EnvConfig>,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    pub workspace: Option<String>,
    /// Shared root under which each workspace gets a namespace directory.
    pub state_dir: Option<String>,
    pub output_capacity: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct StopConfig {
    pub timeout_ms: Option<u64>,
    pub kill_after_timeout: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct LockConfig {
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub max_wait_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct SocketConfig {
    pub dir: Option<String>,
    pub prefix: Option<String>,
    pub poll_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub pid_retries: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct EnvConfig {
    /// If specified, fully replaces lower-priority lists. The built-in
    /// denylist always applies regardless.
    pub forbidden: Option<Vec<String>>,
}

/// Fully-resolved runtime configuration. All fields have values.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub workspace: PathBuf,
    pub state_dir: PathBuf,
    pub output_capacity: usize,
    pub stop_timeout_ms: u64,
    pub kill_after_timeout: bool,
    pub lock_initial_backoff_ms: u64,
    pub lock_max_backoff_ms: u64,
    pub lock_max_wait_ms: u64,
    pub socket_dir: PathBuf,
    pub socket_prefix: String,
    pub socket_poll_ms: u64,
    pub socket_timeout_ms: u64,
    pub socket_pid_retries: u32,
    pub forbidden_env: Vec<String>,
}

/// Partial config used during merge. All fields are Option so that
/// missing fields don't override lower-priority values.
#[derive(Debug, Clone, Default)]
pub struct PartialConfig {
    pub workspace: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub output_capacity: Option<usize>,
    pub stop_timeout_ms: Option<u64>,
    pub kill_after_timeout: Option<bool>,
    pub lock_initial_backoff_ms: Option<u64>,
    pub lock_max_backoff_ms: Option<u64>,
    pub lock_max_wait_ms: Option<u64>,
    pub socket_dir: Option<PathBuf>,
    pub socket_prefix: Option<String>,
    pub socket_poll_ms: Option<u64>,
    pub socket_timeout_ms: Option<u64>,
    pub socket_pid_retries: Option<u32>,
    pub forbidden_env: Option<Vec<String>>,
}

impl ConfigFile {
    /// Flatten the table structure into a [`PartialConfig`].
    pub fn to_partial(self) -> PartialConfig {
        let general = self.general;
        let stop = self.stop;
        let locks = self.locks;
        let sockets = self.sockets;

        PartialConfig {
            workspace: general.as_ref().and_then(|g| g.workspace.as_ref().map(PathBuf::from)),
            state_dir: general.as_ref().and_then(|g| g.state_dir.as_ref().map(PathBuf::from)),
            output_capacity: general.as_ref().and_then(|g| g.output_capacity),
            stop_timeout_ms: stop.as_ref().and_then(|s| s.timeout_ms),
            kill_after_timeout: stop.as_ref().and_then(|s| s.kill_after_timeout),
            lock_initial_backoff_ms: locks.as_ref().and_then(|l| l.initial_backoff_ms),
            lock_max_backoff_ms: locks.as_ref().and_then(|l| l.max_backoff_ms),
            lock_max_wait_ms: locks.as_ref().and_then(|l| l.max_wait_ms),
            socket_dir: sockets.as_ref().and_then(|s| s.dir.as_ref().map(PathBuf::from)),
            socket_prefix: sockets.as_ref().and_then(|s| s.prefix.clone()),
            socket_poll_ms: sockets.as_ref().and_then(|s| s.poll_ms),
            socket_timeout_ms: sockets.as_ref().and_then(|s| s.timeout_ms),
            socket_pid_retries: sockets.as_ref().and_then(|s| s.pid_retries),
            forbidden_env: self.env.and_then(|e| e.forbidden),
        }
    }
}
