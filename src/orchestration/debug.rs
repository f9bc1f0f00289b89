use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::LaunchError;
use crate::sockets::SocketRegistry;
use crate::tracker::{ProcessTracker, SpawnSpec, TrackedProcess};

/// Environment variable naming the directory a child should create its socket in.
pub const SOCKET_DIR_VAR: &str = "WARDEN_SOCKET_DIR";
/// Environment variable naming the entry prefix a child should use.
pub const SOCKET_PREFIX_VAR: &str = "WARDEN_SOCKET_PREFIX";

/// Tell the child where `registry` will look for its socket.
pub fn advertise_registry(spec: SpawnSpec, registry: &SocketRegistry) -> SpawnSpec {
    spec.env(SOCKET_DIR_VAR, registry.dir().to_string_lossy())
        .env(SOCKET_PREFIX_VAR, registry.parser().prefix())
}

/// A debug-enabled process together with the socket it opened.
#[derive(Debug, Clone)]
pub struct DebugLaunch {
    pub process: TrackedProcess,
    pub socket: PathBuf,
}

/// Spawn `spec` and wait for the child to create its debug socket.
///
/// Discovery matches on the spawned pid, polling up to `retries` times
/// `interval` apart. If the socket never shows up the process is left running
/// (it is tracked like any other) and [`LaunchError::SocketMissing`] is
/// returned so the caller can decide whether to stop it.
pub async fn spawn_with_debug_socket(
    tracker: &ProcessTracker,
    registry: &SocketRegistry,
    spec: SpawnSpec,
    retries: u32,
    interval: Duration,
) -> Result<DebugLaunch, LaunchError> {
    registry.ensure_directory().await?;

    let process = tracker.spawn_and_track(spec).await?;
    let pid = process.pid();

    match registry.wait_for_pid(pid, retries, interval).await {
        Ok(socket) => {
            info!(code = process.code(), pid, socket = %socket.display(), "Debug socket ready");
            Ok(DebugLaunch { process, socket })
        }
        Err(source) => {
            warn!(
                code = process.code(),
                pid,
                expected = %registry.dir().join(registry.parser().format(pid, "<label>")).display(),
                "Debug socket did not appear"
            );
            Err(LaunchError::SocketMissing {
                code: process.code().to_string(),
                pid,
                source,
            })
        }
    }
}
