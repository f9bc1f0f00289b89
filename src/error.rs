use std::path::PathBuf;

/// Errors related to configuration loading and parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config at {path}: {message}")]
    ParseError { path: PathBuf, message: String },
}

/// Errors from the file-backed lock manager.
///
/// Only an already-present lock file is classified as contention; every other
/// filesystem failure is passed through as [`LockError::Io`].
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Resource `{resource}` is already locked")]
    Contention { resource: String },

    #[error("Lock I/O error on `{resource}`: {source}")]
    Io {
        resource: String,
        #[source]
        source: std::io::Error,
    },
}

impl LockError {
    /// True if the failure was an already-held lock rather than an I/O error.
    pub fn is_contention(&self) -> bool {
        matches!(self, LockError::Contention { .. })
    }
}

/// Errors related to tracked process lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Invalid process code `{code}`: {reason}")]
    InvalidCode { code: String, reason: &'static str },

    #[error("Failed to spawn `{program}` for `{code}`: {source}")]
    SpawnFailure {
        code: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("State store error at {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt slot record at {path}: {message}")]
    CorruptRecord { path: PathBuf, message: String },

    #[error("Failed to signal pid {pid}: {errno}")]
    Signal { pid: u32, errno: nix::errno::Errno },
}

/// Errors from the debug socket registry.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("No debug socket found for {target} in {dir} (entries: {listing:?})")]
    NotFound {
        target: String,
        dir: PathBuf,
        listing: Vec<String>,
    },

    #[error("Invalid socket entry prefix `{prefix}`: {message}")]
    InvalidPrefix { prefix: String, message: String },

    #[error("Socket directory I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from orchestration flows that combine tracking and socket discovery.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("Process `{code}` (pid {pid}) started but its debug socket never appeared: {source}")]
    SocketMissing {
        code: String,
        pid: u32,
        #[source]
        source: SocketError,
    },

    #[error(transparent)]
    Socket(#[from] SocketError),
}
