//! Shared vocabulary for the process tracker.
//!
//! These types cross the boundary to orchestration and to the host's UI
//! collaborators; records that are persisted derive serde traits.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// Maximum length, in bytes, of a process code.
pub const MAX_CODE_LEN: usize = 64;

/// How the child's standard streams are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StdioMode {
    /// stdout/stderr are captured line by line into the code's output channel.
    #[default]
    Piped,
    /// The child shares the host's streams.
    Inherit,
    /// All streams go to /dev/null.
    Null,
}

/// Everything needed to launch one tracked command.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub code: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Extra variables set on top of the filtered environment.
    pub env: Vec<(String, String)>,
    pub stdio: StdioMode,
    /// Names stripped from the child's environment beyond the built-in denylist.
    pub additional_forbidden_vars: Vec<String>,
}

impl SpawnSpec {
    pub fn new(code: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            stdio: StdioMode::default(),
            additional_forbidden_vars: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdio(mut self, stdio: StdioMode) -> Self {
        self.stdio = stdio;
        self
    }

    pub fn forbid_var(mut self, name: impl Into<String>) -> Self {
        self.additional_forbidden_vars.push(name.into());
        self
    }

    /// Command line as a single display string.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Persisted record mapping a code to its tracked process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub code: String,
    pub pid: u32,
    pub namespace: String,
    pub program: String,
    pub args: Vec<String>,
    /// RFC 3339 timestamp of the spawn.
    pub started_at: String,
}

/// Why a tracked process is no longer running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    #[default]
    None,
    UserRequested,
    Crashed,
}

impl TerminationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminationReason::None => "none",
            TerminationReason::UserRequested => "user-requested",
            TerminationReason::Crashed => "crashed",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TerminationReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "none" => Ok(TerminationReason::None),
            "user-requested" => Ok(TerminationReason::UserRequested),
            "crashed" => Ok(TerminationReason::Crashed),
            other => Err(format!("unknown termination reason `{other}`")),
        }
    }
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal number, if the process was killed by a signal.
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }

    /// Line appended to the output channel when the process ends unexpectedly.
    pub fn marker_line(&self) -> String {
        match (self.code, self.signal) {
            (Some(code), _) => format!("[process exited with code {code}]"),
            (None, Some(signal)) => format!("[process terminated by signal {signal}]"),
            (None, None) => "[process exited]".to_string(),
        }
    }
}

/// Outcome of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopOutcome {
    /// No slot was recorded for the code; nothing was signalled.
    NotRunning,
    /// The process exited after SIGTERM (or was already gone).
    Stopped,
    /// The process ignored SIGTERM and was killed.
    Killed,
    /// The process survived the bounded wait; its slot is kept.
    StillRunning,
}

/// Reject codes that cannot safely name a file.
pub fn validate_code(code: &str) -> Result<(), TrackerError> {
    let reason = if code.is_empty() {
        Some("must not be empty")
    } else if code.len() > MAX_CODE_LEN {
        Some("longer than 64 bytes")
    } else if code.starts_with('.') {
        Some("must not start with '.'")
    } else if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        Some("only ASCII letters, digits, '-', '_' and '.' are allowed")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(TrackerError::InvalidCode {
            code: code.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
