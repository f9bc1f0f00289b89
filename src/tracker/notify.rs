//! User-notification seam.
//!
//! The tracker surfaces crashes to whatever UI hosts it; it never consumes the
//! notification itself beyond honouring a request to show the output.

use super::types::ExitInfo;

/// The host's answer to a crash notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashResponse {
    ShowOutput,
    Dismiss,
}

/// Outbound notifications to the host UI.
pub trait Notifier: Send + Sync {
    /// A tracked process exited without being asked to stop.
    fn crashed(&self, code: &str, exit: &ExitInfo) -> CrashResponse;
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Notifier that only writes to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn crashed(&self, code: &str, exit: &ExitInfo) -> CrashResponse {
        tracing::warn!(code, exit_code = ?exit.code, signal = ?exit.signal, "Process crashed");
        CrashResponse::Dismiss
    }

    fn info(&self, message: &str) {
        tracing::info!("{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!("{message}");
    }
}
