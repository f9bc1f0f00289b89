use futures::future::join_all;
use tracing::{info, warn};

use crate::error::TrackerError;
use crate::tracker::{ProcessTracker, StopOutcome};

/// Per-code results of a bulk stop, in the order codes were listed.
#[derive(Debug, Default)]
pub struct StopAllReport {
    pub results: Vec<(String, Result<StopOutcome, TrackerError>)>,
}

impl StopAllReport {
    /// Codes that failed to stop, with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &TrackerError)> {
        self.results
            .iter()
            .filter_map(|(code, result)| result.as_ref().err().map(|e| (code.as_str(), e)))
    }

    pub fn all_stopped(&self) -> bool {
        self.results.iter().all(|(_, result)| {
            matches!(
                result,
                Ok(StopOutcome::Stopped | StopOutcome::Killed | StopOutcome::NotRunning)
            )
        })
    }
}

/// Stop every running code concurrently.
///
/// Each stop takes its own per-code lock, so codes never wait on each other
/// and the whole call takes about as long as the slowest single stop.
pub async fn stop_all_commands(tracker: &ProcessTracker) -> Result<StopAllReport, TrackerError> {
    let codes = tracker.list_running_codes().await?;
    if codes.is_empty() {
        return Ok(StopAllReport::default());
    }
    info!(count = codes.len(), "Stopping all running commands");

    let stops = codes.into_iter().map(|code| async move {
        let result = tracker.stop_process(&code).await;
        (code, result)
    });
    let report = StopAllReport {
        results: join_all(stops).await,
    };

    for (code, e) in report.failures() {
        warn!(code, "Failed to stop command: {e}");
    }
    tracker.notifier().info(&format!(
        "Stopped {} command(s)",
        report.results.iter().filter(|(_, r)| r.is_ok()).count()
    ));
    Ok(report)
}
