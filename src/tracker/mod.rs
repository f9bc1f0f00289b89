//! Process slot tracking.
//!
//! [`ProcessTracker`] launches commands, persists one slot record per code,
//! and classifies every exit as either requested or a crash. All state lives
//! on disk under a [`StateLayout`], so a tracker recreated after a host
//! restart sees the same slots and can still stop or query them.
//!
//! **Ordering:** `stop_process` writes `user-requested` *before* signalling,
//! and the exit observer reads the reason under the same per-code lock. That
//! ordering alone is what separates a deliberate stop from a crash.

pub mod env;
pub mod journal;
pub mod layout;
pub mod notify;
pub mod output;
pub mod process;
pub mod store;
pub mod types;

use std::collections::HashSet;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use nix::sys::signal::Signal;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use layout::StateLayout;
pub use notify::{CrashResponse, LogNotifier, Notifier};
pub use output::{MemoryOutput, OutputChannels, OutputSink};
pub use types::{ExitInfo, SlotRecord, SpawnSpec, StdioMode, StopOutcome, TerminationReason};

use crate::error::{LockError, TrackerError};
use crate::lock::{Backoff, LockGuard, LockManager};
use journal::{EventJournal, JournalEntry};
use process::SignalDelivery;
use store::{ReasonStore, SlotStore};
use types::validate_code;

/// Lock name reserved for operations spanning every code.
pub const GLOBAL_LOCK: &str = "global";

/// How long the exit observer waits for output readers to drain.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

fn code_lock(code: &str) -> String {
    format!("code-{code}")
}

/// Tunables for a [`ProcessTracker`].
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    /// Bounded wait for a signalled process to disappear.
    pub stop_timeout: Duration,
    /// Send SIGKILL when SIGTERM does not stop the process in time.
    pub kill_after_timeout: bool,
    /// Waiting policy for per-code locks.
    pub lock_backoff: Backoff,
    /// Variables stripped from every child on top of the built-in denylist.
    pub forbidden_env: Vec<String>,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(5),
            kill_after_timeout: true,
            lock_backoff: Backoff::default(),
            forbidden_env: Vec::new(),
        }
    }
}

struct Inner {
    layout: StateLayout,
    slots: SlotStore,
    reasons: ReasonStore,
    locks: LockManager,
    outputs: OutputChannels,
    notifier: Arc<dyn Notifier>,
    journal: Mutex<Option<EventJournal>>,
    /// Pids whose exit this tracker's own observer tasks will classify.
    observed: Mutex<HashSet<u32>>,
    settings: TrackerSettings,
}

/// Builder for [`ProcessTracker`].
pub struct TrackerBuilder {
    layout: StateLayout,
    settings: TrackerSettings,
    outputs: OutputChannels,
    notifier: Arc<dyn Notifier>,
}

impl TrackerBuilder {
    pub fn settings(mut self, settings: TrackerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn outputs(mut self, outputs: OutputChannels) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn build(self) -> ProcessTracker {
        let layout = self.layout;
        ProcessTracker {
            inner: Arc::new(Inner {
                slots: SlotStore::new(layout.slots_dir()),
                reasons: ReasonStore::new(layout.reasons_dir()),
                locks: LockManager::new(layout.locks_dir()),
                outputs: self.outputs,
                notifier: self.notifier,
                journal: Mutex::new(None),
                observed: Mutex::new(HashSet::new()),
                settings: self.settings,
                layout,
            }),
        }
    }
}

/// Handle to a process started by [`ProcessTracker::spawn_and_track`].
#[derive(Debug, Clone)]
pub struct TrackedProcess {
    code: String,
    pid: u32,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
}

impl TrackedProcess {
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Wait until the process has exited *and* its exit has been classified.
    ///
    /// Returns `None` if the observer went away without reporting (the
    /// runtime shut down first).
    pub async fn wait(&self) -> Option<ExitInfo> {
        let mut rx = self.exit_rx.clone();
        rx.wait_for(Option::is_some).await.ok().and_then(|exit| *exit)
    }

    /// Exit info if the process has already exited and been classified.
    pub fn try_exit(&self) -> Option<ExitInfo> {
        *self.exit_rx.borrow()
    }
}

/// Owner of the process slots for one workspace namespace.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ProcessTracker {
    inner: Arc<Inner>,
}

impl ProcessTracker {
    /// Start building a tracker over `layout` with default settings, in-memory
    /// output channels, and a log-only notifier.
    pub fn builder(layout: StateLayout) -> TrackerBuilder {
        TrackerBuilder {
            layout,
            settings: TrackerSettings::default(),
            outputs: OutputChannels::default(),
            notifier: Arc::new(LogNotifier),
        }
    }

    pub fn layout(&self) -> &StateLayout {
        &self.inner.layout
    }

    pub fn namespace(&self) -> &str {
        self.inner.layout.namespace()
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.inner.settings
    }

    pub fn locks(&self) -> &LockManager {
        &self.inner.locks
    }

    /// Spawn `spec` and start tracking it under `spec.code`.
    ///
    /// Runs under the code's lock. Any previous slot for the code is
    /// overwritten and its termination reason cleared. Spawn errors are
    /// returned as [`TrackerError::SpawnFailure`].
    pub async fn spawn_and_track(&self, spec: SpawnSpec) -> Result<TrackedProcess, TrackerError> {
        validate_code(&spec.code)?;
        let guard = self.acquire(&spec.code).await?;

        let forbidden: Vec<&str> = self
            .inner
            .settings
            .forbidden_env
            .iter()
            .chain(spec.additional_forbidden_vars.iter())
            .map(String::as_str)
            .collect();
        let child_env = env::build_child_env(std::env::vars_os(), &forbidden, &spec.env);

        // process_group(0) requires the CommandExt trait on Unix.
        #[allow(unused_imports)]
        use std::os::unix::process::CommandExt;

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .env_clear()
            .envs(child_env)
            .process_group(0)
            .stdin(Stdio::null())
            // The child must outlive this handle so a restarted host can adopt it.
            .kill_on_drop(false);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        match spec.stdio {
            StdioMode::Piped => {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
            StdioMode::Inherit => {
                command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            StdioMode::Null => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        let spawn_failure = |source: std::io::Error| TrackerError::SpawnFailure {
            code: spec.code.clone(),
            program: spec.program.clone(),
            source,
        };

        let mut child = command.spawn().map_err(|e| {
            error!(code = %spec.code, program = %spec.program, "Failed to spawn process: {e}");
            spawn_failure(e)
        })?;
        let pid = match child.id() {
            Some(pid) => pid,
            None => {
                return Err(spawn_failure(std::io::Error::other(
                    "spawned child has no pid",
                )));
            }
        };

        let record = SlotRecord {
            code: spec.code.clone(),
            pid,
            namespace: self.namespace().to_string(),
            program: spec.program.clone(),
            args: spec.args.clone(),
            started_at: Utc::now().to_rfc3339(),
        };
        if let Err(e) = self.inner.slots.write(&record).await {
            // Without a slot nobody could ever stop it.
            let _ = child.start_kill();
            return Err(e);
        }
        if let Err(e) = self.inner.reasons.clear(&spec.code).await {
            let _ = child.start_kill();
            let _ = self.inner.slots.remove(&spec.code).await;
            return Err(e);
        }
        self.inner.observed.lock().unwrap().insert(pid);
        self.journal(JournalEntry::spawned(&spec.code, pid, spec.command_line()));

        let channel = self.inner.outputs.get(&spec.code);
        let readers = pipe_output(&mut child, channel);

        let (exit_tx, exit_rx) = watch::channel(None);
        let tracker = self.clone();
        let code = spec.code.clone();
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => ExitInfo::from_status(status),
                Err(e) => {
                    warn!(code, pid, "Failed to wait on child: {e}");
                    ExitInfo { code: None, signal: None }
                }
            };
            for reader in readers {
                let _ = tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await;
            }
            tracker.classify_exit(&code, pid, exit).await;
            tracker.inner.observed.lock().unwrap().remove(&pid);
            let _ = exit_tx.send(Some(exit));
        });

        info!(code = %spec.code, pid, command = %spec.command_line(), "Process spawned");
        release(guard);

        Ok(TrackedProcess {
            code: spec.code,
            pid,
            exit_rx,
        })
    }

    /// Stop the process tracked under `code`.
    ///
    /// Records `user-requested` first, then sends SIGTERM, waits (bounded) for
    /// the pid to disappear, and removes the slot. A code with no slot returns
    /// [`StopOutcome::NotRunning`] without signalling anything.
    pub async fn stop_process(&self, code: &str) -> Result<StopOutcome, TrackerError> {
        validate_code(code)?;
        let guard = self.acquire(code).await?;

        // Must precede the signal: the exit observer decides crash vs. stop
        // from this value.
        self.inner
            .reasons
            .write(code, TerminationReason::UserRequested)
            .await?;

        let record = self.read_slot(code).await?;
        self.journal(JournalEntry::stop_requested(code, record.as_ref().map(|r| r.pid)));
        let Some(record) = record else {
            debug!(code, "Stop requested for code with no slot");
            release(guard);
            return Ok(StopOutcome::NotRunning);
        };
        let pid = record.pid;

        let outcome = match process::send_signal(pid, Signal::SIGTERM)? {
            SignalDelivery::AlreadyDead => StopOutcome::Stopped,
            SignalDelivery::Delivered => self.await_stop(code, pid).await?,
        };

        if outcome == StopOutcome::StillRunning {
            warn!(code, pid, "Process still present after stop; keeping its slot");
        } else {
            self.inner.slots.remove(code).await?;
        }
        self.journal(JournalEntry::stopped(code, pid, outcome));
        info!(code, pid, ?outcome, "Stop completed");

        release(guard);
        Ok(outcome)
    }

    async fn await_stop(&self, code: &str, pid: u32) -> Result<StopOutcome, TrackerError> {
        let timeout = self.inner.settings.stop_timeout;
        if process::wait_for_exit(pid, timeout).await {
            return Ok(StopOutcome::Stopped);
        }
        if !self.inner.settings.kill_after_timeout {
            return Ok(StopOutcome::StillRunning);
        }

        warn!(code, pid, timeout_ms = timeout.as_millis() as u64, "SIGTERM ignored, sending SIGKILL");
        match process::send_signal(pid, Signal::SIGKILL)? {
            SignalDelivery::AlreadyDead => Ok(StopOutcome::Stopped),
            SignalDelivery::Delivered if process::wait_for_exit(pid, timeout).await => {
                Ok(StopOutcome::Killed)
            }
            SignalDelivery::Delivered => Ok(StopOutcome::StillRunning),
        }
    }

    /// Codes whose recorded pid is alive, sorted. Dead slots are removed.
    pub async fn list_running_codes(&self) -> Result<Vec<String>, TrackerError> {
        let mut running = Vec::new();
        for record in self.inner.slots.list().await? {
            if process::is_pid_alive(record.pid) {
                running.push(record.code);
            } else {
                self.reconcile(&record).await?;
            }
        }
        Ok(running)
    }

    /// Slot record for `code` if its process is alive.
    pub async fn running_slot(&self, code: &str) -> Result<Option<SlotRecord>, TrackerError> {
        validate_code(code)?;
        let Some(record) = self.read_slot(code).await? else {
            return Ok(None);
        };
        if process::is_pid_alive(record.pid) {
            Ok(Some(record))
        } else {
            self.reconcile(&record).await?;
            Ok(None)
        }
    }

    pub async fn get_running_pid(&self, code: &str) -> Result<Option<u32>, TrackerError> {
        Ok(self.running_slot(code).await?.map(|record| record.pid))
    }

    pub async fn is_running(&self, code: &str) -> Result<bool, TrackerError> {
        Ok(self.running_slot(code).await?.is_some())
    }

    pub async fn termination_reason(&self, code: &str) -> Result<TerminationReason, TrackerError> {
        validate_code(code)?;
        self.inner.reasons.read(code).await
    }

    pub async fn clear_termination_reason(&self, code: &str) -> Result<(), TrackerError> {
        validate_code(code)?;
        let guard = self.acquire(code).await?;
        let result = self.inner.reasons.clear(code).await;
        release(guard);
        result
    }

    /// Clear every stored termination reason under the global lock.
    pub async fn clear_all_termination_reasons(&self) -> Result<usize, TrackerError> {
        let reasons = self.inner.reasons.clone();
        self.inner
            .locks
            .with_lock_waiting(GLOBAL_LOCK, &self.inner.settings.lock_backoff, || async move {
                reasons.clear_all().await
            })
            .await
    }

    /// Output channel for `code`, created on first use.
    pub fn output_channel(&self, code: &str) -> Arc<dyn OutputSink> {
        self.inner.outputs.get(code)
    }

    pub fn dispose_output_channel(&self, code: &str) -> bool {
        self.inner.outputs.dispose(code)
    }

    pub fn dispose_all_output_channels(&self) {
        self.inner.outputs.dispose_all();
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.inner.notifier
    }

    /// Classify an observed exit. Runs on the observer task, never under the
    /// caller's lock; takes the code's lock itself.
    async fn classify_exit(&self, code: &str, pid: u32, exit: ExitInfo) {
        let guard = match self.acquire(code).await {
            Ok(guard) => Some(guard),
            Err(e) => {
                warn!(code, pid, "Classifying exit without the slot lock: {e}");
                None
            }
        };

        if let Err(e) = self.classify_exit_locked(code, pid, exit).await {
            error!(code, pid, "Failed to record process exit: {e}");
            self.inner
                .notifier
                .error(&format!("Failed to record exit of `{code}`: {e}"));
        }

        if let Some(guard) = guard {
            release(guard);
        }
    }

    async fn classify_exit_locked(
        &self,
        code: &str,
        pid: u32,
        exit: ExitInfo,
    ) -> Result<(), TrackerError> {
        let slot = self.read_slot(code).await?;
        if slot.as_ref().is_some_and(|record| record.pid != pid) {
            debug!(code, pid, "Exit belongs to a superseded run; ignoring");
            return Ok(());
        }

        let reason = self.inner.reasons.read(code).await?;
        if slot.is_none() {
            // Already stopped or reconciled; whoever removed the slot recorded it.
            if reason == TerminationReason::UserRequested {
                self.journal(JournalEntry::exited(code, pid, exit));
            }
            debug!(code, pid, ?exit, "Exit observed after slot removal");
            return Ok(());
        }

        if reason == TerminationReason::UserRequested {
            debug!(code, pid, ?exit, "Process exited after stop request");
            self.journal(JournalEntry::exited(code, pid, exit));
        } else {
            self.record_crash(code, pid, exit).await?;
        }

        self.inner.slots.remove(code).await?;
        Ok(())
    }

    /// Mark `code` crashed and tell the notifier. Caller holds the code's lock.
    async fn record_crash(&self, code: &str, pid: u32, exit: ExitInfo) -> Result<(), TrackerError> {
        self.inner
            .reasons
            .write(code, TerminationReason::Crashed)
            .await?;
        let channel = self.inner.outputs.get(code);
        channel.append_line(&exit.marker_line());
        self.journal(JournalEntry::crashed(code, pid, exit));
        warn!(code, pid, exit_code = ?exit.code, signal = ?exit.signal, "Tracked process exited unexpectedly");

        if self.inner.notifier.crashed(code, &exit) == CrashResponse::ShowOutput {
            channel.show();
        }
        Ok(())
    }

    /// Settle `record`'s slot if it still names the same dead pid.
    ///
    /// A pid nobody asked to stop died unobserved (its tracker went away), so
    /// it is recorded as a crash with an unknown exit status. Skips silently
    /// when another operation holds the code's lock or when this tracker's own
    /// observer will classify the exit.
    async fn reconcile(&self, record: &SlotRecord) -> Result<(), TrackerError> {
        if self.inner.observed.lock().unwrap().contains(&record.pid) {
            debug!(code = %record.code, pid = record.pid, "Exit observer pending; skipping reconciliation");
            return Ok(());
        }
        let guard = match self.inner.locks.try_acquire(&code_lock(&record.code)).await {
            Ok(guard) => guard,
            Err(e) if e.is_contention() => {
                debug!(code = %record.code, "Slot busy; skipping reconciliation");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let still_dead = self
            .read_slot(&record.code)
            .await?
            .is_some_and(|current| current.pid == record.pid && !process::is_pid_alive(current.pid));
        if still_dead {
            let reason = self.inner.reasons.read(&record.code).await?;
            if reason == TerminationReason::UserRequested {
                self.journal(JournalEntry::reconciled(&record.code, record.pid));
                info!(code = %record.code, pid = record.pid, "Removed slot for stopped process");
            } else {
                let unknown = ExitInfo { code: None, signal: None };
                self.record_crash(&record.code, record.pid, unknown).await?;
            }
            self.inner.slots.remove(&record.code).await?;
        }

        release(guard);
        Ok(())
    }

    /// Read a slot, discarding a corrupt record as if it were absent.
    async fn read_slot(&self, code: &str) -> Result<Option<SlotRecord>, TrackerError> {
        match self.inner.slots.read(code).await {
            Err(TrackerError::CorruptRecord { path, message }) => {
                warn!(code, path = %path.display(), "Discarding corrupt slot record: {message}");
                self.inner.slots.remove(code).await?;
                Ok(None)
            }
            other => other,
        }
    }

    async fn acquire(&self, code: &str) -> Result<LockGuard, LockError> {
        self.inner
            .locks
            .acquire_with_backoff(&code_lock(code), &self.inner.settings.lock_backoff)
            .await
    }

    /// Append to the event journal. Failures are logged, never returned.
    fn journal(&self, entry: JournalEntry) {
        let mut journal = self.inner.journal.lock().unwrap();
        if journal.is_none() {
            match EventJournal::open(&self.inner.layout.journal_path()) {
                Ok(opened) => *journal = Some(opened),
                Err(e) => {
                    warn!("Failed to open event journal: {e:#}");
                    return;
                }
            }
        }
        if let Some(journal) = journal.as_mut() {
            if let Err(e) = journal.record(&entry) {
                warn!(path = %journal.path().display(), "Failed to write event journal: {e:#}");
            }
        }
    }
}

fn release(guard: LockGuard) {
    if let Err(e) = guard.release() {
        warn!("Failed to release lock: {e}");
    }
}

/// Stream the child's stdout/stderr into `sink`, one line at a time.
fn pipe_output(child: &mut Child, sink: Arc<dyn OutputSink>) -> Vec<JoinHandle<()>> {
    let mut readers = Vec::new();

    if let Some(stdout) = child.stdout.take() {
        let sink = sink.clone();
        readers.push(tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                sink.append_line(&line);
            }
        }));
    }

    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                sink.append_line(&format!("[stderr] {line}"));
            }
        }));
    }

    readers
}
