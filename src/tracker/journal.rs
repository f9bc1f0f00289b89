//! JSONL event journal for tracked processes.
//!
//! Every lifecycle transition is appended as one JSON object per line to
//! `events.jsonl` in the namespace directory, so a restarted host (or a human)
//! can see what happened to each code.
//!
//! Uses synchronous `std::fs` since writes are small and flushed after each
//! event.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use super::types::{ExitInfo, StopOutcome};

/// Returns the current UTC time as an ISO 8601 string with milliseconds.
fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// A structured journal entry serialized as a single JSON line.
#[derive(Debug, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum JournalEntry {
    Spawned {
        timestamp: String,
        code: String,
        pid: u32,
        command: String,
    },
    StopRequested {
        timestamp: String,
        code: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
    },
    Stopped {
        timestamp: String,
        code: String,
        pid: u32,
        outcome: StopOutcome,
    },
    /// Exit observed after a stop request.
    Exited {
        timestamp: String,
        code: String,
        pid: u32,
        exit: ExitInfo,
    },
    Crashed {
        timestamp: String,
        code: String,
        pid: u32,
        exit: ExitInfo,
    },
    /// A slot whose pid was found dead was removed.
    Reconciled {
        timestamp: String,
        code: String,
        pid: u32,
    },
}

impl JournalEntry {
    pub fn spawned(code: &str, pid: u32, command: String) -> Self {
        JournalEntry::Spawned {
            timestamp: now_iso(),
            code: code.to_string(),
            pid,
            command,
        }
    }

    pub fn stop_requested(code: &str, pid: Option<u32>) -> Self {
        JournalEntry::StopRequested {
            timestamp: now_iso(),
            code: code.to_string(),
            pid,
        }
    }

    pub fn stopped(code: &str, pid: u32, outcome: StopOutcome) -> Self {
        JournalEntry::Stopped {
            timestamp: now_iso(),
            code: code.to_string(),
            pid,
            outcome,
        }
    }

    pub fn exited(code: &str, pid: u32, exit: ExitInfo) -> Self {
        JournalEntry::Exited {
            timestamp: now_iso(),
            code: code.to_string(),
            pid,
            exit,
        }
    }

    pub fn crashed(code: &str, pid: u32, exit: ExitInfo) -> Self {
        JournalEntry::Crashed {
            timestamp: now_iso(),
            code: code.to_string(),
            pid,
            exit,
        }
    }

    pub fn reconciled(code: &str, pid: u32) -> Self {
        JournalEntry::Reconciled {
            timestamp: now_iso(),
            code: code.to_string(),
            pid,
        }
    }
}

/// Append-only JSONL writer.
pub struct EventJournal {
    writer: BufWriter<fs::File>,
    path: PathBuf,
}

impl EventJournal {
    /// Open (or create) the journal at `path`, creating parent directories.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Serialize an entry as a single JSON line and flush.
    pub fn record(&mut self, entry: &JournalEntry) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.writer, entry)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;
    use tempfile::TempDir;

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        let file = fs::File::open(path).expect("open journal");
        std::io::BufReader::new(file)
            .lines()
            .map(|line| serde_json::from_str(&line.unwrap()).expect("valid JSON"))
            .collect()
    }

    #[test]
    fn creates_parent_dirs() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ns").join("events.jsonl");
        let journal = EventJournal::open(&path).unwrap();
        assert!(journal.path().exists());
    }

    #[test]
    fn spawned_entry_shape() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("events.jsonl");
        let mut journal = EventJournal::open(&path).unwrap();

        journal
            .record(&JournalEntry::spawned("web", 4242, "npm run dev".into()))
            .unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["event_type"], "spawned");
        assert_eq!(lines[0]["code"], "web");
        assert_eq!(lines[0]["pid"], 4242);
        assert!(lines[0]["timestamp"].is_string());
    }

    #[test]
    fn stop_requested_without_pid_omits_field() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("events.jsonl");
        let mut journal = EventJournal::open(&path).unwrap();

        journal.record(&JournalEntry::stop_requested("web", None)).unwrap();
        journal
            .record(&JournalEntry::stopped("web", 7, StopOutcome::Killed))
            .unwrap();
        journal
            .record(&JournalEntry::crashed("api", 8, ExitInfo { code: Some(1), signal: None }))
            .unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].get("pid").is_none());
        assert_eq!(lines[1]["outcome"], "killed");
        assert_eq!(lines[2]["event_type"], "crashed");
        assert_eq!(lines[2]["exit"]["code"], 1);
    }

    #[test]
    fn reopening_appends() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("events.jsonl");
        EventJournal::open(&path)
            .unwrap()
            .record(&JournalEntry::reconciled("a", 1))
            .unwrap();
        EventJournal::open(&path)
            .unwrap()
            .record(&JournalEntry::reconciled("b", 2))
            .unwrap();
        assert_eq!(read_lines(&path).len(), 2);
    }
}
