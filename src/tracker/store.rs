//! Persisted per-code state: slot records and termination reasons.
//!
//! Both stores keep one small file per code. Callers are expected to hold the
//! code's lock while mutating; the stores themselves do no locking.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::types::{SlotRecord, TerminationReason};
use crate::error::TrackerError;

const SLOT_EXTENSION: &str = "json";

fn store_err(path: &Path) -> impl FnOnce(std::io::Error) -> TrackerError + '_ {
    move |source| TrackerError::Store {
        path: path.to_path_buf(),
        source,
    }
}

async fn remove_if_present(path: &Path) -> Result<bool, TrackerError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(store_err(path)(e)),
    }
}

/// Write `contents` to `path` via a sibling temp file and rename.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), TrackerError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir).await.map_err(store_err(dir))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{file_name}.tmp"));

    tokio::fs::write(&tmp, contents).await.map_err(store_err(&tmp))?;
    tokio::fs::rename(&tmp, path).await.map_err(store_err(path))
}

/// One JSON record per code mapping it to the tracked pid.
#[derive(Debug, Clone)]
pub struct SlotStore {
    dir: PathBuf,
}

impl SlotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, code: &str) -> PathBuf {
        self.dir.join(format!("{code}.{SLOT_EXTENSION}"))
    }

    /// Read the record for `code`; `None` means no slot.
    pub async fn read(&self, code: &str) -> Result<Option<SlotRecord>, TrackerError> {
        let path = self.path_for(code);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_err(&path)(e)),
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| TrackerError::CorruptRecord {
                path,
                message: e.to_string(),
            })
    }

    /// Replace the record for `record.code` wholesale.
    pub async fn write(&self, record: &SlotRecord) -> Result<(), TrackerError> {
        let path = self.path_for(&record.code);
        let json = serde_json::to_vec_pretty(record).map_err(|e| TrackerError::CorruptRecord {
            path: path.clone(),
            message: e.to_string(),
        })?;
        write_atomic(&path, &json).await
    }

    /// Remove the record for `code`. Returns whether a record existed.
    pub async fn remove(&self, code: &str) -> Result<bool, TrackerError> {
        remove_if_present(&self.path_for(code)).await
    }

    /// All readable records, sorted by code. Corrupt records are skipped with
    /// a warning.
    pub async fn list(&self) -> Result<Vec<SlotRecord>, TrackerError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(store_err(&self.dir)(e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(store_err(&self.dir))? {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || path.extension().is_none_or(|ext| ext != SLOT_EXTENSION) {
                continue;
            }
            let Some(code) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            match self.read(&code).await {
                Ok(Some(record)) => records.push(record),
                // Removed between listing and reading.
                Ok(None) => {}
                Err(e) => warn!(code, "Skipping unreadable slot record: {e}"),
            }
        }

        records.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(records)
    }
}

/// One text file per code holding its [`TerminationReason`].
#[derive(Debug, Clone)]
pub struct ReasonStore {
    dir: PathBuf,
}

impl ReasonStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, code: &str) -> PathBuf {
        self.dir.join(code)
    }

    /// Current reason for `code`, `None` when unset or unreadable.
    pub async fn read(&self, code: &str) -> Result<TerminationReason, TrackerError> {
        let path = self.path_for(code);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(contents.parse().unwrap_or_else(|e| {
                warn!(code, "Ignoring unreadable termination reason: {e}");
                TerminationReason::None
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(TerminationReason::None),
            Err(e) => Err(store_err(&path)(e)),
        }
    }

    pub async fn write(&self, code: &str, reason: TerminationReason) -> Result<(), TrackerError> {
        write_atomic(&self.path_for(code), reason.as_str().as_bytes()).await
    }

    pub async fn clear(&self, code: &str) -> Result<(), TrackerError> {
        remove_if_present(&self.path_for(code)).await.map(|_| ())
    }

    /// Remove every stored reason. Returns how many were removed.
    pub async fn clear_all(&self) -> Result<usize, TrackerError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(store_err(&self.dir)(e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await.map_err(store_err(&self.dir))? {
            if remove_if_present(&entry.path()).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(code: &str, pid: u32) -> SlotRecord {
        SlotRecord {
            code: code.to_string(),
            pid,
            namespace: "ns".to_string(),
            program: "sleep".to_string(),
            args: vec!["30".to_string()],
            started_at: "2026-01-01T00:00:00+00:00".to_string(),
        }
    }

    #[tokio::test]
    async fn slot_write_read_remove() {
        let tmp = TempDir::new().unwrap();
        let store = SlotStore::new(tmp.path().join("slots"));

        assert_eq!(store.read("web").await.unwrap(), None);
        store.write(&record("web", 42)).await.unwrap();
        assert_eq!(store.read("web").await.unwrap().unwrap().pid, 42);

        // Rewritten wholesale on respawn.
        store.write(&record("web", 43)).await.unwrap();
        assert_eq!(store.read("web").await.unwrap().unwrap().pid, 43);

        assert!(store.remove("web").await.unwrap());
        assert!(!store.remove("web").await.unwrap());
        assert_eq!(store.read("web").await.unwrap(), None);
    }

    #[tokio::test]
    async fn slot_record_is_human_readable() {
        let tmp = TempDir::new().unwrap();
        let store = SlotStore::new(tmp.path());
        store.write(&record("api", 1234)).await.unwrap();

        let raw = std::fs::read_to_string(store.path_for("api")).unwrap();
        assert!(raw.contains("\"pid\": 1234"), "raw record: {raw}");
    }

    #[tokio::test]
    async fn list_skips_corrupt_and_temp_files() {
        let tmp = TempDir::new().unwrap();
        let store = SlotStore::new(tmp.path());
        store.write(&record("b", 2)).await.unwrap();
        store.write(&record("a", 1)).await.unwrap();
        std::fs::write(tmp.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(tmp.path().join(".c.json.tmp"), "{}").unwrap();

        let codes: Vec<String> = store.list().await.unwrap().into_iter().map(|r| r.code).collect();
        assert_eq!(codes, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn list_of_missing_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = SlotStore::new(tmp.path().join("never-created"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reason_defaults_to_none_and_clears() {
        let tmp = TempDir::new().unwrap();
        let reasons = ReasonStore::new(tmp.path().join("reasons"));

        assert_eq!(reasons.read("web").await.unwrap(), TerminationReason::None);
        reasons.write("web", TerminationReason::Crashed).await.unwrap();
        assert_eq!(reasons.read("web").await.unwrap(), TerminationReason::Crashed);

        reasons.clear("web").await.unwrap();
        assert_eq!(reasons.read("web").await.unwrap(), TerminationReason::None);
        // Clearing twice is fine.
        reasons.clear("web").await.unwrap();
    }

    #[tokio::test]
    async fn clear_all_removes_every_reason() {
        let tmp = TempDir::new().unwrap();
        let reasons = ReasonStore::new(tmp.path());
        reasons.write("a", TerminationReason::Crashed).await.unwrap();
        reasons.write("b", TerminationReason::UserRequested).await.unwrap();

        assert_eq!(reasons.clear_all().await.unwrap(), 2);
        assert_eq!(reasons.read("a").await.unwrap(), TerminationReason::None);
        assert_eq!(reasons.read("b").await.unwrap(), TerminationReason::None);
    }
}
