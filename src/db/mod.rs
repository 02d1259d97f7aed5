use serde_json::value::RawValue;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::core::AlertRecord;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to read alert log {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("alert log JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to write alert log {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to back up unreadable alert log to {}: {source}", path.display())]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What is on disk right now.
enum LogState {
    Missing,
    /// Entries as their exact original JSON text.
    Entries(Vec<Box<RawValue>>),
    /// Present but not a JSON array.
    Unreadable(Vec<u8>),
}

/// Append-only JSON alert log: a single pretty-printed array of records.
///
/// Every append rewrites the whole document through a temp file in the same
/// directory and renames it over the destination, so the resident file is
/// always either the old or the new complete array. Prior entries are copied
/// through as raw JSON and never re-encoded.
#[derive(Debug)]
pub struct AlertLog {
    path: PathBuf,
}

/// Thread-safe wrapper around AlertLog. Appends are serialized.
#[derive(Debug, Clone)]
pub struct SharedAlertLog {
    inner: Arc<Mutex<AlertLog>>,
}

impl SharedAlertLog {
    pub fn open(path: &Path) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AlertLog::open(path))),
        }
    }

    /// Surface the alert on the operational channel, then persist it.
    /// The notice is emitted whether or not persistence succeeds.
    pub fn append(&self, record: &AlertRecord) -> Result<(), SinkError> {
        tracing::warn!("[ALERT] {} | {}", record.severity, record.message);
        let log = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        log.append(record)
    }

    pub fn load(&self) -> Result<Vec<AlertRecord>, SinkError> {
        let log = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        log.load()
    }
}

impl AlertLog {
    /// Point at `path`. Warns at startup if an existing file will be discarded.
    pub fn open(path: &Path) -> Self {
        let log = Self {
            path: path.to_path_buf(),
        };
        match log.read_state() {
            Ok(LogState::Missing) => {
                tracing::info!("Alert log {} will be created on first alert", path.display())
            }
            Ok(LogState::Entries(_)) => {}
            Ok(LogState::Unreadable(_)) => tracing::warn!(
                "Alert log {} is not a JSON array; it will be copied to {}[.N] and restarted on the next alert",
                path.display(),
                log.backup_path(0).display()
            ),
            Err(e) => tracing::warn!("{e}"),
        }
        log
    }

    /// `<log>.corrupt` for the first backup, `<log>.corrupt.N` after that.
    fn backup_path(&self, n: u32) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".corrupt");
        if n > 0 {
            name.push(format!(".{n}"));
        }
        PathBuf::from(name)
    }

    /// Copy unreadable contents to the first free backup name. Existing
    /// backups are never overwritten.
    fn back_up(&self, bytes: &[u8]) -> Result<PathBuf, SinkError> {
        let mut n = 0;
        loop {
            let path = self.backup_path(n);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(bytes)
                        .and_then(|()| file.sync_all())
                        .map_err(|source| SinkError::Backup {
                            path: path.clone(),
                            source,
                        })?;
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists && n < u32::MAX => n += 1,
                Err(source) => return Err(SinkError::Backup { path, source }),
            }
        }
    }

    fn read_state(&self) -> Result<LogState, SinkError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LogState::Missing),
            Err(source) => {
                return Err(SinkError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(LogState::Entries(Vec::new()));
        }
        match serde_json::from_slice::<Vec<Box<RawValue>>>(&bytes) {
            Ok(entries) => Ok(LogState::Entries(entries)),
            Err(_) => Ok(LogState::Unreadable(bytes)),
        }
    }

    /// All records in append order.
    pub fn load(&self) -> Result<Vec<AlertRecord>, SinkError> {
        match self.read_state()? {
            LogState::Missing | LogState::Unreadable(_) => Ok(Vec::new()),
            LogState::Entries(entries) => entries
                .iter()
                .map(|raw| serde_json::from_str(raw.get()).map_err(SinkError::from))
                .collect(),
        }
    }

    /// Append one record. On error the file on disk is left as it was.
    pub fn append(&self, record: &AlertRecord) -> Result<(), SinkError> {
        let mut entries = match self.read_state()? {
            LogState::Missing => Vec::new(),
            LogState::Entries(entries) => entries,
            LogState::Unreadable(bytes) => {
                let backup = self.back_up(&bytes)?;
                tracing::warn!(
                    "Alert log {} is unreadable, treating it as empty; previous contents saved to {}",
                    self.path.display(),
                    backup.display()
                );
                Vec::new()
            }
        };
        entries.push(encode_entry(record)?);
        self.persist(&entries)
    }

    fn persist(&self, entries: &[Box<RawValue>]) -> Result<(), SinkError> {
        let write_err = |source: std::io::Error| SinkError::Write {
            path: self.path.clone(),
            source,
        };
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(write_err)?;

        // Dropped (and deleted) on every early return below.
        let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
        serde_json::to_writer_pretty(&mut tmp, entries)?;
        tmp.write_all(b"\n").map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;
        Ok(())
    }
}

/// Pretty-print a record indented one level, as it sits inside the array.
fn encode_entry(record: &AlertRecord) -> Result<Box<RawValue>, SinkError> {
    let pretty = serde_json::to_string_pretty(record)?.replace('\n', "\n  ");
    Ok(RawValue::from_string(pretty)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Chain, Severity, WatchedAddress};
    use chrono::{TimeZone, Utc};

    fn record(n: u64) -> AlertRecord {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, n as u32 % 60).unwrap();
        let target = WatchedAddress::new(Chain::Utxo, "bc1qwatched", "cold");
        let mut r = AlertRecord::new(at, &target, &format!("tx{n}"), Severity::High, format!("alert {n}"));
        r.value_sats = Some(u128::from(n) * 1_000);
        r
    }

    fn wei_record() -> AlertRecord {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let target = WatchedAddress::new(Chain::Account, "0xabc", "hot");
        let mut r = AlertRecord::new(at, &target, "0xhash", Severity::High, "big".into());
        r.value_wei = Some(123_000_000_000_000_000_000_000);
        r
    }

    #[test]
    fn first_append_creates_single_element_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");
        let log = AlertLog::open(&path);

        log.append(&record(1)).unwrap();

        let parsed: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 1);
        assert_eq!(log.load().unwrap(), vec![record(1)]);
    }

    #[test]
    fn second_append_keeps_first_entry_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");
        let log = AlertLog::open(&path);

        log.append(&record(1)).unwrap();
        let after_first = std::fs::read_to_string(&path).unwrap();
        log.append(&record(2)).unwrap();
        let after_second = std::fs::read_to_string(&path).unwrap();

        assert_eq!(log.load().unwrap(), vec![record(1), record(2)]);
        let first_entry = after_first.trim_end().trim_end_matches(']').trim_end();
        assert!(after_second.starts_with(first_entry));
    }

    #[test]
    fn n_appends_reload_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = AlertLog::open(&dir.path().join("alerts.json"));
        let records: Vec<AlertRecord> = (0..25).map(record).collect();
        for r in &records {
            log.append(r).unwrap();
        }
        assert_eq!(log.load().unwrap(), records);
    }

    #[test]
    fn large_wei_values_survive() {
        let dir = tempfile::tempdir().unwrap();
        let log = AlertLog::open(&dir.path().join("alerts.json"));
        log.append(&wei_record()).unwrap();
        assert_eq!(log.load().unwrap(), vec![wei_record()]);
    }

    #[test]
    fn foreign_entries_are_copied_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");
        let legacy = "[\n  {\n    \"tx_hash\": \"0x1\",\n    \"note\":   \"odd   spacing\"\n  }\n]";
        std::fs::write(&path, legacy).unwrap();

        AlertLog::open(&path).append(&record(7)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("{\n    \"tx_hash\": \"0x1\",\n    \"note\":   \"odd   spacing\"\n  }"));
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
        assert_eq!(parsed[1]["tx_id"], "tx7");
    }

    #[test]
    fn corrupt_log_restarts_and_is_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");
        std::fs::write(&path, "[{\"truncated\": ").unwrap();
        let log = AlertLog::open(&path);

        log.append(&record(1)).unwrap();

        assert_eq!(log.load().unwrap(), vec![record(1)]);
        let backup = std::fs::read_to_string(dir.path().join("alerts.json.corrupt")).unwrap();
        assert_eq!(backup, "[{\"truncated\": ");
    }

    #[test]
    fn second_corruption_keeps_first_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");
        let log = AlertLog::open(&path);

        std::fs::write(&path, "FIRST-CORRUPTION").unwrap();
        log.append(&record(1)).unwrap();
        std::fs::write(&path, "SECOND-CORRUPTION").unwrap();
        log.append(&record(2)).unwrap();

        let first = std::fs::read_to_string(dir.path().join("alerts.json.corrupt")).unwrap();
        let second = std::fs::read_to_string(dir.path().join("alerts.json.corrupt.1")).unwrap();
        assert_eq!(first, "FIRST-CORRUPTION");
        assert_eq!(second, "SECOND-CORRUPTION");
        assert_eq!(log.load().unwrap(), vec![record(2)]);
    }

    #[test]
    fn non_array_document_counts_as_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");
        std::fs::write(&path, "{\"alerts\": []}").unwrap();
        let log = AlertLog::open(&path);
        assert!(log.load().unwrap().is_empty());
        log.append(&record(3)).unwrap();
        assert_eq!(log.load().unwrap(), vec![record(3)]);
    }

    #[test]
    fn empty_file_is_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");
        std::fs::write(&path, "").unwrap();
        let log = AlertLog::open(&path);
        log.append(&record(1)).unwrap();
        assert_eq!(log.load().unwrap().len(), 1);
        assert!(!dir.path().join("alerts.json.corrupt").exists());
    }

    #[test]
    fn creates_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("alerts.json");
        AlertLog::open(&path).append(&record(1)).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn unreadable_path_fails_without_touching_other_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");
        let log = AlertLog::open(&path);
        log.append(&record(1)).unwrap();
        let before = std::fs::read(&path).unwrap();

        // The existing log file sits where the parent directory should be, so
        // the read fails before any temp file is created.
        let blocked = AlertLog::open(&path.join("child.json"));
        assert!(blocked.append(&record(2)).is_err());

        assert_eq!(std::fs::read(&path).unwrap(), before);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn shared_log_serializes_concurrent_appends() {
        let dir = tempfile::tempdir().unwrap();
        let shared = SharedAlertLog::open(&dir.path().join("alerts.json"));
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let shared = shared.clone();
                std::thread::spawn(move || shared.append(&record(n)).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let mut ids: Vec<String> = shared.load().unwrap().into_iter().map(|r| r.tx_id).collect();
        ids.sort();
        assert_eq!(ids.len(), 8);
        ids.dedup();
        assert_eq!(ids.len(), 8);
    }
}
