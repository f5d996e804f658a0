//! Persistent session list.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Maximum characters kept from the first message when titling a session.
const TITLE_MAX_CHARS: usize = 60;

/// A session known to this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Create a record titled after the opening message.
    #[must_use]
    pub fn new(session_id: impl Into<String>, first_message: &str) -> Self {
        Self {
            session_id: session_id.into(),
            title: make_title(first_message),
            created_at: Utc::now(),
        }
    }
}

fn make_title(first_message: &str) -> String {
    let trimmed = first_message.trim();
    if trimmed.is_empty() {
        return "Percakapan baru".to_string();
    }
    let mut title: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        title.push('…');
    }
    title
}

/// Ordered list of sessions, newest first, optionally backed by a JSON file.
///
/// Writes go to a temporary file that is then renamed over the target, so a
/// crash mid-write never leaves a truncated list behind.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    records: Vec<SessionRecord>,
    path: Option<PathBuf>,
}

impl SessionStore {
    /// Create an in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a file-backed store, loading existing records if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = match fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), sessions = records.len(), "Session store opened");
        Ok(Self {
            records,
            path: Some(path),
        })
    }

    /// Record a session if it is not already known. Returns whether it was added.
    pub fn insert_if_absent(&mut self, record: SessionRecord) -> Result<bool> {
        if self.contains(&record.session_id) {
            return Ok(false);
        }
        tracing::info!(session_id = %record.session_id, title = %record.title, "Session recorded");
        self.records.insert(0, record);
        self.persist()?;
        Ok(true)
    }

    /// Remove a session. Returns the removed record.
    pub fn remove(&mut self, session_id: &str) -> Result<Option<SessionRecord>> {
        let Some(pos) = self.records.iter().position(|r| r.session_id == session_id) else {
            return Ok(None);
        };
        let removed = self.records.remove(pos);
        self.persist()?;
        Ok(Some(removed))
    }

    #[must_use]
    pub fn contains(&self, session_id: &str) -> bool {
        self.records.iter().any(|r| r.session_id == session_id)
    }

    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<&SessionRecord> {
        self.records.iter().find(|r| r.session_id == session_id)
    }

    #[must_use]
    pub fn records(&self) -> &[SessionRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(&self.records)?;
        fs::write(&tmp, bytes)?;
        if let Err(rename_err) = fs::rename(&tmp, path) {
            if path.exists() {
                fs::remove_file(path)?;
                fs::rename(&tmp, path)?;
            } else {
                return Err(rename_err.into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_idempotent_and_newest_first() {
        let mut store = SessionStore::in_memory();
        assert!(store.insert_if_absent(SessionRecord::new("a", "pertama")).unwrap());
        assert!(store.insert_if_absent(SessionRecord::new("b", "kedua")).unwrap());
        assert!(!store.insert_if_absent(SessionRecord::new("a", "lagi")).unwrap());

        assert_eq!(store.len(), 2);
        assert_eq!(store.records()[0].session_id, "b");
        assert_eq!(store.get("a").unwrap().title, "pertama");
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sessions.json");

        let mut store = SessionStore::open(&path).unwrap();
        store.insert_if_absent(SessionRecord::new("s-1", "Analisis barang bukti")).unwrap();
        store.insert_if_absent(SessionRecord::new("s-2", "Cek putusan")).unwrap();
        store.remove("s-1").unwrap();

        let reloaded = SessionStore::open(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.records()[0].session_id, "s-2");
    }

    #[test]
    fn test_long_title_truncated() {
        let record = SessionRecord::new("x", &"kata ".repeat(40));
        assert_eq!(record.title.chars().count(), TITLE_MAX_CHARS + 1);
        assert_eq!(SessionRecord::new("y", "   ").title, "Percakapan baru");
    }
}
