//! Persistent record of indexing progress so an interrupted run can resume.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const CHECKPOINT_VERSION: &str = "1.0";
pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Indexed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCheckpoint {
    pub path: String,
    pub hash: String,
    pub size: u64,
    pub mod_time: i64,
    pub status: FileStatus,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCheckpoint {
    pub version: String,
    pub store_name: String,
    pub source_path: String,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    #[serde(default)]
    pub processed_files: HashMap<String, FileCheckpoint>,
    #[serde(default)]
    pub total_files: usize,
    #[serde(default)]
    pub indexed_count: usize,
    #[serde(default)]
    pub skipped_count: usize,
    #[serde(default)]
    pub failed_count: usize,
}

impl IndexCheckpoint {
    fn new(store_name: &str, source_path: &str) -> Self {
        let now = Utc::now();
        Self {
            version: CHECKPOINT_VERSION.to_owned(),
            store_name: store_name.to_owned(),
            source_path: source_path.to_owned(),
            start_time: now,
            last_update: now,
            processed_files: HashMap::new(),
            total_files: 0,
            indexed_count: 0,
            skipped_count: 0,
            failed_count: 0,
        }
    }

    /// Every discovered file either succeeded or was skipped.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.total_files > 0 && self.indexed_count + self.skipped_count >= self.total_files
    }

    fn count_mut(&mut self, status: FileStatus) -> &mut usize {
        match status {
            FileStatus::Indexed => &mut self.indexed_count,
            FileStatus::Skipped => &mut self.skipped_count,
            FileStatus::Failed => &mut self.failed_count,
        }
    }

    /// One-line description for logs.
    #[must_use]
    pub fn summary(&self) -> String {
        let done = self.processed_files.len();
        let pct = if self.total_files > 0 {
            #[allow(clippy::cast_precision_loss)]
            let p = done as f64 * 100.0 / self.total_files as f64;
            format!(" ({p:.1}%)")
        } else {
            String::new()
        };
        format!(
            "{done}/{} files{pct}, {} indexed, {} skipped, {} failed, started {}",
            self.total_files,
            self.indexed_count,
            self.skipped_count,
            self.failed_count,
            self.start_time.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// Change-detection fingerprint of a file.
#[must_use]
pub fn file_hash(path: &str, size: u64, mod_time: i64) -> String {
    blake3::hash(format!("{path}:{size}:{mod_time}").as_bytes())
        .to_hex()
        .to_string()
}

#[derive(Debug, Default)]
struct State {
    current: Option<IndexCheckpoint>,
    last_save: Option<Instant>,
    dirty: bool,
}

/// Owns one checkpoint file per `(store, source path)` pair.
#[derive(Debug)]
pub struct CheckpointManager {
    enabled: bool,
    store_name: String,
    source_path: String,
    path: PathBuf,
    save_interval: Duration,
    state: Mutex<State>,
}

impl CheckpointManager {
    #[must_use]
    pub fn new(store_name: &str, source_path: &str, dir: Option<&Path>, enabled: bool) -> Self {
        let dir = dir.map_or_else(|| std::env::temp_dir().join("strata-checkpoints"), Path::to_path_buf);
        let key = blake3::hash(format!("{store_name}:{source_path}").as_bytes()).to_hex();
        let path = dir.join(format!("checkpoint_{}.json", &key.as_str()[..16]));
        Self {
            enabled,
            store_name: store_name.to_owned(),
            source_path: source_path.to_owned(),
            path,
            save_interval: DEFAULT_SAVE_INTERVAL,
            state: Mutex::new(State::default()),
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::new("", "", None, false)
    }

    #[must_use]
    pub fn with_save_interval(mut self, interval: Duration) -> Self {
        self.save_interval = interval;
        self
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn file_path(&self) -> &Path {
        &self.path
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read the checkpoint file and make it the current checkpoint.
    /// Missing and unreadable files both yield `None`.
    pub async fn load(&self) -> Option<IndexCheckpoint> {
        if !self.enabled {
            return None;
        }
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "failed to read checkpoint: {e}");
                return None;
            }
        };
        let checkpoint: IndexCheckpoint = match serde_json::from_slice(&bytes) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "ignoring corrupt checkpoint: {e}");
                return None;
            }
        };
        tracing::info!(store = %self.store_name, "loaded checkpoint: {}", checkpoint.summary());
        self.state().current = Some(checkpoint.clone());
        Some(checkpoint)
    }

    /// Start tracking a run, keeping a loaded checkpoint if there is one.
    pub fn begin(&self) {
        if !self.enabled {
            return;
        }
        let mut state = self.state();
        if state.current.is_none() {
            state.current = Some(IndexCheckpoint::new(&self.store_name, &self.source_path));
        }
        state.dirty = true;
    }

    pub fn set_total(&self, total: usize) {
        if let Some(cp) = self.state().current.as_mut() {
            cp.total_files = total;
        }
    }

    /// Whether `path` still needs work: unseen, changed, or previously failed.
    #[must_use]
    pub fn should_process(&self, path: &str, size: u64, mod_time: i64) -> bool {
        let state = self.state();
        let Some(cp) = state.current.as_ref() else {
            return true;
        };
        match cp.processed_files.get(path) {
            None => true,
            Some(entry) => {
                entry.status == FileStatus::Failed || entry.hash != file_hash(path, size, mod_time)
            }
        }
    }

    pub fn record(&self, path: &str, size: u64, mod_time: i64, status: FileStatus) {
        if !self.enabled {
            return;
        }
        let mut state = self.state();
        let Some(cp) = state.current.as_mut() else {
            return;
        };
        let entry = FileCheckpoint {
            path: path.to_owned(),
            hash: file_hash(path, size, mod_time),
            size,
            mod_time,
            status,
            processed_at: Utc::now(),
        };
        if let Some(previous) = cp.processed_files.insert(path.to_owned(), entry) {
            let count = cp.count_mut(previous.status);
            *count = count.saturating_sub(1);
        }
        *cp.count_mut(status) += 1;
        cp.last_update = Utc::now();
        state.dirty = true;
    }

    #[must_use]
    pub fn current(&self) -> Option<IndexCheckpoint> {
        self.state().current.clone()
    }

    /// Persist if the save interval has elapsed since the last write.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn save(&self) -> Result<()> {
        self.write(false).await
    }

    /// Persist now, ignoring the save interval.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn flush(&self) -> Result<()> {
        self.write(true).await
    }

    async fn write(&self, force: bool) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let json = {
            let mut state = self.state();
            let due = state
                .last_save
                .is_none_or(|t| t.elapsed() >= self.save_interval);
            if !state.dirty || (!force && !due) {
                return Ok(());
            }
            let Some(cp) = state.current.as_ref() else {
                return Ok(());
            };
            let json = serde_json::to_vec_pretty(cp)?;
            state.last_save = Some(Instant::now());
            state.dirty = false;
            json
        };

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::debug!(path = %self.path.display(), "checkpoint saved");
        Ok(())
    }

    /// Delete the file and forget the current checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub async fn clear(&self) -> Result<()> {
        {
            let mut state = self.state();
            state.current = None;
            state.dirty = false;
        }
        if !self.enabled {
            return Ok(());
        }
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::info!(store = %self.store_name, "checkpoint cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(dir: &Path) -> CheckpointManager {
        CheckpointManager::new("docs", "/data/docs", Some(dir), true)
    }

    #[test]
    fn file_name_is_stable_per_store_and_source() {
        let dir = Path::new("/tmp/cp");
        let a = manager(dir);
        let b = manager(dir);
        let c = CheckpointManager::new("other", "/data/docs", Some(dir), true);
        assert_eq!(a.file_path(), b.file_path());
        assert_ne!(a.file_path(), c.file_path());
        let name = a.file_path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("checkpoint_") && name.ends_with(".json"));
        assert_eq!(name.len(), "checkpoint_".len() + 16 + ".json".len());
    }

    #[test]
    fn should_process_rules() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        assert!(m.should_process("a.txt", 10, 100));

        m.begin();
        m.record("a.txt", 10, 100, FileStatus::Indexed);
        m.record("b.txt", 5, 100, FileStatus::Failed);
        assert!(!m.should_process("a.txt", 10, 100));
        assert!(m.should_process("a.txt", 11, 100));
        assert!(m.should_process("a.txt", 10, 101));
        assert!(m.should_process("b.txt", 5, 100));
        assert!(m.should_process("c.txt", 1, 1));
    }

    #[test]
    fn re_recording_moves_counts() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        m.begin();
        m.record("a", 1, 1, FileStatus::Failed);
        m.record("a", 1, 1, FileStatus::Indexed);
        let cp = m.current().unwrap();
        assert_eq!((cp.indexed_count, cp.failed_count), (1, 0));
    }

    #[test]
    fn completeness() {
        let mut cp = IndexCheckpoint::new("s", "/p");
        assert!(!cp.is_complete());
        cp.total_files = 3;
        cp.indexed_count = 2;
        cp.failed_count = 1;
        assert!(!cp.is_complete());
        cp.skipped_count = 1;
        assert!(cp.is_complete());
    }

    #[tokio::test]
    async fn flush_load_clear_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        m.begin();
        m.record("a.txt", 10, 100, FileStatus::Indexed);
        m.set_total(2);
        m.flush().await.unwrap();
        assert!(m.file_path().exists());

        let fresh = manager(dir.path());
        let loaded = fresh.load().await.unwrap();
        assert_eq!(loaded.version, CHECKPOINT_VERSION);
        assert_eq!(loaded.total_files, 2);
        assert_eq!(loaded.indexed_count, 1);
        assert!(!fresh.should_process("a.txt", 10, 100));

        fresh.clear().await.unwrap();
        assert!(!fresh.file_path().exists());
        assert!(fresh.load().await.is_none());
        fresh.clear().await.unwrap();
    }

    #[tokio::test]
    async fn save_is_throttled() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path()).with_save_interval(Duration::from_secs(3600));
        m.begin();
        m.save().await.unwrap();
        assert!(m.file_path().exists());

        m.record("late.txt", 1, 1, FileStatus::Indexed);
        m.save().await.unwrap();
        let on_disk: IndexCheckpoint =
            serde_json::from_slice(&std::fs::read(m.file_path()).unwrap()).unwrap();
        assert!(on_disk.processed_files.is_empty());

        m.flush().await.unwrap();
        let on_disk: IndexCheckpoint =
            serde_json::from_slice(&std::fs::read(m.file_path()).unwrap()).unwrap();
        assert_eq!(on_disk.processed_files.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        std::fs::write(m.file_path(), b"{not json").unwrap();
        assert!(m.load().await.is_none());
    }

    #[tokio::test]
    async fn disabled_manager_is_inert() {
        let m = CheckpointManager::disabled();
        m.begin();
        m.record("a", 1, 1, FileStatus::Indexed);
        m.flush().await.unwrap();
        assert!(m.current().is_none());
        assert!(m.load().await.is_none());
    }
}
