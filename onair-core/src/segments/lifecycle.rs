// Segment lifecycle manager
//
// Lifecycle: active directory -> trash -> erased.
//
// - Cap enforcement: once the active directory holds more segments than the
//   configured cap, the oldest surplus moves to trash and is marked archived.
// - Retention expiry: segments whose time in trash exceeds the retention
//   window are erased, marked deleted, and pruned from the ledger.
//
// This is the only writer of segment status transitions. Failed file
// operations leave the segment where it was, with its previous status, so the
// next cycle retries it.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::fs;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing as log;

use crate::config::{LifecycleConfig, PathsConfig};
use crate::error::{Error, Result};
use crate::ledger::{Ledger, SegmentStatus};

use super::list_segments;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleStats {
    pub active_segments: usize,
    pub trash_segments: usize,
    pub trash_size_bytes: u64,
    pub max_active_segments: usize,
    pub retention_seconds: u64,
}

pub struct SegmentLifecycleManager {
    active_dir: PathBuf,
    trash_dir: PathBuf,
    playlist_name: String,
    extension: String,
    config: LifecycleConfig,
    ledger: Arc<Ledger>,
    /// Segment name -> time it entered trash
    trash_entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl SegmentLifecycleManager {
    pub fn new(
        paths: &PathsConfig,
        extension: impl Into<String>,
        config: LifecycleConfig,
        ledger: Arc<Ledger>,
    ) -> Self {
        Self {
            active_dir: paths.active_dir.clone(),
            trash_dir: paths.trash_dir.clone(),
            playlist_name: paths.playlist_name.clone(),
            extension: extension.into(),
            config,
            ledger,
            trash_entries: Mutex::new(HashMap::new()),
        }
    }

    /// Create the directories and adopt segments left in trash by a previous run.
    ///
    /// Adopted segments are stamped with the current time, so they are kept for
    /// one full retention window from startup. Returns the number adopted.
    pub async fn init(&self) -> Result<usize> {
        for dir in [&self.active_dir, &self.trash_dir] {
            fs::create_dir_all(dir).await.map_err(|e| Error::io(dir, e))?;
        }

        let leftovers = list_segments(&self.trash_dir, &self.extension).await?;
        let now = Utc::now();
        let mut entries = self.trash_entries.lock();
        let mut adopted = 0;
        for file in leftovers {
            if !entries.contains_key(&file.name) {
                entries.insert(file.name, now);
                adopted += 1;
            }
        }
        drop(entries);

        if adopted > 0 {
            log::info!("Adopted {} segments already in trash", adopted);
        }
        Ok(adopted)
    }

    /// Remove every file in the active directory except the playlist and the
    /// ledger file.
    ///
    /// Subdirectories (including trash) are left alone. Ledger records of the
    /// removed segments are cleaned up by the next [`Self::reconcile`].
    pub async fn purge_active(&self) -> Result<usize> {
        let mut entries = match fs::read_dir(&self.active_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::io(&self.active_dir, e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::io(&self.active_dir, e))?
        {
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if file_type.is_dir()
                || entry.file_name() == self.playlist_name.as_str()
                || entry.path() == self.ledger.path()
            {
                continue;
            }

            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Failed to delete {:?} at startup: {}", entry.path(), e),
            }
        }

        log::info!("Startup cleanup removed {} files from {:?}", removed, self.active_dir);
        Ok(removed)
    }

    /// Move the oldest surplus segments to trash. Returns the number moved.
    pub async fn enforce_cap(&self) -> usize {
        let active = match list_segments(&self.active_dir, &self.extension).await {
            Ok(files) => files,
            Err(e) => {
                log::warn!("Failed to list active segments: {}", e);
                return 0;
            }
        };

        if active.len() <= self.config.max_active_segments {
            return 0;
        }

        let surplus = active.len() - self.config.max_active_segments;
        let mut moved = Vec::with_capacity(surplus);
        for file in active.into_iter().take(surplus) {
            let destination = self.trash_dir.join(&file.name);
            if fs::try_exists(&destination).await.unwrap_or(false) {
                log::debug!("Replacing older trashed copy of {}", file.name);
            }
            match move_file(&file.path, &destination).await {
                Ok(()) => {
                    self.trash_entries.lock().insert(file.name.clone(), Utc::now());
                    log::debug!("Moved to trash: {}", file.name);
                    moved.push(file.name);
                }
                Err(e) => log::warn!("Failed to move {} to trash: {}", file.name, e),
            }
        }

        if !moved.is_empty() {
            self.ledger
                .transition_many(
                    moved.iter().map(String::as_str),
                    SegmentStatus::Active,
                    SegmentStatus::Archived,
                )
                .await;
            log::info!("Moved {} old segments to trash", moved.len());
        }
        moved.len()
    }

    /// Erase trashed segments older than the retention window
    pub async fn expire_trash(&self) -> usize {
        self.expire_trash_at(Utc::now()).await
    }

    /// Retention expiry evaluated at `now`. Returns the number erased.
    pub async fn expire_trash_at(&self, now: DateTime<Utc>) -> usize {
        let retention = self.config.retention();
        let mut expired: Vec<String> = self
            .trash_entries
            .lock()
            .iter()
            .filter(|(_, entered)| {
                (now - **entered)
                    .to_std()
                    .is_ok_and(|age| age > retention)
            })
            .map(|(name, _)| name.clone())
            .collect();
        expired.sort();

        let mut deleted = Vec::with_capacity(expired.len());
        for name in expired {
            let path = self.trash_dir.join(&name);
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    log::debug!("Trashed segment {} already gone", name);
                }
                Err(e) => {
                    log::warn!("Failed to delete {}: {}", name, e);
                    continue;
                }
            }
            self.trash_entries.lock().remove(&name);
            deleted.push(name);
        }

        if !deleted.is_empty() {
            self.ledger
                .transition_many(
                    deleted.iter().map(String::as_str),
                    SegmentStatus::Archived,
                    SegmentStatus::Deleted,
                )
                .await;
            log::info!("Permanently deleted {} segments from trash", deleted.len());
            self.ledger.prune_deleted().await;
        }
        deleted.len()
    }

    /// Bring ledger statuses back in line with where the files actually are.
    ///
    /// - `active` records whose file sits only in trash become `archived`. This
    ///   happens when a segment is moved before discovery recorded it.
    /// - `active` records whose file is gone (the encoder prunes its own
    ///   rolling window) become `deleted`.
    /// - `archived` records with neither a file in trash nor a trash entry
    ///   become `deleted`.
    ///
    /// Deleted records are pruned. Returns the number of records changed.
    pub async fn reconcile(&self) -> usize {
        let active_names = self.ledger.names_with_status(SegmentStatus::Active);
        let archived_names = self.ledger.names_with_status(SegmentStatus::Archived);
        if active_names.is_empty() && archived_names.is_empty() {
            return 0;
        }

        let (in_active, in_trash) = match (
            list_segments(&self.active_dir, &self.extension).await,
            list_segments(&self.trash_dir, &self.extension).await,
        ) {
            (Ok(active), Ok(trash)) => (
                active.into_iter().map(|f| f.name).collect::<HashSet<_>>(),
                trash.into_iter().map(|f| f.name).collect::<HashSet<_>>(),
            ),
            (Err(e), _) | (_, Err(e)) => {
                log::warn!("Skipping ledger reconciliation: {}", e);
                return 0;
            }
        };

        let mut misplaced = Vec::new();
        let mut vanished = Vec::new();
        for name in active_names {
            if in_active.contains(&name) {
                continue;
            }
            if in_trash.contains(&name) {
                misplaced.push(name);
            } else {
                vanished.push(name);
            }
        }

        let expired: Vec<String> = {
            let mut trash_entries = self.trash_entries.lock();
            let now = Utc::now();
            for name in &misplaced {
                trash_entries.entry(name.clone()).or_insert(now);
            }
            archived_names
                .into_iter()
                .filter(|name| !in_trash.contains(name) && !trash_entries.contains_key(name))
                .collect()
        };

        let mut changed = 0;
        if !misplaced.is_empty() {
            changed += self
                .ledger
                .transition_many(
                    misplaced.iter().map(String::as_str),
                    SegmentStatus::Active,
                    SegmentStatus::Archived,
                )
                .await;
        }
        if !vanished.is_empty() {
            changed += self
                .ledger
                .transition_many(
                    vanished.iter().map(String::as_str),
                    SegmentStatus::Active,
                    SegmentStatus::Deleted,
                )
                .await;
        }
        if !expired.is_empty() {
            changed += self
                .ledger
                .transition_many(
                    expired.iter().map(String::as_str),
                    SegmentStatus::Archived,
                    SegmentStatus::Deleted,
                )
                .await;
        }
        if !vanished.is_empty() || !expired.is_empty() {
            self.ledger.prune_deleted().await;
        }

        if changed > 0 {
            log::debug!("Reconciled {} segment records with the filesystem", changed);
        }
        changed
    }

    /// Number of segments currently awaiting retention expiry
    #[must_use]
    pub fn trash_len(&self) -> usize {
        self.trash_entries.lock().len()
    }

    pub async fn stats(&self) -> LifecycleStats {
        let active = list_segments(&self.active_dir, &self.extension)
            .await
            .unwrap_or_default();
        let trash = list_segments(&self.trash_dir, &self.extension)
            .await
            .unwrap_or_default();

        LifecycleStats {
            active_segments: active.len(),
            trash_segments: trash.len(),
            trash_size_bytes: trash.iter().map(|f| f.size).sum(),
            max_active_segments: self.config.max_active_segments,
            retention_seconds: self.config.retention_seconds,
        }
    }

    /// Start both lifecycle timers as a background task
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    async fn run(&self, cancel: CancellationToken) {
        let mut cap_interval = time::interval(self.config.cap_interval());
        let mut retention_interval = time::interval(self.config.retention_check_interval());
        cap_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        retention_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!(
            "Segment lifecycle started: max_active={}, retention={:?}, cap_interval={:?}, retention_interval={:?}",
            self.config.max_active_segments,
            self.config.retention(),
            self.config.cap_interval(),
            self.config.retention_check_interval()
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = cap_interval.tick() => {
                    self.enforce_cap().await;
                    self.reconcile().await;
                }
                _ = retention_interval.tick() => {
                    self.expire_trash().await;
                }
            }
        }

        log::info!("Segment lifecycle stopped");
    }
}

/// Rename, falling back to copy + delete when rename fails (e.g. trash on
/// another filesystem)
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::io(from, e)),
        Err(rename_err) => {
            log::debug!("Rename {:?} failed ({}), copying instead", from, rename_err);
            fs::copy(from, to).await.map_err(|e| Error::io(to, e))?;
            fs::remove_file(from).await.map_err(|e| Error::io(from, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SegmentRecord;
    use crate::state::SourceKind;
    use std::time::{Duration, SystemTime};
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        paths: PathsConfig,
        ledger: Arc<Ledger>,
        manager: SegmentLifecycleManager,
    }

    async fn fixture(max_active_segments: usize, retention_seconds: u64) -> Fixture {
        let dir = tempdir().unwrap();
        let paths = PathsConfig {
            active_dir: dir.path().join("hls"),
            trash_dir: dir.path().join("hls").join("trash"),
            ledger_file: dir.path().join("ledger.json"),
            ..PathsConfig::default()
        };
        let ledger = Arc::new(Ledger::open(&paths.ledger_file).await);
        let config = LifecycleConfig {
            max_active_segments,
            retention_seconds,
            ..LifecycleConfig::default()
        };
        let manager = SegmentLifecycleManager::new(&paths, "ts", config, Arc::clone(&ledger));
        manager.init().await.unwrap();
        Fixture {
            _dir: dir,
            paths,
            ledger,
            manager,
        }
    }

    /// Write `count` numbered segment files with strictly increasing mtimes
    fn create_segment_files(fx: &Fixture, count: usize) -> Vec<String> {
        let base = SystemTime::now() - Duration::from_secs(3600);
        (0..count)
            .map(|i| {
                let name = format!("segment{i:05}.ts");
                let file = std::fs::File::create(fx.paths.active_dir.join(&name)).unwrap();
                file.set_modified(base + Duration::from_secs(i as u64)).unwrap();
                name
            })
            .collect()
    }

    /// Write `count` numbered segments and track them
    async fn write_segments(fx: &Fixture, count: usize) -> Vec<String> {
        let names = create_segment_files(fx, count);
        for name in &names {
            fx.ledger
                .record(name.clone(), SegmentRecord::active("a.mp4", SourceKind::Queue, 0.0, 2.0))
                .await;
        }
        names
    }

    /// Emulate a restarted encoder writing a fresh segment under an old name
    async fn rewrite_segment(fx: &Fixture, name: &str, label: &str, age: Duration) {
        let file = std::fs::File::create(fx.paths.active_dir.join(name)).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
        fx.ledger
            .record(name, SegmentRecord::active(label, SourceKind::Queue, 0.0, 2.0))
            .await;
    }

    #[tokio::test]
    async fn test_cap_moves_exactly_the_oldest_surplus() {
        let fx = fixture(10, 3600).await;
        let names = write_segments(&fx, 15).await;

        assert_eq!(fx.manager.enforce_cap().await, 5);

        for name in &names[..5] {
            assert!(!fx.paths.active_dir.join(name).exists());
            assert!(fx.paths.trash_dir.join(name).exists());
            assert_eq!(fx.ledger.get(name).unwrap().status, SegmentStatus::Archived);
        }
        for name in &names[5..] {
            assert!(fx.paths.active_dir.join(name).exists());
            assert_eq!(fx.ledger.get(name).unwrap().status, SegmentStatus::Active);
        }

        let stats = fx.manager.stats().await;
        assert_eq!(stats.active_segments, 10);
        assert_eq!(stats.trash_segments, 5);
        assert_eq!(fx.manager.trash_len(), 5);
    }

    #[tokio::test]
    async fn test_cap_is_noop_at_or_below_limit() {
        let fx = fixture(10, 3600).await;
        write_segments(&fx, 10).await;

        assert_eq!(fx.manager.enforce_cap().await, 0);
        assert_eq!(fx.manager.stats().await.active_segments, 10);
    }

    #[tokio::test]
    async fn test_playlist_is_never_counted_or_moved() {
        let fx = fixture(1, 3600).await;
        write_segments(&fx, 2).await;
        std::fs::write(fx.paths.playlist_path(), b"#EXTM3U").unwrap();

        assert_eq!(fx.manager.enforce_cap().await, 1);
        assert!(fx.paths.playlist_path().exists());
    }

    #[tokio::test]
    async fn test_expiry_respects_retention_window() {
        let fx = fixture(2, 60).await;
        let names = write_segments(&fx, 4).await;
        fx.manager.enforce_cap().await;

        // Inside the window nothing is erased
        let soon = Utc::now() + chrono::Duration::seconds(30);
        assert_eq!(fx.manager.expire_trash_at(soon).await, 0);
        assert!(fx.paths.trash_dir.join(&names[0]).exists());

        let later = Utc::now() + chrono::Duration::seconds(61);
        assert_eq!(fx.manager.expire_trash_at(later).await, 2);
        for name in &names[..2] {
            assert!(!fx.paths.trash_dir.join(name).exists());
            // Deleted entries are pruned, not just flagged
            assert!(fx.ledger.get(name).is_none());
        }
        assert_eq!(fx.manager.trash_len(), 0);
        assert_eq!(fx.ledger.stats().deleted, 0);
        assert_eq!(fx.ledger.stats().active, 2);
    }

    #[tokio::test]
    async fn test_expiry_tolerates_already_missing_file() {
        let fx = fixture(0, 0).await;
        let names = write_segments(&fx, 1).await;
        fx.manager.enforce_cap().await;
        std::fs::remove_file(fx.paths.trash_dir.join(&names[0])).unwrap();

        let later = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(fx.manager.expire_trash_at(later).await, 1);
        assert!(fx.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_expiry_keeps_reused_name_that_is_active() {
        let fx = fixture(1, 60).await;
        let names = write_segments(&fx, 2).await;
        assert_eq!(fx.manager.enforce_cap().await, 1);

        rewrite_segment(&fx, &names[0], "b.mp4", Duration::from_secs(1)).await;

        let later = Utc::now() + chrono::Duration::seconds(61);
        assert_eq!(fx.manager.expire_trash_at(later).await, 1);
        assert!(!fx.paths.trash_dir.join(&names[0]).exists());
        assert!(fx.paths.active_dir.join(&names[0]).exists());

        let record = fx.ledger.get(&names[0]).unwrap();
        assert_eq!(record.status, SegmentStatus::Active);
        assert_eq!(record.source_label, "b.mp4");

        assert_eq!(fx.manager.reconcile().await, 0);
        assert!(fx.ledger.get(&names[0]).is_some());
    }

    #[tokio::test]
    async fn test_cap_replaces_older_trash_copy_of_reused_name() {
        let fx = fixture(1, 60).await;
        let names = write_segments(&fx, 2).await;
        fx.manager.enforce_cap().await;

        // Older than segment00001, so it is the next one to go
        rewrite_segment(&fx, &names[0], "b.mp4", Duration::from_secs(7200)).await;
        assert_eq!(fx.manager.enforce_cap().await, 1);

        let record = fx.ledger.get(&names[0]).unwrap();
        assert_eq!(record.status, SegmentStatus::Archived);
        assert_eq!(record.source_label, "b.mp4");
        assert!(fx.paths.trash_dir.join(&names[0]).exists());
        assert!(fx.paths.active_dir.join(&names[1]).exists());
        assert_eq!(fx.manager.trash_len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_archives_segment_recorded_after_it_moved() {
        let fx = fixture(1, 3600).await;
        let names = create_segment_files(&fx, 2);
        assert_eq!(fx.manager.enforce_cap().await, 1);

        // Discovery listed both files before the move and records them late
        for name in &names {
            fx.ledger
                .record(name.clone(), SegmentRecord::active("a.mp4", SourceKind::Queue, 0.0, 2.0))
                .await;
        }

        assert_eq!(fx.manager.reconcile().await, 1);
        assert_eq!(fx.ledger.get(&names[0]).unwrap().status, SegmentStatus::Archived);
        assert_eq!(fx.ledger.get(&names[1]).unwrap().status, SegmentStatus::Active);
        assert_eq!(fx.manager.reconcile().await, 0);
    }

    #[tokio::test]
    async fn test_init_adopts_leftover_trash() {
        let dir = tempdir().unwrap();
        let paths = PathsConfig {
            active_dir: dir.path().join("hls"),
            trash_dir: dir.path().join("hls").join("trash"),
            ..PathsConfig::default()
        };
        std::fs::create_dir_all(&paths.trash_dir).unwrap();
        std::fs::write(paths.trash_dir.join("segment00007.ts"), b"x").unwrap();
        std::fs::write(paths.trash_dir.join("notes.txt"), b"x").unwrap();

        let ledger = Arc::new(Ledger::open(dir.path().join("ledger.json")).await);
        let config = LifecycleConfig {
            retention_seconds: 10,
            ..LifecycleConfig::default()
        };
        let manager = SegmentLifecycleManager::new(&paths, "ts", config, ledger);

        assert_eq!(manager.init().await.unwrap(), 1);
        assert_eq!(manager.trash_len(), 1);

        let later = Utc::now() + chrono::Duration::seconds(11);
        assert_eq!(manager.expire_trash_at(later).await, 1);
        assert!(!paths.trash_dir.join("segment00007.ts").exists());
        assert!(paths.trash_dir.join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_reconcile_drops_segments_pruned_by_encoder() {
        let fx = fixture(10, 3600).await;
        let names = write_segments(&fx, 3).await;
        std::fs::remove_file(fx.paths.active_dir.join(&names[0])).unwrap();

        assert_eq!(fx.manager.reconcile().await, 1);
        assert!(fx.ledger.get(&names[0]).is_none());
        assert_eq!(fx.ledger.stats().active, 2);
        assert_eq!(fx.manager.reconcile().await, 0);
    }

    #[tokio::test]
    async fn test_purge_active_keeps_playlist_and_trash() {
        let fx = fixture(10, 3600).await;
        write_segments(&fx, 3).await;
        std::fs::write(fx.paths.playlist_path(), b"#EXTM3U").unwrap();
        std::fs::write(fx.paths.trash_dir.join("segment09999.ts"), b"x").unwrap();

        assert_eq!(fx.manager.purge_active().await.unwrap(), 3);
        assert!(fx.paths.playlist_path().exists());
        assert!(fx.paths.trash_dir.join("segment09999.ts").exists());
        assert_eq!(fx.manager.stats().await.active_segments, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let fx = fixture(1, 3600).await;
        write_segments(&fx, 3).await;
        let manager = Arc::new(fx.manager);
        let cancel = CancellationToken::new();

        let handle = Arc::clone(&manager).start(cancel.clone());
        // First ticks fire immediately
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(manager.stats().await.active_segments, 1);
    }
}
