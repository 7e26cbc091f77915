//! Segment ledger
//!
//! Durable map from segment name to its attribution and lifecycle status,
//! stored as one flat JSON object keyed by segment name:
//!
//! ```json
//! {
//!   "segment00042.ts": {
//!     "source_label": "a.mp4",
//!     "source_kind": "queue",
//!     "offset_secs": 84.0,
//!     "duration_secs": 2.0,
//!     "created_at": "2025-01-01T12:00:00Z",
//!     "status": "active"
//!   }
//! }
//! ```
//!
//! The in-memory map is authoritative. Each mutation rewrites the file; a
//! failed write is logged and the next successful write catches the file up.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing as log;

use crate::error::{Error, Result};
use crate::state::SourceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    /// In the active directory, servable
    Active,
    /// Moved to trash, awaiting retention expiry
    Archived,
    /// Erased from disk, pending prune
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub source_label: String,
    pub source_kind: SourceKind,
    /// Position inside the source when the segment was observed
    pub offset_secs: f64,
    pub duration_secs: f64,
    pub created_at: DateTime<Utc>,
    pub status: SegmentStatus,
}

impl SegmentRecord {
    #[must_use]
    pub fn active(
        source_label: impl Into<String>,
        source_kind: SourceKind,
        offset_secs: f64,
        duration_secs: f64,
    ) -> Self {
        Self {
            source_label: source_label.into(),
            source_kind,
            offset_secs,
            duration_secs,
            created_at: Utc::now(),
            status: SegmentStatus::Active,
        }
    }
}

/// A record together with its key, for listings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedSegment {
    pub name: String,
    #[serde(flatten)]
    pub record: SegmentRecord,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub total: usize,
    pub active: usize,
    pub archived: usize,
    pub deleted: usize,
}

pub struct Ledger {
    path: PathBuf,
    segments: RwLock<BTreeMap<String, SegmentRecord>>,
    /// Serialises file writes so the file never goes back in time
    write_lock: Mutex<()>,
}

impl Ledger {
    /// Open the ledger at `path`, reloading any previous contents.
    ///
    /// A missing file starts an empty ledger. An unreadable or corrupt file is
    /// logged and also starts empty; it is overwritten on the next mutation.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let segments = match load(&path).await {
            Ok(segments) => {
                log::info!("Loaded {} segment records from {:?}", segments.len(), path);
                segments
            }
            Err(e) if e.is_not_found() => BTreeMap::new(),
            Err(e) => {
                log::warn!("Failed to load segment ledger, starting empty: {}", e);
                BTreeMap::new()
            }
        };

        Self {
            path,
            segments: RwLock::new(segments),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace the record for `name`.
    ///
    /// Replacing is expected: a restarted encoder reuses names, and the newest
    /// segment under a name is the one that matters.
    pub async fn record(&self, name: impl Into<String>, record: SegmentRecord) {
        let name = name.into();
        self.mutate(|segments| {
            log::debug!(
                "Tracked segment: {} from {} at {:.2}s",
                name,
                record.source_label,
                record.offset_secs
            );
            segments.insert(name, record);
            true
        })
        .await;
    }

    /// Move one segment from `from` to `to`. Returns false when the segment is
    /// unknown or not currently in `from`.
    pub async fn transition(&self, name: &str, from: SegmentStatus, to: SegmentStatus) -> bool {
        self.transition_many(std::iter::once(name), from, to).await == 1
    }

    /// Move every listed segment currently in `from` to `to` with a single
    /// write. Returns how many changed.
    ///
    /// Segment names repeat once the encoder restarts its numbering, so a
    /// name can refer to a newer segment than the one the caller acted on.
    /// Records in any other status are left untouched.
    pub async fn transition_many<'a, I>(
        &self,
        names: I,
        from: SegmentStatus,
        to: SegmentStatus,
    ) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut updated = 0;
        self.mutate(|segments| {
            for name in names {
                match segments.get_mut(name) {
                    Some(record) if record.status == from => {
                        record.status = to;
                        updated += 1;
                    }
                    Some(record) => log::debug!(
                        "Segment {} is {:?}, not {:?}; leaving it as is",
                        name,
                        record.status,
                        from
                    ),
                    None => {}
                }
            }
            updated > 0
        })
        .await;
        updated
    }

    /// Drop every `deleted` record. Returns how many were pruned.
    pub async fn prune_deleted(&self) -> usize {
        let mut pruned = 0;
        self.mutate(|segments| {
            let before = segments.len();
            segments.retain(|_, record| record.status != SegmentStatus::Deleted);
            pruned = before - segments.len();
            pruned > 0
        })
        .await;
        if pruned > 0 {
            log::info!("Cleaned up metadata for {} deleted segments", pruned);
        }
        pruned
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<SegmentRecord> {
        self.segments.read().get(name).cloned()
    }

    #[must_use]
    pub fn names_with_status(&self, status: SegmentStatus) -> Vec<String> {
        self.segments
            .read()
            .iter()
            .filter(|(_, record)| record.status == status)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Most recently created active segment
    #[must_use]
    pub fn current(&self) -> Option<NamedSegment> {
        self.segments
            .read()
            .iter()
            .filter(|(_, record)| record.status == SegmentStatus::Active)
            .max_by(|a, b| a.1.created_at.cmp(&b.1.created_at).then_with(|| a.0.cmp(b.0)))
            .map(|(name, record)| NamedSegment {
                name: name.clone(),
                record: record.clone(),
            })
    }

    /// Newest first, at most `limit` entries
    #[must_use]
    pub fn history(&self, limit: usize) -> Vec<NamedSegment> {
        let mut segments: Vec<NamedSegment> = self
            .segments
            .read()
            .iter()
            .map(|(name, record)| NamedSegment {
                name: name.clone(),
                record: record.clone(),
            })
            .collect();
        segments.sort_by(|a, b| {
            b.record
                .created_at
                .cmp(&a.record.created_at)
                .then_with(|| b.name.cmp(&a.name))
        });
        segments.truncate(limit);
        segments
    }

    #[must_use]
    pub fn stats(&self) -> LedgerStats {
        let segments = self.segments.read();
        let mut stats = LedgerStats {
            total: segments.len(),
            ..LedgerStats::default()
        };
        for record in segments.values() {
            match record.status {
                SegmentStatus::Active => stats.active += 1,
                SegmentStatus::Archived => stats.archived += 1,
                SegmentStatus::Deleted => stats.deleted += 1,
            }
        }
        stats
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.read().is_empty()
    }

    /// Apply `change` and persist if it reports a modification.
    ///
    /// The map lock is only held while mutating and serialising; the file
    /// write happens under `write_lock` alone.
    async fn mutate<F>(&self, change: F)
    where
        F: FnOnce(&mut BTreeMap<String, SegmentRecord>) -> bool,
    {
        let _write_guard = self.write_lock.lock().await;

        let serialized = {
            let mut segments = self.segments.write();
            if !change(&mut segments) {
                return;
            }
            serde_json::to_vec_pretty(&*segments)
        };

        let result = match serialized {
            Ok(bytes) => persist(&self.path, &bytes).await,
            Err(e) => Err(Error::from(e)),
        };
        if let Err(e) = result {
            log::warn!("Failed to persist segment ledger: {}", e);
        }
    }
}

async fn load(path: &Path) -> Result<BTreeMap<String, SegmentRecord>> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| Error::io(path, e))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Write to a sibling temp file and rename over the target
async fn persist(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(parent, e))?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| Error::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::io(path, e))
}
