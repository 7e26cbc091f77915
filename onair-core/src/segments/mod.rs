// Segment tracking
//
// Responsibilities:
// - discovery: attribute newly written segments to whatever is on air
// - lifecycle: cap the active directory, stage surplus in trash, expire trash
//
// Both work from plain directory listings. Only files carrying the configured
// segment extension are considered, so the playlist and anything else living
// next to the segments is never touched.

pub mod discovery;
pub mod lifecycle;

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;

use crate::error::{Error, Result};

pub use discovery::SegmentDiscovery;
pub use lifecycle::{LifecycleStats, SegmentLifecycleManager};

/// A segment file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFile {
    pub name: String,
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size: u64,
}

fn has_extension(name: &str, extension: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

/// List segment files in `dir`, oldest first.
///
/// Ordering is by modification time, then by name so that segments written
/// within the same timestamp granularity keep the encoder's numbering order.
/// A missing directory yields an empty list.
pub async fn list_segments(dir: &Path, extension: &str) -> Result<Vec<SegmentFile>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io(dir, e)),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| Error::io(dir, e))? {
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        if !has_extension(&name, extension) {
            continue;
        }

        // Files can vanish between listing and stat (encoder pruning)
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }

        files.push(SegmentFile {
            name: name.into_owned(),
            path: entry.path(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            size: metadata.len(),
        });
    }

    files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)));
    Ok(files)
}
