use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing as log;

use crate::ledger::{Ledger, SegmentRecord};
use crate::state::BroadcastState;

use super::list_segments;

/// Polls the active directory and attributes new segments to the current playback.
///
/// Discovery never moves or deletes files. The set of names already seen is
/// kept in memory only; after a restart every file present is new again.
pub struct SegmentDiscovery {
    active_dir: PathBuf,
    extension: String,
    segment_duration: f64,
    state: Arc<BroadcastState>,
    ledger: Arc<Ledger>,
    seen: HashSet<String>,
}

impl SegmentDiscovery {
    pub fn new(
        active_dir: impl Into<PathBuf>,
        extension: impl Into<String>,
        segment_duration: f64,
        state: Arc<BroadcastState>,
        ledger: Arc<Ledger>,
    ) -> Self {
        Self {
            active_dir: active_dir.into(),
            extension: extension.into(),
            segment_duration,
            state,
            ledger,
            seen: HashSet::new(),
        }
    }

    /// Diff the active directory against the previous listing and record
    /// newcomers. Returns the number of segments recorded.
    ///
    /// Segments appearing while nothing is on air are not attributed.
    pub async fn scan(&mut self) -> usize {
        let files = match list_segments(&self.active_dir, &self.extension).await {
            Ok(files) => files,
            Err(e) => {
                log::warn!("Segment discovery listing failed: {}", e);
                return 0;
            }
        };

        let current: HashSet<String> = files.into_iter().map(|f| f.name).collect();
        let mut new_names: Vec<&String> = current.difference(&self.seen).collect();
        new_names.sort();

        let mut recorded = 0;
        for name in new_names {
            let Some(playback) = self.state.playback() else {
                log::trace!("Ignoring segment {} observed with nothing on air", name);
                continue;
            };

            let record = SegmentRecord::active(
                playback.label.clone(),
                playback.source_kind,
                playback.elapsed(),
                self.segment_duration,
            );
            self.ledger.record(name.clone(), record).await;
            self.state.record_segment_created();
            recorded += 1;
        }

        self.seen = current;
        recorded
    }

    /// Run the discovery tick until cancelled
    pub async fn run(mut self, tick: Duration, cancel: CancellationToken) {
        let mut interval = time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!(
            "Segment discovery started: dir={:?}, tick={:?}",
            self.active_dir,
            tick
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let recorded = self.scan().await;
                    if recorded > 0 {
                        log::debug!("Discovered {} new segments", recorded);
                    }
                }
            }
        }

        log::info!("Segment discovery stopped");
    }
}
