//! Shared broadcast state
//!
//! Single store for everything the control surface mutates and the background
//! loops read: broadcast flags, the upload queue, the current playback, a
//! read-only mirror of the running encoder, and playout statistics.
//!
//! Every accessor takes the lock for the duration of one read or write only.
//! Callers must re-read on every tick instead of holding on to copies.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Which kind of input feeds the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Live,
    Queue,
    Idle,
    RemoteUrl,
}

impl SourceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Queue => "queue",
            Self::Idle => "idle",
            Self::RemoteUrl => "remote_url",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What is currently on air
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackDescriptor {
    pub source_kind: SourceKind,
    pub label: String,
    pub started_at: DateTime<Utc>,
    /// Media length in seconds, when known
    pub declared_duration: Option<f64>,
}

impl PlaybackDescriptor {
    #[must_use]
    pub fn new(source_kind: SourceKind, label: impl Into<String>) -> Self {
        Self {
            source_kind,
            label: label.into(),
            started_at: Utc::now(),
            declared_duration: None,
        }
    }

    #[must_use]
    pub fn with_duration(mut self, duration: Option<f64>) -> Self {
        self.declared_duration = duration;
        self
    }

    /// Seconds since playback started, never negative
    #[must_use]
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> f64 {
        let millis = (now - self.started_at).num_milliseconds().max(0);
        millis as f64 / 1000.0
    }

    #[must_use]
    pub fn elapsed(&self) -> f64 {
        self.elapsed_at(Utc::now())
    }
}

/// Read-only mirror of the running encoder for status queries.
///
/// The process handle itself is owned by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderInfo {
    pub pid: Option<u32>,
    pub source_kind: SourceKind,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayoutStatistics {
    /// Queue items handed to the encoder
    pub videos_played: u64,
    /// Segments attributed by discovery
    pub segments_created: u64,
    /// First time broadcasting was switched on
    pub stream_started_at: Option<DateTime<Utc>>,
    pub queue_length: usize,
}

/// Point-in-time copy of the whole store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub broadcasting: bool,
    pub live_camera_mode: bool,
    pub auto_mode: bool,
    pub current_hashtag: String,
    pub program_name: String,
    pub queue: Vec<String>,
    pub playback: Option<PlaybackDescriptor>,
    pub elapsed_seconds: f64,
    pub encoder: Option<EncoderInfo>,
    pub statistics: PlayoutStatistics,
}

#[derive(Debug, Default)]
struct Inner {
    broadcasting: bool,
    live_camera_mode: bool,
    auto_mode: bool,
    current_hashtag: String,
    program_name: String,
    queue: VecDeque<String>,
    playback: Option<PlaybackDescriptor>,
    encoder: Option<EncoderInfo>,
    videos_played: u64,
    segments_created: u64,
    stream_started_at: Option<DateTime<Utc>>,
}

/// Thread-safe broadcast state store
#[derive(Debug, Default)]
pub struct BroadcastState {
    inner: RwLock<Inner>,
}

impl BroadcastState {
    #[must_use]
    pub fn new(auto_mode: bool, hashtag: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                auto_mode,
                current_hashtag: hashtag.into(),
                ..Inner::default()
            }),
        }
    }

    // --- Broadcast flags ---

    pub fn set_broadcasting(&self, broadcasting: bool) {
        let mut inner = self.inner.write();
        inner.broadcasting = broadcasting;
        if broadcasting && inner.stream_started_at.is_none() {
            inner.stream_started_at = Some(Utc::now());
        }
    }

    #[must_use]
    pub fn is_broadcasting(&self) -> bool {
        self.inner.read().broadcasting
    }

    pub fn set_live_camera_mode(&self, live: bool) {
        self.inner.write().live_camera_mode = live;
    }

    #[must_use]
    pub fn is_live_camera_mode(&self) -> bool {
        self.inner.read().live_camera_mode
    }

    pub fn set_auto_mode(&self, enabled: bool) {
        self.inner.write().auto_mode = enabled;
    }

    #[must_use]
    pub fn is_auto_mode(&self) -> bool {
        self.inner.read().auto_mode
    }

    pub fn set_current_hashtag(&self, hashtag: impl Into<String>) {
        self.inner.write().current_hashtag = hashtag.into();
    }

    #[must_use]
    pub fn current_hashtag(&self) -> String {
        self.inner.read().current_hashtag.clone()
    }

    pub fn set_program_name(&self, name: impl Into<String>) {
        self.inner.write().program_name = name.into();
    }

    #[must_use]
    pub fn program_name(&self) -> String {
        self.inner.read().program_name.clone()
    }

    // --- Upload queue ---

    pub fn enqueue(&self, filename: impl Into<String>) {
        self.inner.write().queue.push_back(filename.into());
    }

    /// Remove the head of the queue.
    ///
    /// Only the orchestrator calls this, right before feeding the item to the encoder.
    pub fn pop_queue(&self) -> Option<String> {
        self.inner.write().queue.pop_front()
    }

    #[must_use]
    pub fn queue(&self) -> Vec<String> {
        self.inner.read().queue.iter().cloned().collect()
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.inner.read().queue.len()
    }

    // --- Current playback ---

    pub fn set_playback(&self, playback: PlaybackDescriptor) {
        let mut inner = self.inner.write();
        if playback.source_kind == SourceKind::Queue {
            inner.videos_played += 1;
        }
        inner.playback = Some(playback);
    }

    pub fn clear_playback(&self) {
        self.inner.write().playback = None;
    }

    #[must_use]
    pub fn playback(&self) -> Option<PlaybackDescriptor> {
        self.inner.read().playback.clone()
    }

    // --- Encoder mirror ---

    pub fn set_encoder(&self, info: EncoderInfo) {
        self.inner.write().encoder = Some(info);
    }

    pub fn clear_encoder(&self) {
        self.inner.write().encoder = None;
    }

    #[must_use]
    pub fn encoder(&self) -> Option<EncoderInfo> {
        self.inner.read().encoder.clone()
    }

    // --- Statistics ---

    pub fn record_segment_created(&self) {
        self.inner.write().segments_created += 1;
    }

    #[must_use]
    pub fn statistics(&self) -> PlayoutStatistics {
        let inner = self.inner.read();
        PlayoutStatistics {
            videos_played: inner.videos_played,
            segments_created: inner.segments_created,
            stream_started_at: inner.stream_started_at,
            queue_length: inner.queue.len(),
        }
    }

    /// Complete state for status queries
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.read();
        StateSnapshot {
            broadcasting: inner.broadcasting,
            live_camera_mode: inner.live_camera_mode,
            auto_mode: inner.auto_mode,
            current_hashtag: inner.current_hashtag.clone(),
            program_name: inner.program_name.clone(),
            queue: inner.queue.iter().cloned().collect(),
            elapsed_seconds: inner
                .playback
                .as_ref()
                .map_or(0.0, PlaybackDescriptor::elapsed),
            playback: inner.playback.clone(),
            encoder: inner.encoder.clone(),
            statistics: PlayoutStatistics {
                videos_played: inner.videos_played,
                segments_created: inner.segments_created,
                stream_started_at: inner.stream_started_at,
                queue_length: inner.queue.len(),
            },
        }
    }
}
