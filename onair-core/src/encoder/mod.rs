// Encoder process supervision
//
// The orchestrator owns at most one `EncoderHandle` at a time and drives it
// through a `Supervisor`. The supervisor never deduplicates: asking it to
// start twice launches two processes, so the single-encoder invariant is the
// orchestrator's to keep.

pub mod command;
pub mod ffmpeg;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing as log;

use crate::state::{EncoderInfo, SourceKind};

pub use command::{build_args, EncodeRequest};
pub use ffmpeg::FfmpegSupervisor;

/// Non-blocking process status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// Exit code when the process ended normally, `None` when killed by a
    /// signal or never started
    Exited(Option<i32>),
}

impl Liveness {
    #[must_use]
    pub const fn is_alive(self) -> bool {
        matches!(self, Self::Alive)
    }
}

/// A running (or failed) encoder process
#[async_trait]
pub trait EncoderProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Check for exit without blocking
    fn try_liveness(&mut self) -> Liveness;

    /// Ask the process to stop, force-killing it after `grace`.
    /// Must return promptly when the process already exited.
    async fn terminate(&mut self, grace: Duration);
}

/// What to put on air
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub kind: SourceKind,
    /// Input file or URL. `None` for Live and for Idle without a filler file.
    pub source: Option<String>,
    /// Human-readable name for logs
    pub label: String,
    /// Text burned into the picture when the text overlay is enabled
    pub program_name: String,
}

impl LaunchRequest {
    #[must_use]
    pub fn new(kind: SourceKind, source: Option<String>, label: impl Into<String>) -> Self {
        Self {
            kind,
            source,
            label: label.into(),
            program_name: String::new(),
        }
    }

    #[must_use]
    pub fn with_program_name(mut self, program_name: impl Into<String>) -> Self {
        self.program_name = program_name.into();
        self
    }
}

/// Exclusive handle to one encoder process
pub struct EncoderHandle {
    source_kind: SourceKind,
    label: String,
    started_at: DateTime<Utc>,
    process: Box<dyn EncoderProcess>,
}

impl EncoderHandle {
    pub fn new(source_kind: SourceKind, label: impl Into<String>, process: Box<dyn EncoderProcess>) -> Self {
        Self {
            source_kind,
            label: label.into(),
            started_at: Utc::now(),
            process,
        }
    }

    #[must_use]
    pub const fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.process.id()
    }

    /// Read-only mirror for the state store
    #[must_use]
    pub fn info(&self) -> EncoderInfo {
        EncoderInfo {
            pid: self.pid(),
            source_kind: self.source_kind,
            started_at: self.started_at,
        }
    }

    pub fn process_mut(&mut self) -> &mut dyn EncoderProcess {
        self.process.as_mut()
    }
}

impl std::fmt::Debug for EncoderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderHandle")
            .field("source_kind", &self.source_kind)
            .field("label", &self.label)
            .field("started_at", &self.started_at)
            .field("pid", &self.pid())
            .finish()
    }
}

/// Starts, polls and stops encoder processes
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Launch an encoder for `request`.
    ///
    /// Never fails: a process that could not be spawned comes back as a
    /// handle that polls as `Exited`.
    async fn start(&self, request: LaunchRequest) -> EncoderHandle;

    /// Grace period between the polite stop request and force-kill
    fn stop_timeout(&self) -> Duration;

    fn poll(&self, handle: &mut EncoderHandle) -> Liveness {
        handle.process_mut().try_liveness()
    }

    /// Stop the encoder and consume the handle. No-op for an exited process.
    async fn stop(&self, mut handle: EncoderHandle) {
        if let Liveness::Exited(code) = handle.process_mut().try_liveness() {
            log::debug!(
                "Encoder for {} already exited (code {:?})",
                handle.label(),
                code
            );
            return;
        }

        log::info!(
            "Stopping encoder for {} (pid {:?})",
            handle.label(),
            handle.pid()
        );
        let grace = self.stop_timeout();
        handle.process_mut().terminate(grace).await;
    }

    /// Media duration in seconds, `None` when it cannot be determined
    async fn probe_duration(&self, _path: &Path) -> Option<f64> {
        None
    }
}
