// Playout orchestrator
//
// Decides every tick which source feeds the single encoder slot. The policy is
// level-triggered: each tick reads the state store afresh and applies the
// first matching rule.
//
//   1. not broadcasting      -> stop whatever runs
//   2. live camera mode      -> keep a Live encoder running, restarting it on exit
//   3. queue / idle mode
//      a. encoder exited     -> forget it and continue as if nothing runs
//      b. encoder running    -> preempt Idle when uploads wait, otherwise leave it
//      c. queue non-empty    -> play the next upload (missing files are dropped)
//      d. auto mode          -> resolve remote content, Idle + backoff on failure
//      e. otherwise          -> Idle
//
// The orchestrator is the only owner of the encoder handle, so at most one
// encoder is alive at any time. A crashed Queue item is not retried.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing as log;

use crate::config::Config;
use crate::encoder::{EncoderHandle, LaunchRequest, Liveness, Supervisor};
use crate::resolver::ContentResolver;
use crate::state::{BroadcastState, PlaybackDescriptor, SourceKind};

const LIVE_LABEL: &str = "live";
const IDLE_LABEL: &str = "idle";

/// Timing and filesystem inputs of the control loop
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub tick: Duration,
    /// Extra delay after auto mode fell back to Idle
    pub resolver_backoff: Duration,
    pub resolver_timeout: Duration,
    pub upload_dir: PathBuf,
    pub idle_source: PathBuf,
}

impl OrchestratorSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick: config.orchestrator.tick(),
            resolver_backoff: config.orchestrator.resolver_backoff(),
            resolver_timeout: config.orchestrator.resolver_timeout(),
            upload_dir: config.paths.upload_dir.clone(),
            idle_source: config.paths.idle_source.clone(),
        }
    }
}

pub struct Orchestrator {
    state: Arc<BroadcastState>,
    supervisor: Arc<dyn Supervisor>,
    resolver: Option<Arc<dyn ContentResolver>>,
    settings: OrchestratorSettings,
    current: Option<EncoderHandle>,
}

impl Orchestrator {
    pub fn new(
        state: Arc<BroadcastState>,
        supervisor: Arc<dyn Supervisor>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            state,
            supervisor,
            resolver: None,
            settings,
            current: None,
        }
    }

    /// Content resolver used in auto mode. Without one, auto mode always
    /// falls back to Idle.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn ContentResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Source of the encoder handle currently held, alive or not
    #[must_use]
    pub fn current_source(&self) -> Option<SourceKind> {
        self.current.as_ref().map(EncoderHandle::source_kind)
    }

    /// Evaluate the policy once.
    ///
    /// Returns an extra delay to wait before the next tick, set when auto mode
    /// failed to resolve content.
    pub async fn tick(&mut self) -> Option<Duration> {
        if !self.state.is_broadcasting() {
            if self.current.is_some() {
                log::info!("Broadcast switched off, stopping encoder");
                self.stop_current().await;
            }
            return None;
        }

        if self.state.is_live_camera_mode() {
            self.tick_live().await;
            return None;
        }

        self.tick_scheduled().await
    }

    async fn tick_live(&mut self) {
        match self.current_status() {
            Some((SourceKind::Live, Liveness::Alive)) => {}
            Some((SourceKind::Live, Liveness::Exited(code))) => {
                log::warn!("Live encoder exited (code {:?}), restarting", code);
                self.forget_current();
                self.start_live().await;
            }
            Some((kind, _)) => {
                log::info!("Switching from {} to live", kind);
                self.stop_current().await;
                self.start_live().await;
            }
            None => self.start_live().await,
        }
    }

    async fn tick_scheduled(&mut self) -> Option<Duration> {
        if let Some((kind, Liveness::Exited(code))) = self.current_status() {
            log::info!("Encoder finished (type: {}, code {:?})", kind, code);
            self.forget_current();
        }

        if let Some(kind) = self.current_source() {
            if kind == SourceKind::Idle && self.state.queue_len() > 0 {
                // The queued item starts on the next tick
                log::info!("New item in queue, stopping idle");
                self.stop_current().await;
            }
            return None;
        }

        if let Some(filename) = self.state.pop_queue() {
            self.start_queue_item(&filename).await;
            return None;
        }

        if self.state.is_auto_mode() {
            return self.start_auto().await;
        }

        self.start_idle().await;
        None
    }

    async fn start_queue_item(&mut self, filename: &str) {
        let path = self.settings.upload_dir.join(filename);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            log::warn!("Queued file missing, skipping: {}", filename);
            return;
        }

        let duration = self.supervisor.probe_duration(&path).await;
        let label = Path::new(filename)
            .file_name()
            .map_or_else(|| filename.to_string(), |name| name.to_string_lossy().into_owned());

        self.launch(
            SourceKind::Queue,
            Some(path.to_string_lossy().into_owned()),
            label,
            duration,
        )
        .await;
    }

    async fn start_auto(&mut self) -> Option<Duration> {
        let topic = self.state.current_hashtag();
        log::info!("Auto mode: fetching content for '{}'", topic);

        let resolved = match &self.resolver {
            Some(resolver) => match timeout(self.settings.resolver_timeout, resolver.resolve(&topic)).await {
                Ok(Ok(content)) => Some(content),
                Ok(Err(e)) => {
                    log::warn!("Auto mode: content resolution failed: {}", e);
                    None
                }
                Err(_) => {
                    log::warn!(
                        "Auto mode: content resolution timed out after {:?}",
                        self.settings.resolver_timeout
                    );
                    None
                }
            },
            None => {
                log::warn!("Auto mode enabled but no content resolver configured");
                None
            }
        };

        match resolved {
            Some(content) => {
                log::info!("Auto mode: starting {}", content.title);
                self.state.set_program_name(content.title.clone());
                self.launch(SourceKind::RemoteUrl, Some(content.stream_url), content.title, None)
                    .await;
                None
            }
            None => {
                log::info!("Auto mode: falling back to idle");
                self.start_idle().await;
                Some(self.settings.resolver_backoff)
            }
        }
    }

    async fn start_live(&mut self) {
        self.launch(SourceKind::Live, None, LIVE_LABEL.to_string(), None)
            .await;
    }

    async fn start_idle(&mut self) {
        let source = self.settings.idle_source.to_string_lossy().into_owned();
        self.launch(SourceKind::Idle, Some(source), IDLE_LABEL.to_string(), None)
            .await;
    }

    async fn launch(
        &mut self,
        kind: SourceKind,
        source: Option<String>,
        label: String,
        duration: Option<f64>,
    ) {
        debug_assert!(self.current.is_none(), "encoder slot already taken");

        let request = LaunchRequest::new(kind, source, label.clone())
            .with_program_name(self.state.program_name());
        let handle = self.supervisor.start(request).await;

        self.state
            .set_playback(PlaybackDescriptor::new(kind, label).with_duration(duration));
        self.state.set_encoder(handle.info());
        self.current = Some(handle);
    }

    fn current_status(&mut self) -> Option<(SourceKind, Liveness)> {
        let handle = self.current.as_mut()?;
        let liveness = self.supervisor.poll(handle);
        Some((handle.source_kind(), liveness))
    }

    /// Drop an exited handle and the state that described it
    fn forget_current(&mut self) {
        self.current = None;
        self.state.clear_playback();
        self.state.clear_encoder();
    }

    async fn stop_current(&mut self) {
        if let Some(handle) = self.current.take() {
            self.supervisor.stop(handle).await;
        }
        self.state.clear_playback();
        self.state.clear_encoder();
    }

    /// Stop the encoder and clear playback state
    pub async fn shutdown(&mut self) {
        if self.current.is_some() {
            log::info!("Stopping encoder for shutdown");
        }
        self.stop_current().await;
    }

    /// Tick until cancelled, then stop the encoder
    pub async fn run(mut self, cancel: CancellationToken) {
        log::info!("Playout orchestrator started: tick={:?}", self.settings.tick);

        loop {
            let backoff = tokio::select! {
                () = cancel.cancelled() => break,
                backoff = self.tick() => backoff,
            };

            let delay = self.settings.tick + backoff.unwrap_or_default();
            tokio::select! {
                () = cancel.cancelled() => break,
                () = sleep(delay) => {}
            }
        }

        self.shutdown().await;
        log::info!("Playout orchestrator stopped");
    }
}
