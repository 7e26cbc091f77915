// Orchestrator scenarios against a mock supervisor (no ffmpeg required)

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use onair_core::encoder::{EncoderHandle, EncoderProcess, LaunchRequest, Liveness, Supervisor};
use onair_core::resolver::{ContentResolver, ResolvedContent};
use onair_core::{BroadcastState, Error, Orchestrator, OrchestratorSettings, SourceKind};

/// Liveness shared between a mock process and the test
struct ProcessState {
    dead: AtomicBool,
    alive: Arc<AtomicUsize>,
}

impl ProcessState {
    fn die(&self) {
        if !self.dead.swap(true, Ordering::SeqCst) {
            self.alive.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

struct MockProcess {
    state: Arc<ProcessState>,
    terminations: Arc<AtomicUsize>,
}

#[async_trait]
impl EncoderProcess for MockProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    fn try_liveness(&mut self) -> Liveness {
        if self.state.dead.load(Ordering::SeqCst) {
            Liveness::Exited(Some(0))
        } else {
            Liveness::Alive
        }
    }

    async fn terminate(&mut self, _grace: Duration) {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        self.state.die();
    }
}

/// Mock supervisor recording every launch
#[derive(Default)]
struct MockSupervisor {
    launches: Mutex<Vec<LaunchRequest>>,
    processes: Mutex<Vec<Arc<ProcessState>>>,
    alive: Arc<AtomicUsize>,
    max_alive: AtomicUsize,
    terminations: Arc<AtomicUsize>,
}

impl MockSupervisor {
    fn launches(&self) -> Vec<LaunchRequest> {
        self.launches.lock().clone()
    }

    fn kinds(&self) -> Vec<SourceKind> {
        self.launches().iter().map(|l| l.kind).collect()
    }

    fn alive(&self) -> usize {
        self.alive.load(Ordering::SeqCst)
    }

    fn max_alive(&self) -> usize {
        self.max_alive.load(Ordering::SeqCst)
    }

    fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    /// Simulate the most recent encoder exiting on its own
    fn exit_last(&self) {
        if let Some(process) = self.processes.lock().last() {
            process.die();
        }
    }
}

#[async_trait]
impl Supervisor for MockSupervisor {
    async fn start(&self, request: LaunchRequest) -> EncoderHandle {
        let now_alive = self.alive.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_alive.fetch_max(now_alive, Ordering::SeqCst);

        let state = Arc::new(ProcessState {
            dead: AtomicBool::new(false),
            alive: Arc::clone(&self.alive),
        });
        self.processes.lock().push(Arc::clone(&state));
        self.launches.lock().push(request.clone());

        EncoderHandle::new(
            request.kind,
            request.label,
            Box::new(MockProcess {
                state,
                terminations: Arc::clone(&self.terminations),
            }),
        )
    }

    fn stop_timeout(&self) -> Duration {
        Duration::from_millis(10)
    }

    async fn probe_duration(&self, _path: &Path) -> Option<f64> {
        Some(12.0)
    }
}

enum ResolverBehavior {
    Succeed,
    Fail,
    Hang,
}

struct MockResolver {
    behavior: ResolverBehavior,
    calls: AtomicUsize,
}

impl MockResolver {
    fn new(behavior: ResolverBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ContentResolver for MockResolver {
    async fn resolve(&self, topic: &str) -> onair_core::Result<ResolvedContent> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            ResolverBehavior::Succeed => Ok(ResolvedContent {
                stream_url: format!("https://cdn.example/{topic}.mp4"),
                title: format!("Best of {topic}"),
            }),
            ResolverBehavior::Fail => Err(Error::Resolve("no results".to_string())),
            ResolverBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(Error::Resolve("unreachable".to_string()))
            }
        }
    }
}

struct Harness {
    uploads: TempDir,
    state: Arc<BroadcastState>,
    supervisor: Arc<MockSupervisor>,
    orchestrator: Orchestrator,
}

impl Harness {
    fn new() -> Self {
        let uploads = tempfile::tempdir().unwrap();
        let state = Arc::new(BroadcastState::new(false, "dance"));
        let supervisor = Arc::new(MockSupervisor::default());
        let settings = OrchestratorSettings {
            tick: Duration::from_millis(10),
            resolver_backoff: Duration::from_secs(5),
            resolver_timeout: Duration::from_millis(100),
            upload_dir: uploads.path().to_path_buf(),
            idle_source: PathBuf::from("idle.mp4"),
        };
        let orchestrator = Orchestrator::new(Arc::clone(&state), supervisor.clone(), settings);
        Self {
            uploads,
            state,
            supervisor,
            orchestrator,
        }
    }

    fn with_resolver(mut self, resolver: Arc<MockResolver>) -> Self {
        self.orchestrator = self.orchestrator.with_resolver(resolver);
        self
    }

    /// Create the upload on disk and queue it
    fn upload(&self, name: &str) {
        std::fs::write(self.uploads.path().join(name), b"video").unwrap();
        self.state.enqueue(name);
    }

    fn playing(&self) -> Option<(SourceKind, String)> {
        self.state.playback().map(|p| (p.source_kind, p.label))
    }
}

#[tokio::test]
async fn test_never_starts_when_not_broadcasting() {
    let mut h = Harness::new();

    for _ in 0..5 {
        assert_eq!(h.orchestrator.tick().await, None);
    }

    assert!(h.supervisor.launches().is_empty());
    assert!(h.state.playback().is_none());
}

#[tokio::test]
async fn test_queue_item_then_idle() {
    let mut h = Harness::new();
    h.state.set_broadcasting(true);
    h.upload("a.mp4");

    h.orchestrator.tick().await;
    let launches = h.supervisor.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].kind, SourceKind::Queue);
    assert_eq!(
        launches[0].source.as_deref().map(PathBuf::from),
        Some(h.uploads.path().join("a.mp4"))
    );
    assert_eq!(h.playing(), Some((SourceKind::Queue, "a.mp4".to_string())));
    assert_eq!(h.state.playback().unwrap().declared_duration, Some(12.0));
    assert_eq!(h.state.encoder().unwrap().source_kind, SourceKind::Queue);
    assert_eq!(h.state.statistics().videos_played, 1);
    assert_eq!(h.state.queue_len(), 0);

    // Still playing: nothing changes
    h.orchestrator.tick().await;
    assert_eq!(h.supervisor.launches().len(), 1);

    // Finished: Idle takes over, the item is not replayed
    h.supervisor.exit_last();
    h.orchestrator.tick().await;
    assert_eq!(h.supervisor.kinds(), vec![SourceKind::Queue, SourceKind::Idle]);
    assert_eq!(h.playing(), Some((SourceKind::Idle, "idle".to_string())));
    assert_eq!(h.supervisor.max_alive(), 1);
}

#[tokio::test]
async fn test_live_preempts_queue() {
    let mut h = Harness::new();
    h.state.set_broadcasting(true);
    h.upload("a.mp4");
    h.upload("b.mp4");
    h.orchestrator.tick().await;

    h.state.set_live_camera_mode(true);
    h.orchestrator.tick().await;

    assert_eq!(h.supervisor.kinds(), vec![SourceKind::Queue, SourceKind::Live]);
    assert_eq!(h.supervisor.terminations(), 1);
    assert_eq!(h.orchestrator.current_source(), Some(SourceKind::Live));
    assert_eq!(h.playing().map(|p| p.0), Some(SourceKind::Live));
    // Queue contents are left for later
    assert_eq!(h.state.queue(), vec!["b.mp4"]);
    assert_eq!(h.supervisor.alive(), 1);
    assert_eq!(h.supervisor.max_alive(), 1);

    // Steady state: no restarts
    h.orchestrator.tick().await;
    assert_eq!(h.supervisor.launches().len(), 2);
}

#[tokio::test]
async fn test_crashed_live_restarts_immediately() {
    let mut h = Harness::new();
    h.state.set_broadcasting(true);
    h.state.set_live_camera_mode(true);
    h.orchestrator.tick().await;

    h.supervisor.exit_last();
    h.orchestrator.tick().await;

    assert_eq!(h.supervisor.kinds(), vec![SourceKind::Live, SourceKind::Live]);
    assert_eq!(h.supervisor.alive(), 1);
    // An exited process is never terminated
    assert_eq!(h.supervisor.terminations(), 0);
}

#[tokio::test]
async fn test_idle_preempted_by_upload_on_next_tick() {
    let mut h = Harness::new();
    h.state.set_broadcasting(true);
    h.orchestrator.tick().await;
    assert_eq!(h.orchestrator.current_source(), Some(SourceKind::Idle));

    h.upload("b.mp4");
    h.orchestrator.tick().await;
    assert_eq!(h.supervisor.terminations(), 1);
    assert_eq!(h.orchestrator.current_source(), None);
    assert!(h.state.playback().is_none());
    assert_eq!(h.supervisor.launches().len(), 1);

    h.orchestrator.tick().await;
    assert_eq!(h.supervisor.kinds(), vec![SourceKind::Idle, SourceKind::Queue]);
    assert_eq!(h.playing(), Some((SourceKind::Queue, "b.mp4".to_string())));
    assert_eq!(h.supervisor.max_alive(), 1);
}

#[tokio::test]
async fn test_missing_upload_is_dropped() {
    let mut h = Harness::new();
    h.state.set_broadcasting(true);
    h.state.enqueue("gone.mp4");

    h.orchestrator.tick().await;
    assert!(h.supervisor.launches().is_empty());
    assert_eq!(h.state.queue_len(), 0);

    h.orchestrator.tick().await;
    assert_eq!(h.supervisor.kinds(), vec![SourceKind::Idle]);
}

#[tokio::test]
async fn test_broadcast_off_stops_encoder() {
    let mut h = Harness::new();
    h.state.set_broadcasting(true);
    h.orchestrator.tick().await;
    assert_eq!(h.supervisor.alive(), 1);

    h.state.set_broadcasting(false);
    h.orchestrator.tick().await;

    assert_eq!(h.supervisor.alive(), 0);
    assert!(h.state.playback().is_none());
    assert!(h.state.encoder().is_none());
    assert_eq!(h.orchestrator.current_source(), None);

    h.orchestrator.tick().await;
    assert_eq!(h.supervisor.terminations(), 1);
    assert_eq!(h.supervisor.launches().len(), 1);
}

#[tokio::test]
async fn test_auto_mode_plays_resolved_content() {
    let resolver = MockResolver::new(ResolverBehavior::Succeed);
    let mut h = Harness::new().with_resolver(resolver.clone());
    h.state.set_broadcasting(true);
    h.state.set_auto_mode(true);

    assert_eq!(h.orchestrator.tick().await, None);

    let launches = h.supervisor.launches();
    assert_eq!(launches[0].kind, SourceKind::RemoteUrl);
    assert_eq!(launches[0].source.as_deref(), Some("https://cdn.example/dance.mp4"));
    assert_eq!(launches[0].program_name, "Best of dance");
    assert_eq!(h.state.program_name(), "Best of dance");
    assert_eq!(h.playing(), Some((SourceKind::RemoteUrl, "Best of dance".to_string())));
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_uploads_win_over_auto_mode() {
    let resolver = MockResolver::new(ResolverBehavior::Succeed);
    let mut h = Harness::new().with_resolver(resolver.clone());
    h.state.set_broadcasting(true);
    h.state.set_auto_mode(true);
    h.upload("a.mp4");

    h.orchestrator.tick().await;

    assert_eq!(h.supervisor.kinds(), vec![SourceKind::Queue]);
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_resolver_failure_falls_back_to_idle_with_backoff() {
    let mut h = Harness::new().with_resolver(MockResolver::new(ResolverBehavior::Fail));
    h.state.set_broadcasting(true);
    h.state.set_auto_mode(true);

    let backoff = h.orchestrator.tick().await;

    assert_eq!(backoff, Some(Duration::from_secs(5)));
    assert_eq!(h.supervisor.kinds(), vec![SourceKind::Idle]);
}

#[tokio::test]
async fn test_resolver_timeout_counts_as_failure() {
    let mut h = Harness::new().with_resolver(MockResolver::new(ResolverBehavior::Hang));
    h.state.set_broadcasting(true);
    h.state.set_auto_mode(true);

    let started = std::time::Instant::now();
    let backoff = h.orchestrator.tick().await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(backoff, Some(Duration::from_secs(5)));
    assert_eq!(h.supervisor.kinds(), vec![SourceKind::Idle]);
}

#[tokio::test]
async fn test_stop_on_exited_encoder_is_noop() {
    let supervisor = MockSupervisor::default();
    let handle = supervisor
        .start(LaunchRequest::new(SourceKind::Idle, None, "idle"))
        .await;
    supervisor.exit_last();

    supervisor.stop(handle).await;

    assert_eq!(supervisor.terminations(), 0);
    assert_eq!(supervisor.alive(), 0);
}

#[tokio::test]
async fn test_at_most_one_encoder_across_mode_changes() {
    let mut h = Harness::new().with_resolver(MockResolver::new(ResolverBehavior::Succeed));
    h.state.set_broadcasting(true);

    let steps: Vec<Box<dyn Fn(&Harness)>> = vec![
        Box::new(|h: &Harness| h.upload("a.mp4")),
        Box::new(|h: &Harness| h.state.set_live_camera_mode(true)),
        Box::new(|h: &Harness| h.supervisor.exit_last()),
        Box::new(|h: &Harness| h.state.set_live_camera_mode(false)),
        Box::new(|h: &Harness| h.upload("b.mp4")),
        Box::new(|h: &Harness| h.supervisor.exit_last()),
        Box::new(|h: &Harness| h.state.set_auto_mode(true)),
        Box::new(|h: &Harness| h.supervisor.exit_last()),
        Box::new(|h: &Harness| h.state.set_broadcasting(false)),
        Box::new(|h: &Harness| h.state.set_broadcasting(true)),
    ];

    for step in &steps {
        step(&h);
        h.orchestrator.tick().await;
        assert!(h.supervisor.alive() <= 1);
        h.orchestrator.tick().await;
        assert!(h.supervisor.alive() <= 1);
    }

    assert_eq!(h.supervisor.max_alive(), 1);
}

#[tokio::test]
async fn test_run_stops_encoder_on_cancel() {
    let h = Harness::new();
    h.state.set_broadcasting(true);
    let Harness {
        uploads: _uploads,
        state,
        supervisor,
        orchestrator,
    } = h;

    let cancel = CancellationToken::new();
    let task = tokio::spawn(orchestrator.run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(supervisor.alive(), 1);

    cancel.cancel();
    task.await.unwrap();

    assert_eq!(supervisor.alive(), 0);
    assert_eq!(supervisor.kinds(), vec![SourceKind::Idle]);
    assert!(state.playback().is_none());
    assert!(state.encoder().is_none());
}
