use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use onair_core::{bootstrap::Services, Config};

/// Upper bound for loops to wind down after cancellation
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs the playout loops of one channel
pub struct PlayoutServer {
    config: Config,
    services: Services,
}

impl PlayoutServer {
    pub const fn new(config: Config, services: Services) -> Self {
        Self { config, services }
    }

    /// Spawn the orchestrator, discovery and lifecycle loops and wait for a
    /// shutdown signal
    pub async fn run(self) -> Result<()> {
        let Self { config, services } = self;
        let Services {
            state,
            ledger,
            lifecycle,
            discovery,
            orchestrator,
        } = services;

        let cancel = CancellationToken::new();

        let tasks: Vec<(&str, JoinHandle<()>)> = vec![
            ("orchestrator", tokio::spawn(orchestrator.run(cancel.child_token()))),
            (
                "discovery",
                tokio::spawn(discovery.run(config.orchestrator.discovery_tick(), cancel.child_token())),
            ),
            ("lifecycle", lifecycle.clone().start(cancel.child_token())),
        ];

        info!(
            "Playout running: broadcasting={}, live={}, auto={}, queue={}",
            state.is_broadcasting(),
            state.is_live_camera_mode(),
            state.is_auto_mode(),
            state.queue_len()
        );
        info!("Serving HLS from {:?}", config.paths.playlist_path());

        shutdown_signal().await;
        info!("Shutdown signal received, starting graceful shutdown...");
        cancel.cancel();

        for (name, task) in tasks {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await {
                Ok(Ok(())) => info!("{} stopped", name),
                Ok(Err(e)) => error!("{} task failed: {}", name, e),
                Err(_) => warn!("{} did not stop within {:?}", name, SHUTDOWN_TIMEOUT),
            }
        }

        let stats = state.statistics();
        let ledger_stats = ledger.stats();
        let lifecycle_stats = lifecycle.stats().await;
        info!(
            "Session summary: videos_played={}, segments_created={}, tracked={}, active={}, trash={}",
            stats.videos_played,
            stats.segments_created,
            ledger_stats.total,
            lifecycle_stats.active_segments,
            lifecycle_stats.trash_segments
        );
        info!("onair shut down");

        Ok(())
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
