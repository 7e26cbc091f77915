//! Component initialization and dependency wiring

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::encoder::{FfmpegSupervisor, Supervisor};
use crate::ledger::Ledger;
use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::overlay::{NoOverlay, OverlayProvider, StaticOverlay};
use crate::resolver::YtDlpResolver;
use crate::segments::{SegmentDiscovery, SegmentLifecycleManager};
use crate::state::BroadcastState;
use crate::Config;

/// Every long-lived component of one playout channel
pub struct Services {
    pub state: Arc<BroadcastState>,
    pub ledger: Arc<Ledger>,
    pub lifecycle: Arc<SegmentLifecycleManager>,
    pub discovery: SegmentDiscovery,
    pub orchestrator: Orchestrator,
}

/// Prepare the filesystem and build all components from `config`
pub async fn init_services(config: &Config) -> Result<Services> {
    let paths = &config.paths;

    tokio::fs::create_dir_all(&paths.upload_dir)
        .await
        .with_context(|| format!("Failed to create upload directory {:?}", paths.upload_dir))?;

    let ledger = Arc::new(Ledger::open(&paths.ledger_file).await);

    let lifecycle = Arc::new(SegmentLifecycleManager::new(
        paths,
        config.encoder.segment_extension.clone(),
        config.lifecycle.clone(),
        Arc::clone(&ledger),
    ));
    lifecycle
        .init()
        .await
        .context("Failed to prepare segment directories")?;
    if paths.purge_on_startup {
        lifecycle
            .purge_active()
            .await
            .context("Failed to clean active segment directory")?;
    }
    lifecycle.reconcile().await;

    let state = Arc::new(BroadcastState::new(
        config.orchestrator.auto_mode,
        config.orchestrator.initial_hashtag(),
    ));

    let overlay: Arc<dyn OverlayProvider> = if config.overlay.enabled {
        Arc::new(StaticOverlay::new(config.overlay.clone()))
    } else {
        Arc::new(NoOverlay)
    };
    let supervisor: Arc<dyn Supervisor> = Arc::new(FfmpegSupervisor::new(
        config.encoder.clone(),
        paths.clone(),
        config.overlay.program_name.clone(),
        overlay,
    ));

    let mut orchestrator = Orchestrator::new(
        Arc::clone(&state),
        supervisor,
        OrchestratorSettings::from_config(config),
    );
    if config.resolver.enabled {
        orchestrator = orchestrator.with_resolver(Arc::new(YtDlpResolver::new(config.resolver.clone())));
    }

    let discovery = SegmentDiscovery::new(
        paths.active_dir.clone(),
        config.encoder.segment_extension.clone(),
        f64::from(config.encoder.segment_duration_seconds),
        Arc::clone(&state),
        Arc::clone(&ledger),
    );

    info!(
        "Playout services initialized: active_dir={:?}, max_active={}, retention={}s",
        paths.active_dir, config.lifecycle.max_active_segments, config.lifecycle.retention_seconds
    );

    Ok(Services {
        state,
        ledger,
        lifecycle,
        discovery,
        orchestrator,
    })
}
