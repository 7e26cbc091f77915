mod server;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use onair_core::{
    bootstrap::{init_services, load_config_from},
    logging,
};

use server::PlayoutServer;

#[derive(Parser, Debug)]
#[command(name = "onair")]
#[command(about = "Single-channel HLS playout orchestrator", long_about = None)]
struct Args {
    /// Config file; must exist when given. Without it, ./config.yaml and
    /// /config/config.yaml are searched.
    #[arg(long, short = 'c', env = "ONAIR_CONFIG_PATH")]
    config: Option<String>,

    /// Start broadcasting immediately
    #[arg(long)]
    broadcast: bool,

    /// Start in live camera mode
    #[arg(long)]
    live: bool,

    /// Enable auto mode (remote content by hashtag)
    #[arg(long)]
    auto: bool,

    /// Initial hashtag for auto mode
    #[arg(long)]
    hashtag: Option<String>,

    /// Program name drawn on the picture
    #[arg(long)]
    program_name: Option<String>,

    /// Files (relative to the upload directory) to queue at startup
    #[arg(long, value_name = "FILE", num_args = 1..)]
    enqueue: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let config = load_config_from(args.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Starting onair v{}...", env!("CARGO_PKG_VERSION"));

    // 3. Initialize services
    let services = init_services(&config).await?;

    // 4. Apply initial state from the command line
    let state = &services.state;
    if args.auto {
        state.set_auto_mode(true);
    }
    if let Some(hashtag) = args.hashtag {
        state.set_current_hashtag(hashtag);
    }
    if let Some(name) = args.program_name {
        state.set_program_name(name);
    }
    for file in args.enqueue {
        info!("Queued at startup: {}", file);
        state.enqueue(file);
    }
    state.set_live_camera_mode(args.live);
    state.set_broadcasting(args.broadcast);

    // 5. Run until shutdown
    PlayoutServer::new(config, services).run().await
}
