pub mod bootstrap;
pub mod config;
pub mod encoder;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod orchestrator;
pub mod overlay;
pub mod process;
pub mod resolver;
pub mod segments;
pub mod state;

pub use config::Config;
pub use error::{Error, Result};
pub use ledger::{Ledger, SegmentRecord, SegmentStatus};
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use state::{BroadcastState, PlaybackDescriptor, SourceKind};
