//! Bootstrap module for initializing the playout core
//!
//! This module handles:
//! - Configuration loading
//! - Filesystem preparation and component wiring

pub mod config;
pub mod services;

pub use config::{load_config, load_config_from};
pub use services::{init_services, Services};
