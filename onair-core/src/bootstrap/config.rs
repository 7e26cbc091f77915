//! Configuration loading

use anyhow::Result;
use tracing::info;

use crate::Config;

/// Load configuration from config file or environment variables
///
/// Config file search order:
/// 1. `ONAIR_CONFIG_PATH` environment variable (explicit path)
/// 2. ./config.yaml (current working directory)
/// 3. /config/config.yaml (container mount path)
/// 4. Fall back to environment variables only
pub fn load_config() -> Result<Config> {
    load_config_from(None)
}

/// Same as [`load_config`], with `explicit` taking precedence over the search.
///
/// An explicit path must exist and parse; only searched locations fall back
/// to environment variables.
pub fn load_config_from(explicit: Option<&str>) -> Result<Config> {
    let config = if let Some(path) = explicit {
        if !std::path::Path::new(path).exists() {
            anyhow::bail!("Config file {path} does not exist");
        }
        eprintln!("Loading config from {path}");
        let cfg = Config::from_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load {path}: {e}"))?;
        eprintln!("Successfully loaded {path}");
        cfg
    } else {
        search_config()
    };

    // Fail fast on misconfigurations
    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Config validation error: {error}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    info!("Configuration loaded and validated successfully");
    Ok(config)
}

fn search_config() -> Config {
    let config_path = std::env::var("ONAIR_CONFIG_PATH")
        .ok()
        .filter(|p| std::path::Path::new(p).exists())
        .or_else(|| {
            ["config.yaml", "/config/config.yaml"]
                .into_iter()
                .find(|p| std::path::Path::new(p).exists())
                .map(str::to_string)
        });

    if let Some(path) = config_path {
        eprintln!("Loading config from {path}");
        match Config::from_file(&path) {
            Ok(cfg) => {
                eprintln!("Successfully loaded {path}");
                cfg
            }
            Err(e) => {
                eprintln!("Failed to load {path}: {e}");
                eprintln!("Falling back to environment variables");
                Config::from_env().unwrap_or_default()
            }
        }
    } else {
        eprintln!("No config file found, using environment variables");
        Config::from_env().unwrap_or_else(|e| {
            eprintln!("Failed to load config: {e}");
            eprintln!("Using default configuration");
            Config::default()
        })
    }
}
