//! Configuration loading

use anyhow::Result;
use std::path::Path;

use crate::Config;

/// Locate a config file, load it and validate the result
///
/// Config file search order:
/// 1. `explicit` argument (e.g. `--config` on the command line)
/// 2. `STRATA_CONFIG_PATH` environment variable
/// 3. `./strata.yaml`
/// 4. `/etc/strata/strata.yaml`
/// 5. Fall back to environment variables only
///
/// Runs before logging is initialized, so progress goes to stderr.
pub fn load_config(explicit: Option<&str>) -> Result<Config> {
    let config_path = explicit
        .map(str::to_string)
        .or_else(|| {
            std::env::var("STRATA_CONFIG_PATH")
                .ok()
                .filter(|p| Path::new(p).exists())
        })
        .or_else(|| {
            ["strata.yaml", "/etc/strata/strata.yaml"]
                .into_iter()
                .find(|p| Path::new(p).exists())
                .map(str::to_string)
        });

    let config = if let Some(path) = config_path {
        if !Path::new(&path).exists() {
            return Err(anyhow::anyhow!("Config file not found: {path}"));
        }
        eprintln!("Loading config from {path}");
        Config::from_file(&path).map_err(|e| anyhow::anyhow!("Failed to load {path}: {e}"))?
    } else {
        eprintln!("No config file found, using environment variables");
        Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {e}"))?
    };

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

    Ok(config)
}
