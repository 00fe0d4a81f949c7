// src/config/loader.rs

//! # Configuration Loader
//!
//! Reads `default.toml` and deserializes it into `Config`. A missing file
//! falls back to built-in defaults; a malformed one is an error.

use std::{fs, path::Path};

use crate::config::model::{Config, ConfigError};

/// Load the configuration from `path`; defaults when the file is absent.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        log::info!("No config at {:?}; using defaults", path);
        return Ok(Config::default());
    }
    log::debug!("Reading config from {:?}", path);
    let txt = fs::read_to_string(path)?;
    let cfg: Config = toml::from_str(&txt)?;
    log::info!("Loaded config from {:?}", path);
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = load(Path::new("definitely-not-here.toml")).unwrap();
        assert!(cfg.capture.enabled);
    }
}
