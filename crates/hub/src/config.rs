//! TOML config file loading and validation for the hub service.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_db_url")]
    pub db_url: String,
    #[serde(default = "default_image_dir")]
    pub image_dir: String,
}

fn default_http_port() -> u16 {
    8080
}

fn default_db_url() -> String {
    "sqlite:moisture-hub.db?mode=rwc".to_string()
}

fn default_image_dir() -> String {
    "images".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            db_url: default_db_url(),
            image_dir: default_image_dir(),
        }
    }
}

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.http_port == 0 {
            errors.push("http_port must be nonzero".to_string());
        }
        if self.db_url.trim().is_empty() {
            errors.push("db_url is empty".to_string());
        }
        if self.image_dir.trim().is_empty() {
            errors.push("image_dir is empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }
}

/// Load the config file at `path`. A missing file yields the defaults so a
/// fresh checkout runs without any setup.
pub fn load(path: &str) -> Result<Config> {
    if !Path::new(path).exists() {
        return Ok(Config::default());
    }

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {path}"))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("failed to parse config file {path}"))?;
    cfg.validate()?;
    Ok(cfg)
}

// ===========================================================================
// Tests
// ===========================================================================
