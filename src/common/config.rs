//! Runtime settings.
//!
//! Settings come from an optional TOML file; anything missing falls back to
//! the defaults below.
//!
//! ```toml
//! db_path = "/var/lib/zumanji"
//! call_types = ["sql", "redis", "cache"]
//! history_points = 25
//!
//! [server]
//! port = 4599
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory of the sled database.
    pub db_path: PathBuf,
    /// Interfaces plotted in historical call series, in display order.
    pub call_types: Vec<String>,
    /// Number of builds in a historical series, including the build itself.
    pub history_points: usize,
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("zumanji.db"),
            call_types: vec!["sql".to_string(), "redis".to_string(), "cache".to_string()],
            history_points: 25,
            server: ServerSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: 4599 }
    }
}

impl Settings {
    /// Load settings from `path`, or return the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
