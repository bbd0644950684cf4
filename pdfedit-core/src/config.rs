use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
    /// Factor applied to decoded preview rasters to get their display size.
    pub display_scale: f64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub notice_ttl: Duration,
    pub preserve_formatting: bool,
    /// Where decoded page images are written, if anywhere.
    pub preview_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_owned(),
            request_timeout: Duration::from_secs(120),
            display_scale: 1.0,
            notice_ttl: Duration::from_millis(3000),
            preserve_formatting: true,
            preview_dir: None,
        }
    }
}

impl ClientConfig {
    pub fn default_path(dirs: &ProjectDirs) -> PathBuf {
        dirs.config_dir().join("config.toml")
    }

    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid config file {:?}", path))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.server_url.trim().is_empty() {
            bail!("server_url must not be empty");
        }
        if !self.display_scale.is_finite() || self.display_scale <= 0.0 {
            bail!("display_scale must be a positive number");
        }
        Ok(())
    }
}
