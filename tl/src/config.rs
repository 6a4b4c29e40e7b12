//! Configuration for tplreload

use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Template root directory
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Template file extension, including the leading dot
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Keep raw template text on each tracked file
    #[serde(default)]
    pub cache_source: bool,

    /// Fail renders that reference missing fields
    #[serde(default)]
    pub strict_mode: bool,

    /// Log every template name loaded or updated
    #[serde(default)]
    pub verbose_reload: bool,

    /// Poll period for `tl watch`, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_root() -> PathBuf {
    PathBuf::from("templates")
}

fn default_extension() -> String {
    crate::DEFAULT_EXTENSION.to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            extension: default_extension(),
            cache_source: false,
            strict_mode: false,
            verbose_reload: false,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl LoaderConfig {
    /// Config rooted at `root` with every other field defaulted
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        debug!(?path, "LoaderConfig::load: called");
        if let Some(config_path) = path {
            let content = std::fs::read_to_string(config_path)?;
            let config: LoaderConfig = serde_yaml::from_str(&content)?;
            return Ok(config);
        }

        // Try default locations
        let default_paths = [
            dirs::config_dir().map(|p| p.join("tplreload").join("config.yml")),
            Some(PathBuf::from("tplreload.yml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                debug!(?path, "LoaderConfig::load: found config");
                let content = std::fs::read_to_string(path)?;
                let config: LoaderConfig = serde_yaml::from_str(&content)?;
                return Ok(config);
            }
        }

        Ok(LoaderConfig::default())
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
