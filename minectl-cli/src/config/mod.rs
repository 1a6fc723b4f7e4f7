use anyhow::{Context, Result};
use minectl_core::{OrchestratorConfig, Settings};
use minectl_excavator::ExcavatorConfig;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

static CONFIG_PATH: OnceCell<PathBuf> = OnceCell::new();

/// Everything minectl persists between runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub settings: Settings,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub excavator: ExcavatorConfig,

    /// Benchmark file, defaults to `benchmarks.json` next to the config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmarks_file: Option<PathBuf>,

    /// Price and balance feed file, defaults to `feed.json` next to the config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut settings = Settings::default();
        settings.pool.worker = gethostname::gethostname().to_string_lossy().to_string();

        Self {
            settings,
            orchestrator: OrchestratorConfig::default(),
            excavator: ExcavatorConfig::default(),
            benchmarks_file: None,
            feed_file: None,
        }
    }
}

impl AppConfig {
    pub fn benchmarks_path(&self) -> PathBuf {
        self.benchmarks_file
            .clone()
            .unwrap_or_else(|| config_dir().join("benchmarks.json"))
    }

    pub fn feed_path(&self) -> PathBuf {
        self.feed_file
            .clone()
            .unwrap_or_else(|| config_dir().join("feed.json"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        config.settings.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

/// Get the config file path
pub fn get_config_path() -> PathBuf {
    CONFIG_PATH.get().cloned().unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("minectl")
            .join("config.toml")
    })
}

/// Set custom config path
pub fn set_config_path(path: &str) {
    let _ = CONFIG_PATH.set(PathBuf::from(path));
}

/// Directory holding the config file and its companions
pub fn config_dir() -> PathBuf {
    get_config_path()
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Load configuration, falling back to defaults when no file exists
pub fn load_config() -> Result<AppConfig> {
    let path = get_config_path();
    if !path.exists() {
        debug!("No config at {}, using defaults", path.display());
        return Ok(AppConfig::default());
    }
    AppConfig::load_from(&path)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig) -> Result<()> {
    config.save_to(&get_config_path())
}
