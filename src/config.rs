//! Configuration for the smc_fand daemon.
//!
//! Settings come from a YAML file found in the standard locations. A missing
//! file is not an error: every setting has a default.

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::sync::RwLock;

/// Which telemetry backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderChoice {
    /// SMC when it has fans, otherwise `powermetrics`.
    #[default]
    Auto,
    Smc,
    Powermetrics,
}

/// Daemon configuration.
///
/// # Example
///
/// ```yaml
/// version: 1
/// tick_seconds: 2
/// target_temperature: 60.0
/// provider: auto
/// fallback_min_rpm: 0
/// fallback_max_rpm: 6000
/// reconnect_interval_ticks: 5
/// shutdown_grace_ms: 3000
/// restore_automatic_on_exit: true
/// powermetrics_path: /usr/bin/powermetrics
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version for compatibility checking.
    pub version: u8,

    /// Control loop period in seconds.
    #[serde(default = "defaults::tick_seconds")]
    pub tick_seconds: u16,

    /// Set-point for automatic control, in degrees Celsius.
    #[serde(default = "defaults::target_temperature")]
    pub target_temperature: f32,

    #[serde(default)]
    pub provider: ProviderChoice,

    /// Bounds used when a fan does not report usable limits.
    #[serde(default = "defaults::fallback_min_rpm")]
    pub fallback_min_rpm: u32,

    #[serde(default = "defaults::fallback_max_rpm")]
    pub fallback_max_rpm: u32,

    /// Ticks between reconnection attempts once the SMC connection is lost.
    #[serde(default = "defaults::reconnect_interval_ticks")]
    pub reconnect_interval_ticks: u32,

    /// How long shutdown waits for an in-flight tick.
    #[serde(default = "defaults::shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Return all fans to hardware control when the daemon stops.
    #[serde(default = "defaults::restore_automatic_on_exit")]
    pub restore_automatic_on_exit: bool,

    #[serde(default = "defaults::powermetrics_path")]
    pub powermetrics_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            tick_seconds: defaults::tick_seconds(),
            target_temperature: defaults::target_temperature(),
            provider: ProviderChoice::default(),
            fallback_min_rpm: defaults::fallback_min_rpm(),
            fallback_max_rpm: defaults::fallback_max_rpm(),
            reconnect_interval_ticks: defaults::reconnect_interval_ticks(),
            shutdown_grace_ms: defaults::shutdown_grace_ms(),
            restore_automatic_on_exit: defaults::restore_automatic_on_exit(),
            powermetrics_path: defaults::powermetrics_path(),
        }
    }
}

impl Config {
    /// Checks values that serde cannot.
    ///
    /// # Example
    ///
    /// ```
    /// use smc_fand::config::Config;
    ///
    /// let config = Config::default();
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            anyhow::bail!("Unsupported config version {}", self.version);
        }
        if self.tick_seconds == 0 {
            anyhow::bail!("tick_seconds must be at least 1");
        }
        if self.fallback_min_rpm >= self.fallback_max_rpm {
            anyhow::bail!(
                "fallback_min_rpm ({}) must be below fallback_max_rpm ({})",
                self.fallback_min_rpm,
                self.fallback_max_rpm
            );
        }
        if !self.target_temperature.is_finite() {
            anyhow::bail!("target_temperature must be a finite number");
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.tick_seconds))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn tick_seconds() -> u16 {
        2
    }

    pub fn target_temperature() -> f32 {
        60.0
    }

    pub fn fallback_min_rpm() -> u32 {
        0
    }

    pub fn fallback_max_rpm() -> u32 {
        6000
    }

    pub fn reconnect_interval_ticks() -> u32 {
        5
    }

    pub fn shutdown_grace_ms() -> u64 {
        3000
    }

    pub fn restore_automatic_on_exit() -> bool {
        true
    }

    pub fn powermetrics_path() -> PathBuf {
        PathBuf::from("/usr/bin/powermetrics")
    }
}

fn locate_config() -> Option<PathBuf> {
    if let Ok(env_path) = env::var("SMC_FAND_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    if let Some(mut cfg_dir) = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
    {
        cfg_dir.push("smc_fand/config.yml");
        if cfg_dir.exists() {
            return Some(cfg_dir);
        }
    }

    let etc = Path::new("/etc/smc_fand/config.yml");
    if etc.exists() {
        return Some(etc.to_path_buf());
    }

    None
}

/// Shared, read-only view of the loaded configuration.
///
/// # Example
///
/// ```no_run
/// use smc_fand::config::ConfigManager;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config_manager = ConfigManager::load(None).await?;
/// let tick_seconds = config_manager.get().await.tick_seconds;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<Config>>,
    path: Option<PathBuf>,
}

impl ConfigManager {
    pub fn new(config: Config, path: Option<PathBuf>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            path,
        }
    }

    /// Loads configuration from `path` or the standard locations.
    ///
    /// Search order:
    /// 1. Provided path parameter
    /// 2. SMC_FAND_CONFIG environment variable
    /// 3. XDG_CONFIG_HOME/smc_fand/config.yml or ~/.config/smc_fand/config.yml
    /// 4. /etc/smc_fand/config.yml
    ///
    /// Falls back to [`Config::default`] when nothing is found.
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let Some(config_path) = path.or_else(locate_config) else {
            info!("No configuration file found, using defaults");
            return Ok(Self::new(Config::default(), None));
        };

        info!("Loading config from: {}", config_path.display());
        let config = Self::load_config_from_path(&config_path)?;
        Ok(Self::new(config, Some(config_path)))
    }

    pub async fn get(&self) -> tokio::sync::RwLockReadGuard<'_, Config> {
        self.config.read().await
    }

    /// Applies a command-line override of the set-point.
    pub async fn override_target_temperature(&self, celsius: f32) -> Result<()> {
        let mut config = self.config.write().await;
        let previous = config.target_temperature;
        config.target_temperature = celsius;
        if let Err(e) = config.validate() {
            config.target_temperature = previous;
            return Err(e.context("Invalid --target value"));
        }
        Ok(())
    }

    /// Path the configuration was read from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn clone_config(&self) -> Config {
        self.config.read().await.clone()
    }

    fn load_config_from_path(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML in: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Configuration validation failed for: {}", path.display()))?;

        Ok(config)
    }
}
