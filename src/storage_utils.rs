use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

use crate::models::{Interval, Period};

// CONFIGURATION

pub const CONFIG_NAME: &str = "config";

const DEFAULT_INSTRUMENTS: &[&str] = &[
    "AAPL", "GOOGL", "MSFT", "COIN", "AMZN", "MRNA", "NVAX", "INO", "ARM", "BNTX", "VXRT", "NCLH",
    "AZN", "TCS", "LBPH", "AMD", "HIMS", "FIZZ", "CRSP", "LPL", "PRTA", "USCA", "USAC", "YY",
    "LYFT", "LI", "NIO", "JOBY", "SQ",
];

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("instrument list is empty")]
    NoInstruments,
    #[error("principal must be a positive amount, got {0}")]
    InvalidPrincipal(f64),
    #[error("fetch timeout must be at least one second")]
    InvalidTimeout,
    #[error("table must show at least one row")]
    InvalidTableRows,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Symbols offered for selection.
    pub instruments: Vec<String>,
    pub default_period: Period,
    pub default_interval: Interval,
    /// Initial investment amount.
    pub principal: f64,
    pub fetch_timeout_secs: u64,
    /// How many of the latest rows to show per symbol.
    pub table_rows: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            instruments: DEFAULT_INSTRUMENTS.iter().map(|s| s.to_string()).collect(),
            default_period: Period::default(),
            default_interval: Interval::default(),
            principal: 1000.0,
            fetch_timeout_secs: 10,
            table_rows: 5,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instruments.iter().all(|s| s.trim().is_empty()) {
            return Err(ConfigError::NoInstruments);
        }
        if !(self.principal.is_finite() && self.principal > 0.0) {
            return Err(ConfigError::InvalidPrincipal(self.principal));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        if self.table_rows == 0 {
            return Err(ConfigError::InvalidTableRows);
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

// STORAGE MANAGER

pub struct AsyncStorageManager {
    // Absolute path of the storage directory (e.g. ".../target/debug/storage")
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Storage directory relative to the running executable, created on demand.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> anyhow::Result<Self> {
        let exe_path = std::env::current_exe()?;

        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Could not find binary directory"))?
            .join(relative_path);

        Self::new(base_dir).await
    }

    pub async fn new(base_dir: PathBuf) -> anyhow::Result<Self> {
        if !fs::try_exists(&base_dir).await? {
            fs::create_dir_all(&base_dir).await?;
        }
        Ok(Self { base_dir })
    }

    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.base_dir.join(filename)
    }

    /// Serializes `data` to `<filename>.json`. Writes go to a `.tmp` file
    /// first and are renamed into place, so a crash never leaves a torn file.
    pub async fn save<T: Serialize>(&self, filename: &str, data: &T) -> anyhow::Result<()> {
        let file_name = format!("{}.json", filename);
        let final_path = self.base_dir.join(&file_name);
        let tmp_path = self.base_dir.join(format!("{}.tmp", file_name));

        let json_bytes = serde_json::to_vec_pretty(data)?;

        fs::write(&tmp_path, json_bytes).await?;
        fs::rename(tmp_path, final_path).await?;

        Ok(())
    }

    pub async fn load<T: DeserializeOwned>(&self, filename: &str) -> anyhow::Result<T> {
        let path = self.base_dir.join(format!("{}.json", filename));

        // serde_json validates UTF-8 itself, no need for read_to_string
        let content = fs::read(path).await?;

        let data = serde_json::from_slice(&content)?;
        Ok(data)
    }

    /// Loads the app config, writing the defaults first if none exists yet.
    pub async fn load_or_init_config(&self) -> anyhow::Result<AppConfig> {
        let path = self.base_dir.join(format!("{}.json", CONFIG_NAME));

        let config = if fs::try_exists(&path).await? {
            self.load(CONFIG_NAME).await?
        } else {
            let config = AppConfig::default();
            self.save(CONFIG_NAME, &config).await?;
            log::info!("wrote default config to {:?}", path);
            config
        };

        config.validate()?;
        Ok(config)
    }
}
