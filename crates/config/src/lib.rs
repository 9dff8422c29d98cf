//! Configuration management for QC Vision
//!
//! This crate provides the typed service configuration, loaded from an
//! optional TOML file with environment-variable overrides, plus the static
//! per-model-type training defaults table.

mod training;

pub use training::{training_defaults, TrainingDefaults};

use std::env;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use common::{Error, ModelType, Result};

/// Default configuration file name, looked up in the working directory
pub const CONFIG_FILE: &str = "qc-vision.toml";

/// Prefix for environment-variable overrides
const ENV_PREFIX: &str = "QC_VISION_";

/// Service configuration
///
/// Every field has a default, so an empty file (or no file at all) yields a
/// runnable configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root of the image corpus (`ok/`, `ng/`, `unlabeled/` live below it)
    pub data_root: PathBuf,

    /// Root of the durable model namespace
    pub models_root: PathBuf,

    /// HTTP bind host
    pub host: String,

    /// HTTP bind port
    pub port: u16,

    /// Daily retraining schedule
    pub retrain: RetrainConfig,
}

/// Daily retraining schedule configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrainConfig {
    /// Whether the scheduler runs at all
    pub enabled: bool,

    /// Local hour of day the scheduler fires (0-23)
    pub hour: u32,

    /// Local minute the scheduler fires (0-59)
    pub minute: u32,

    /// Model type trained by scheduled runs
    pub model_type: ModelType,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            models_root: PathBuf::from("models"),
            host: "0.0.0.0".to_string(),
            port: 5000,
            retrain: RetrainConfig::default(),
        }
    }
}

impl Default for RetrainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hour: 2,
            minute: 0,
            model_type: ModelType::Patchcore,
        }
    }
}

impl EngineConfig {
    /// Loads the configuration from `qc-vision.toml` in the working
    /// directory (if present) and applies environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Loads the configuration from a specific file path.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = fs::read_to_string(path)?;
            toml::from_str(&raw)
                .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))?
        } else {
            debug!("No config file at {}, using defaults", path.display());
            EngineConfig::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Applies `QC_VISION_*` environment-variable overrides.
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_var("DATA_ROOT") {
            self.data_root = PathBuf::from(v);
        }
        if let Some(v) = env_var("MODELS_ROOT") {
            self.models_root = PathBuf::from(v);
        }
        if let Some(v) = env_var("HOST") {
            self.host = v;
        }
        if let Some(v) = env_var("PORT") {
            self.port = parse_env("PORT", &v)?;
        }
        if let Some(v) = env_var("RETRAIN_ENABLED") {
            self.retrain.enabled = parse_env("RETRAIN_ENABLED", &v)?;
        }
        if let Some(v) = env_var("RETRAIN_HOUR") {
            self.retrain.hour = parse_env("RETRAIN_HOUR", &v)?;
        }
        if let Some(v) = env_var("RETRAIN_MINUTE") {
            self.retrain.minute = parse_env("RETRAIN_MINUTE", &v)?;
        }
        if let Some(v) = env_var("RETRAIN_MODEL_TYPE") {
            self.retrain.model_type = ModelType::from_key(&v)?;
        }
        Ok(())
    }

    /// Validates cross-field constraints.
    fn validate(&self) -> Result<()> {
        if self.retrain.hour > 23 {
            return Err(Error::Config(format!(
                "retrain.hour must be 0-23, got {}",
                self.retrain.hour
            )));
        }
        if self.retrain.minute > 59 {
            return Err(Error::Config(format!(
                "retrain.minute must be 0-59, got {}",
                self.retrain.minute
            )));
        }
        self.host
            .parse::<IpAddr>()
            .map_err(|_| Error::Config(format!("host is not a valid IP address: {}", self.host)))?;
        Ok(())
    }

    /// Socket address the API server binds to
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| Error::Config(format!("host is not a valid IP address: {}", self.host)))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Directory holding labeled-OK (normal) reference images
    pub fn ok_dir(&self) -> PathBuf {
        self.data_root.join("ok")
    }

    /// Directory holding labeled-NG images
    pub fn ng_dir(&self) -> PathBuf {
        self.data_root.join("ng")
    }

    /// Directory holding unlabeled captures
    pub fn unlabeled_dir(&self) -> PathBuf {
        self.data_root.join("unlabeled")
    }

    /// Exclusive staging workspace used by in-flight training runs
    pub fn staging_root(&self) -> PathBuf {
        self.data_root.join("train_temp")
    }

    /// Creates the corpus directory tree if missing.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            self.data_root.clone(),
            self.ok_dir(),
            self.ng_dir(),
            self.unlabeled_dir(),
            self.models_root.clone(),
        ] {
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

fn env_var(suffix: &str) -> Option<String> {
    env::var(format!("{}{}", ENV_PREFIX, suffix)).ok()
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        Error::Config(format!(
            "invalid value for {}{}: {}",
            ENV_PREFIX, name, value
        ))
    })
}
