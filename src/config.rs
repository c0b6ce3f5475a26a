use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::timer::TimerSettings;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("unable to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// What to do with a block whose wait certificate fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Log the failure and admit the block anyway.
    #[default]
    Lenient,
    Strict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Persistent storage handed to the enclave module.
    pub data_dir: PathBuf,
    pub policy: Policy,
    /// Used wherever the chain state carries no wait timer setting.
    pub timer: TimerSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/poet"),
            policy: Policy::default(),
            timer: TimerSettings::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let timer = &self.timer;
        if timer.certificate_sample_length == 0 || timer.fixed_duration_blocks == 0 {
            return Err(Error::Invalid(String::from("wait timer block counts must be positive")));
        }
        for (name, value) in [
            ("minimum_wait_time", timer.minimum_wait_time),
            ("target_wait_time", timer.target_wait_time),
            ("initial_wait_time", timer.initial_wait_time),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::Invalid(format!("{name} must be a positive number")));
            }
        }
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<(), Error> {
        fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}
