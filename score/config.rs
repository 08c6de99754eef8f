//! Run configuration, loaded from TOML and overridden by command-line flags.
//!
//! Every field has a default, so an empty file (or no file at all) reproduces the
//! challenge container's behavior: read `/input`, write `/output`, and run 1000
//! bootstrap iterations of 10 neoplastic patients against 1000 NDBE patients.

use crate::bootstrap::BootstrapParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathConfig {
    /// Directory holding `predictions.json` and one sub-directory per job.
    pub input_dir: PathBuf,
    /// Directory that receives `metrics.json`.
    pub output_dir: PathBuf,
    /// Ground-truth metadata keyed by input image name.
    pub ground_truth: PathBuf,
    /// Optional TSV export of every bootstrap iteration's metrics.
    pub bootstrap_samples: Option<PathBuf>,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("/input"),
            output_dir: PathBuf::from("/output"),
            ground_truth: PathBuf::from(
                "/opt/ml/input/data/ground_truth/a_tarball_subdirectory/val_metadata.json",
            ),
            bootstrap_samples: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootstrapConfig {
    pub n_iterations: usize,
    pub sample_size: usize,
    pub imbalance_ratio: usize,
    /// Fixed seed for reproducible runs. A fresh one is drawn when unset.
    pub seed: Option<u64>,
    pub max_resample_attempts: usize,
    /// Worker threads for the global rayon pool. Uses rayon's default when unset.
    pub threads: Option<usize>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        let params = BootstrapParams::default();
        Self {
            n_iterations: params.n_iterations,
            sample_size: params.sample_size,
            imbalance_ratio: params.imbalance_ratio,
            seed: None,
            max_resample_attempts: params.max_resample_attempts,
            threads: None,
        }
    }
}

impl BootstrapConfig {
    /// Parameters for one run, with the seed already resolved.
    pub fn params(&self, seed: u64) -> BootstrapParams {
        BootstrapParams {
            n_iterations: self.n_iterations,
            sample_size: self.sample_size,
            imbalance_ratio: self.imbalance_ratio,
            seed,
            max_resample_attempts: self.max_resample_attempts,
        }
    }

    /// The configured seed, or a fresh one from OS entropy.
    ///
    /// Fresh seeds are kept within `i64::MAX` so that a logged seed can be replayed
    /// from a TOML file as well as from the command line.
    pub fn resolve_seed(&self) -> u64 {
        self.seed.unwrap_or_else(|| rand::random::<u64>() >> 1)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvaluationConfig {
    pub paths: PathConfig,
    pub bootstrap: BootstrapConfig,
}

impl EvaluationConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.bootstrap;
        if b.n_iterations == 0 {
            return Err(ConfigError::InvalidValue {
                field: "bootstrap.n_iterations",
                reason: "at least one iteration is required to summarize the bootstrap",
            });
        }
        if b.sample_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "bootstrap.sample_size",
                reason: "each iteration must draw at least one neoplastic patient",
            });
        }
        if b.imbalance_ratio == 0 {
            return Err(ConfigError::InvalidValue {
                field: "bootstrap.imbalance_ratio",
                reason: "each iteration must draw at least one NDBE patient",
            });
        }
        if b.sample_size.checked_mul(b.imbalance_ratio).is_none() {
            return Err(ConfigError::InvalidValue {
                field: "bootstrap.imbalance_ratio",
                reason: "sample_size * imbalance_ratio overflows the NDBE draw count",
            });
        }
        if b.max_resample_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "bootstrap.max_resample_attempts",
                reason: "must allow at least one draw per iteration",
            });
        }
        if b.threads == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "bootstrap.threads",
                reason: "must be positive when set",
            });
        }
        Ok(())
    }
}
