use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use umbral::exec::aggregate::AggregateOptions;
use umbral::query::PlannerConfig;

/// Settings merged from the config file over built-in defaults.
#[derive(Debug, Default)]
pub struct CliConfig {
    path: Option<PathBuf>,
    pub planner: PlannerConfig,
    pub aggregate: AggregateOptions,
}

impl CliConfig {
    /// Loads `explicit`, or the default location when it exists.
    ///
    /// A missing default file yields the defaults; a missing explicit file
    /// is an error.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let (path, required) = match explicit {
            Some(path) => (Some(path), true),
            None => (default_config_path(), false),
        };
        let data = match path.as_ref() {
            Some(config_path) if required || config_path.exists() => read_file(config_path)?,
            _ => RawConfig::default(),
        };
        data.aggregate
            .validate()
            .map_err(|err| ConfigError::Invalid {
                message: err.to_string(),
            })?;
        if data.planner.max_plans_per_subgraph == 0 {
            return Err(ConfigError::Invalid {
                message: "planner.max_plans_per_subgraph must be positive".into(),
            });
        }
        Ok(Self {
            path,
            planner: data.planner,
            aggregate: data.aggregate,
        })
    }

    /// File the settings were read from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    planner: PlannerConfig,
    #[serde(default)]
    aggregate: AggregateOptions,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {message}")]
    Invalid { message: String },
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("umbral").join("config.toml"))
}
