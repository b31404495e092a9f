use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::engine::CommandTable;

/// Environment variable prefix for overrides, e.g. `SNAPLAYER__DRIVER__ROOT`.
pub const ENV_PREFIX: &str = "SNAPLAYER";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub driver: DriverConfig,
    pub diff: DiffConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub root: PathBuf,
    pub name: String,
    pub command_table: CommandTable,
    pub bookkeeping_suffix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    pub page_size: usize,
    pub staging_prefix: String,
    pub metadata_only_threshold: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
    pub json: bool,
}

impl Config {
    /// Load from an explicit file, or from an optional `snaplayer.*` file in
    /// the working directory, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path),
            None => config::File::with_name("snaplayer").required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.driver.root.as_os_str().is_empty() {
            bail!("driver.root must not be empty");
        }
        if self.diff.page_size < crate::diff::RECORD_HEADER_LEN {
            bail!(
                "diff.page_size must be at least {} bytes, got {}",
                crate::diff::RECORD_HEADER_LEN,
                self.diff.page_size
            );
        }
        if !self.diff.staging_prefix.starts_with('/') {
            bail!("diff.staging_prefix must start with '/': {}", self.diff.staging_prefix);
        }
        Ok(())
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/lib/snaplayer"),
            name: "snaplayer".to_string(),
            command_table: CommandTable::Layer,
            bookkeeping_suffix: "-init".to_string(),
        }
    }
}

impl DiffConfig {
    /// Path, relative to the parent layer, the engine stages a swapped layer under.
    pub fn staging_path(&self, id: &str) -> String {
        format!("{}-{id}", self.staging_prefix)
    }
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            page_size: crate::diff::DEFAULT_PAGE_SIZE,
            staging_prefix: "/.lcfs-diff".to_string(),
            metadata_only_threshold: 20,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: "snaplayer=debug,info".to_string(), json: false }
    }
}
