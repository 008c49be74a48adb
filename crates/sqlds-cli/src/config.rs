//! CLI configuration.
//!
//! Reads the `[store]` section from `config/default.toml` (or the file
//! given with `--config`). A missing file or section yields defaults;
//! a file that exists but does not parse is an error.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use sqlds_store::RestOptions;
use sqlds_store::db::{DEFAULT_LOCATOR, MEMORY_NAME};

/// Default location of the config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Settings loaded from the `[store]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store name; `":memory:"` for a throwaway in-memory store.
    pub name: String,
    /// Path template; `$filename` is replaced by `name`.
    pub locator: String,
    /// Reject table/column names that are not plain identifiers.
    pub strict_identifiers: bool,
    /// Default tracing filter when `RUST_LOG` is not set.
    pub log_level: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: MEMORY_NAME.to_string(),
            locator: DEFAULT_LOCATOR.to_string(),
            strict_identifiers: true,
            log_level: "info".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn rest_options(&self) -> RestOptions {
        RestOptions {
            strict_identifiers: self.strict_identifiers,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    store: StoreConfig,
}

/// Load the store configuration from `path`.
pub fn load(path: &Path) -> Result<StoreConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StoreConfig::default()),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    parse(&content).with_context(|| format!("invalid config file {}", path.display()))
}

fn parse(content: &str) -> Result<StoreConfig> {
    let file: ConfigFile = toml::from_str(content)?;
    Ok(file.store)
}
