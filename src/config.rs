//! Configuration loaded from `cloudacct.toml`.
//!
//! Every field has a default, so a missing file or a partial one is valid.
//! `CLOUDACCT_ADAPTER_URL` takes precedence over the file's adapter URL.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "cloudacct.toml";
/// Overrides `adapter_base_url` when set and non-empty.
pub const ADAPTER_URL_ENV: &str = "CLOUDACCT_ADAPTER_URL";

/// Settings for the account service and the adapter client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccountsConfig {
    /// Page size used by duplicate scans and account listings.
    #[serde(default = "default_query_page_size")]
    pub query_page_size: usize,

    /// Skip every provider API call (usage-report provisioning).
    #[serde(default)]
    pub suppress_remote_calls: bool,

    /// Base URL of the provider adapter service. Without one the CLI runs
    /// against the in-memory adapter.
    #[serde(default)]
    pub adapter_base_url: Option<String>,

    /// Per-request timeout for the HTTP adapter, in seconds.
    #[serde(default = "default_adapter_timeout_secs")]
    pub adapter_timeout_secs: u64,
}

fn default_query_page_size() -> usize {
    100
}

fn default_adapter_timeout_secs() -> u64 {
    30
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            query_page_size: default_query_page_size(),
            suppress_remote_calls: false,
            adapter_base_url: None,
            adapter_timeout_secs: default_adapter_timeout_secs(),
        }
    }
}

impl AccountsConfig {
    /// Loads `path`, or `cloudacct.toml` in the working directory when no
    /// path is given. Only an explicit path has to exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(std::env::var(ADAPTER_URL_ENV).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = toml::from_str::<AccountsConfig>(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        if config.query_page_size == 0 {
            anyhow::bail!("query_page_size must be positive in {}", path.display());
        }
        Ok(config)
    }

    fn apply_env(&mut self, adapter_url: Option<String>) {
        if let Some(url) = adapter_url
            && !url.is_empty()
        {
            self.adapter_base_url = Some(url);
        }
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }
}
