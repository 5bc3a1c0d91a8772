//! Configuration for the stub dispatch server.
//!
//! Defines dispatch settings, store limits and stubs seeded at startup.

use crate::store::StoreConfig;
use crate::wire::StubSpec;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MockServerConfig {
    /// Stubs defined when the server starts
    #[serde(default)]
    pub stubs: Vec<StubSpec>,

    /// Dispatch settings
    #[serde(default)]
    pub settings: GlobalSettings,

    /// Store limits
    #[serde(default)]
    pub store: StoreConfig,
}

impl MockServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.settings.validate()?;
        for (i, stub) in self.stubs.iter().enumerate() {
            crate::service::validate_spec(stub, self.settings.strict_match_rules)
                .map_err(|e| anyhow::anyhow!("Stub {} ({}): {}", i, stub.url, e))?;
        }
        Ok(())
    }
}

/// Dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Log requests answered by a rule
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log requests answered by the default response or not found
    #[serde(default = "default_true")]
    pub log_unmatched: bool,

    /// Page size used when a listing does not ask for one
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    /// Upper bound for requested page sizes
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,

    /// Upper bound for rule delays (unbounded when unset)
    #[serde(default)]
    pub max_delay_ms: Option<u64>,

    /// Check match_rule format against match_type when defining stubs
    #[serde(default)]
    pub strict_match_rules: bool,
}

fn default_true() -> bool {
    true
}

fn default_page_size() -> u32 {
    10
}

fn default_max_page_size() -> u32 {
    100
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            max_delay_ms: None,
            strict_match_rules: false,
        }
    }
}

impl GlobalSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_page_size == 0 {
            anyhow::bail!("default_page_size must be >= 1");
        }
        if self.max_page_size < self.default_page_size {
            anyhow::bail!(
                "max_page_size ({}) must be >= default_page_size ({})",
                self.max_page_size,
                self.default_page_size
            );
        }
        Ok(())
    }
}
