//! Configuration loading and management

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Version used when neither the caller nor the configuration names one
pub const DEFAULT_VERSION: &str = "v1";

/// Framework-wide settings
///
/// Mirrors the knobs a deployment tunes once at startup: which API versions
/// exist, which one unversioned registrations and requests fall back to, and
/// the defaults applied to resources that do not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SileoConfig {
    /// Version assumed when a registration or a request omits one
    pub fallback_version: String,

    /// Versions a resource may be registered under
    pub allowed_versions: Vec<String>,

    /// Prefix of every rate-limit counter key
    pub rate_limit_prefix: String,

    /// Default time-to-live of cached resource payloads, in seconds
    pub default_cache_timeout_secs: u64,

    /// Default number of rows returned by one `filter` call
    pub default_page_size: usize,
}

impl Default for SileoConfig {
    fn default() -> Self {
        Self {
            fallback_version: DEFAULT_VERSION.to_string(),
            allowed_versions: vec!["v1".to_string(), "v2".to_string()],
            rate_limit_prefix: "sileo_ratelimit".to_string(),
            default_cache_timeout_secs: 120,
            default_page_size: 10,
        }
    }
}

impl SileoConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Whether resources may be registered under `version`
    pub fn is_allowed_version(&self, version: &str) -> bool {
        self.allowed_versions.iter().any(|v| v == version)
    }
}
