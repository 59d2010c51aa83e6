//! Observability configuration parsing from environment variables.

use super::parse_or;
use anyhow::Result;

/// Observability environment configuration
#[derive(Debug, Clone)]
pub struct ObservabilityEnvConfig {
    pub enabled: bool,
    /// Seconds between JSON metric snapshots.
    pub interval_secs: u64,
}

impl Default for ObservabilityEnvConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
        }
    }
}

impl ObservabilityEnvConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            enabled: parse_or(lookup, "OBSERVABILITY_ENABLED", true)?,
            interval_secs: parse_or(lookup, "OBSERVABILITY_INTERVAL", 60u64)?.max(1),
        })
    }
}
