use super::parse_or;
use anyhow::Result;
use std::time::Duration;

/// Model cache configuration
#[derive(Debug, Clone)]
pub struct CacheEnvConfig {
    pub max_size: usize,
    pub ttl: Duration,
    /// Treat an entry trained on different data as a miss.
    pub enforce_data_hash: bool,
}

impl Default for CacheEnvConfig {
    fn default() -> Self {
        Self {
            max_size: 32,
            ttl: Duration::from_secs(3600),
            enforce_data_hash: true,
        }
    }
}

impl CacheEnvConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            max_size: parse_or(lookup, "MODEL_CACHE_MAX_SIZE", 32usize)?,
            ttl: Duration::from_secs(parse_or(lookup, "MODEL_CACHE_TTL_SECS", 3600u64)?),
            enforce_data_hash: parse_or(lookup, "MODEL_CACHE_ENFORCE_DATA_HASH", true)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::lookup_from;

    #[test]
    fn test_cache_config() {
        let config = CacheEnvConfig::from_lookup(&|_: &str| None).unwrap();
        assert_eq!(config.max_size, 32);
        assert!(config.enforce_data_hash);

        let lookup = lookup_from(&[
            ("MODEL_CACHE_TTL_SECS", "5"),
            ("MODEL_CACHE_ENFORCE_DATA_HASH", "false"),
        ]);
        let config = CacheEnvConfig::from_lookup(&lookup).unwrap();
        assert_eq!(config.ttl, Duration::from_secs(5));
        assert!(!config.enforce_data_hash);
    }
}
