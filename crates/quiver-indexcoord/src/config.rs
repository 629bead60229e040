//! Configuration types for the index coordination service.

use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::Result;

/// Index coordinator configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IndexCoordConfig {
    /// Builder loop configuration.
    pub builder: BuilderConfig,
}

impl IndexCoordConfig {
    /// Load configuration from `indexcoord.toml` merged with
    /// `INDEXCOORD_`-prefixed environment variables, where `__`
    /// separates nesting levels (`INDEXCOORD_BUILDER__TASK_CAPACITY`).
    pub fn load() -> Result<Self> {
        let config = Figment::new()
            .merge(Toml::file("indexcoord.toml"))
            .merge(Env::prefixed("INDEXCOORD_").split("__"))
            .extract()?;
        Ok(config)
    }
}

/// Builder loop configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Interval between scheduled work passes.
    #[serde(with = "serde_duration_secs")]
    pub schedule_interval: Duration,
    /// Initial capacity hint for the in-memory task table.
    pub task_capacity: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            schedule_interval: Duration::from_secs(3),
            task_capacity: 1024,
        }
    }
}

/// Serde helper for Duration as seconds.
mod serde_duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
