//! Cluster executor configuration
//!
//! Loaded from a `cluster.toml` file or built in code. Every field has a
//! default so partial files are accepted.

use std::fs;
use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::error::{ClusterError, ClusterResult};

/// Configuration of a [`ClusterExecutor`](crate::cluster::ClusterExecutor)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Whether clustering is enabled at all
    pub enabled: bool,
    /// Register the built-in debugging listener
    pub debug: bool,
    /// Name of the group channel to join
    pub channel_name: String,
    /// Threads executing inbound remote requests
    pub worker_threads: usize,
    /// Age after which unresolved pending calls are purged
    pub pending_call_ttl_secs: Option<u64>,
    /// Default log filter used by [`crate::logging::init`]
    pub log_level: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debug: false,
            channel_name: "ream-cluster".to_string(),
            worker_threads: num_cpus::get(),
            pending_call_ttl_secs: None,
            log_level: "info".to_string(),
        }
    }
}

impl ClusterConfig {
    /// Default configuration with clustering switched on
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> ClusterResult<Self> {
        let config: ClusterConfig = toml::from_str(content)
            .map_err(|e| ClusterError::Configuration(format!("Failed to parse cluster config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ClusterResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ClusterResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ClusterError::Configuration(format!("Failed to serialize cluster config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check field constraints
    pub fn validate(&self) -> ClusterResult<()> {
        if self.worker_threads == 0 {
            return Err(ClusterError::Configuration(
                "worker_threads must be greater than zero".to_string(),
            ));
        }
        if self.channel_name.trim().is_empty() {
            return Err(ClusterError::Configuration(
                "channel_name must not be empty".to_string(),
            ));
        }
        if self.pending_call_ttl_secs == Some(0) {
            return Err(ClusterError::Configuration(
                "pending_call_ttl_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pending_call_ttl(&self) -> Option<Duration> {
        self.pending_call_ttl_secs.map(Duration::from_secs)
    }
}
