//! Agent configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Labels offered for task matching, e.g. `platform: linux/amd64`.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Target platform string reported at registration.
    #[serde(default = "detect_platform")]
    pub platform: String,
    /// Execution backend this agent drives.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Number of workflows run concurrently.
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    /// Health report interval in seconds.
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
    /// Fallback workflow timeout in minutes, used when a payload carries
    /// no timeout of its own.
    #[serde(default = "default_timeout_minutes")]
    pub default_timeout_minutes: u64,
}

fn default_backend() -> String {
    "docker".to_string()
}

fn default_capacity() -> u32 {
    2
}

fn default_health_interval() -> u64 {
    10
}

fn default_timeout_minutes() -> u64 {
    60
}

/// Detect the current platform in `os/arch` form.
pub fn detect_platform() -> String {
    format!("{}/{}", std::env::consts::OS, platform_arch())
}

fn platform_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            labels: HashMap::new(),
            platform: detect_platform(),
            backend: default_backend(),
            capacity: default_capacity(),
            health_interval_secs: default_health_interval(),
            default_timeout_minutes: default_timeout_minutes(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, std::io::Error> {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
