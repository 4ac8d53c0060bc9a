//! Agent fleet types.

use crate::ids::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registration details an agent announces on startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Target platform, e.g. `linux/amd64`.
    pub platform: String,
    /// Execution backend the agent drives.
    pub backend: String,
    pub version: String,
    /// Number of workflows the agent runs concurrently.
    pub capacity: u32,
}

/// A registered agent as tracked by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub platform: String,
    pub backend: String,
    pub version: String,
    pub capacity: u32,
    pub registered_at: DateTime<Utc>,
    pub last_contact_at: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn from_info(info: &AgentInfo) -> Self {
        Self {
            id: AgentId::new(),
            platform: info.platform.clone(),
            backend: info.backend.clone(),
            version: info.version.clone(),
            capacity: info.capacity,
            registered_at: Utc::now(),
            last_contact_at: None,
        }
    }
}
