//! Top-level configuration
//!
//! Loaded from a JSON file. Every section is optional:
//!
//! ```json
//! {
//!   "permissions": { "categories": { "execute": "deny" }, "tools": { "view": "ask" } },
//!   "memory": { "observation_threshold": 20000 }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::GateResult;
use crate::memory::MemoryConfig;
use crate::permissions::PermissionRules;

/// Configuration for both gates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Initial permission rules for new sessions
    #[serde(default)]
    pub permissions: PermissionRules,

    /// Memory controller settings
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl GateConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> GateResult<Self> {
        let config: GateConfig = serde_json::from_str(json)?;
        config.memory.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn load(path: impl AsRef<Path>) -> GateResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&contents)?;
        tracing::info!("Loaded gate config from {:?}", path);
        Ok(config)
    }
}
