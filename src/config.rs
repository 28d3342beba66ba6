//! Link configuration
//!
//! Tunables for the connection core. Both peers must agree on
//! `service_name`/`service_uuid` or a connection will never be accepted.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::network::{SERVICE_NAME, SERVICE_UUID};
use crate::protocol::FrameAssembly;

/// Default read chunk size in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Fallback sender name when the adapter has no advertised alias
pub const DEFAULT_ALIAS_FALLBACK: &str = "Unknown name";

/// Configuration for the connection core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Service record name advertised by the listener
    pub service_name: String,
    /// Pre-shared service identifier; must match on both peers
    pub service_uuid: String,
    /// Maximum bytes pulled off the socket per read
    pub chunk_size: usize,
    /// How inbound frame chunks are materialized
    pub frame_assembly: FrameAssembly,
    /// Sender name used when the adapter has no alias
    pub alias_fallback: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            service_name: SERVICE_NAME.to_string(),
            service_uuid: SERVICE_UUID.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            frame_assembly: FrameAssembly::default(),
            alias_fallback: DEFAULT_ALIAS_FALLBACK.to_string(),
        }
    }
}

impl LinkConfig {
    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize this configuration to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LinkConfig::default();
        assert_eq!(config.service_name, "chat_service");
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.frame_assembly, FrameAssembly::Sentinel);
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = LinkConfig::default();
        config.frame_assembly = FrameAssembly::CopyPayload;

        let json = config.to_json().unwrap();
        let parsed = LinkConfig::from_json(&json).unwrap();
        assert_eq!(parsed.frame_assembly, FrameAssembly::CopyPayload);
        assert_eq!(parsed.service_uuid, config.service_uuid);
    }
}
