//! Remote device value type

use serde::{Deserialize, Serialize};

/// A remote endpoint identified by its hardware address.
///
/// The address is the device identity; the display name is whatever the
/// device advertises and may be absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteDevice {
    /// Advertised display name, if any
    pub name: Option<String>,
    /// Unique hardware address
    pub address: String,
}

impl RemoteDevice {
    /// Create a device record
    pub fn new(name: Option<String>, address: impl Into<String>) -> Self {
        Self {
            name,
            address: address.into(),
        }
    }

    /// Display name, falling back to the address for anonymous devices
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}
