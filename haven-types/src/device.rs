//! Device descriptors.

use crate::ids::DeviceId;
use serde::{Deserialize, Serialize};

/// The kind of device, as advertised during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Web,
}

impl DeviceType {
    /// Parses a device type from its advertised string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "desktop" => Some(Self::Desktop),
            "mobile" => Some(Self::Mobile),
            "web" => Some(Self::Web),
            _ => None,
        }
    }

    /// The string form used in TXT records and storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
            Self::Web => "web",
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A known device: created on first discovery, upgraded to `paired` after
/// a successful pairing handshake. Never deleted except by explicit user
/// action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: DeviceId,
    pub display_name: String,
    pub device_type: DeviceType,
    /// X25519 public key (32 bytes). Empty until pairing completes.
    pub public_key: Vec<u8>,
    pub address: String,
    pub port: u16,
    /// Unix milliseconds of the most recent discovery or sync contact.
    pub last_seen: i64,
    pub paired: bool,
}

impl Device {
    /// Creates an unpaired device record from discovery data.
    pub fn discovered(
        device_id: DeviceId,
        display_name: impl Into<String>,
        device_type: DeviceType,
        address: impl Into<String>,
        port: u16,
        last_seen: i64,
    ) -> Self {
        Self {
            device_id,
            display_name: display_name.into(),
            device_type,
            public_key: Vec::new(),
            address: address.into(),
            port,
            last_seen,
            paired: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_type_round_trip() {
        for ty in [DeviceType::Desktop, DeviceType::Mobile, DeviceType::Web] {
            assert_eq!(DeviceType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(DeviceType::parse("toaster"), None);
    }

    #[test]
    fn discovered_devices_start_unpaired() {
        let d = Device::discovered(
            DeviceId::new(),
            "Laptop",
            DeviceType::Desktop,
            "192.168.1.10",
            7465,
            0,
        );
        assert!(!d.paired);
        assert!(d.public_key.is_empty());
    }
}
