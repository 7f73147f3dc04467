//! Signing devices as seen by the bridge
//!
//! Discovery and transport live outside this crate. They plug in through
//! [`DeviceDiscovery`], [`DeviceConnector`] and [`SigningHandle`].

pub mod registry;
pub mod static_source;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::psbt::Psbt;

pub use registry::{DeviceRegistry, DiscoveryFailure, DiscoveryReport};
pub use static_source::StaticDiscovery;

/// A connected device as reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub fingerprint: String,
    pub path: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Device {
    pub fn new(fingerprint: &str, path: &str, device_type: &str) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            path: path.to_string(),
            device_type: device_type.to_string(),
            model: None,
        }
    }
}

/// One source of connected devices (a USB transport, a vendor SDK, ...).
#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    /// Short name used in logs and failure reports.
    fn name(&self) -> &str;

    async fn discover(&self) -> Result<Vec<Device>>;
}

/// Opens a device for signing.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    async fn open(&self, device_type: &str, path: &str) -> Result<Box<dyn SigningHandle>>;
}

/// An open device. `sign` may wait on the user for a long time.
#[async_trait]
pub trait SigningHandle: Send {
    async fn sign(&mut self, psbt: &Psbt) -> Result<Psbt>;
}
