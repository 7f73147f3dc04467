use async_trait::async_trait;

use super::{Device, DeviceDiscovery};
use crate::error::Result;

/// Discovery source backed by a fixed device list, e.g. from the config file.
pub struct StaticDiscovery {
    devices: Vec<Device>,
}

impl StaticDiscovery {
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }
}

#[async_trait]
impl DeviceDiscovery for StaticDiscovery {
    fn name(&self) -> &str {
        "static"
    }

    async fn discover(&self) -> Result<Vec<Device>> {
        Ok(self.devices.clone())
    }
}
