use serde::{Deserialize, Serialize};

/// One attached or available device as reported by the host discovery tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub name: String,
    pub model: String,
    pub os_version: String,
    pub is_simulator: bool,
    pub status: String,
}
