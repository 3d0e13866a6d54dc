use async_trait::async_trait;
use bytes::Bytes;
use mobile_core::config::Platform;
use mobile_core::context::ActionContext;
use mobile_core::device::DeviceInfo;
use mobile_core::snapshot::Node;
use mobile_core::Error;
use std::sync::Arc;

/// Foreground application as reported by a bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveApp {
    pub bundle_id: String,
    pub app_name: String,
}

/// One captured screenshot. Width/height are zero when the bridge does not
/// report dimensions and the image header is not decodable.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

/// The capability surface the core consumes from a platform bridge.
#[async_trait]
pub trait Bridge: Send + Sync {
    async fn ensure_session(&self, ctx: &ActionContext) -> Result<(), Error>;
    async fn active_app(&self, ctx: &ActionContext) -> Result<ActiveApp, Error>;
    async fn dump_hierarchy(&self, ctx: &ActionContext) -> Result<Vec<Node>, Error>;
    async fn tap(&self, ctx: &ActionContext, x: i32, y: i32, tap_count: u32) -> Result<(), Error>;
    async fn type_text(&self, ctx: &ActionContext, text: &str, clear: bool) -> Result<(), Error>;
    async fn swipe(
        &self,
        ctx: &ActionContext,
        sx: i32,
        sy: i32,
        ex: i32,
        ey: i32,
        duration_ms: u32,
    ) -> Result<(), Error>;
    async fn screenshot(&self, ctx: &ActionContext) -> Result<Frame, Error>;
}

/// Platform-specific device discovery and bridge setup, consumed by the
/// registry.
#[async_trait]
pub trait PlatformDriver: Send + Sync {
    fn platform(&self) -> Platform;
    /// Capability annotation reported on ListDevices.
    fn automation(&self) -> &'static str;
    /// First local port handed out for bridge connections.
    fn base_port(&self) -> u16;
    async fn list_devices(&self, ctx: &ActionContext) -> Result<Vec<DeviceInfo>, Error>;
    /// Establishes local reachability for the device (port-forward where the
    /// platform needs one), builds the bridge client, and health-checks it.
    async fn connect(
        &self,
        ctx: &ActionContext,
        device_id: &str,
        local_port: u16,
    ) -> Result<Arc<dyn Bridge>, Error>;
}

pub(crate) fn transport(err: reqwest::Error) -> Error {
    Error::Transport(err.to_string())
}
