use std::sync::Arc;

use async_trait::async_trait;
use mobile_core::config::{Config, Platform};
use mobile_core::context::ActionContext;
use mobile_core::device::DeviceInfo;
use mobile_core::Error;
use tokio::process::Command;

use crate::adb::AdbCache;
use crate::bridge::{Bridge, PlatformDriver};
use crate::simctl::SimctlCache;
use crate::uia2::Uia2Client;
use crate::wda::WdaClient;

pub fn driver_for(cfg: &Config) -> Arc<dyn PlatformDriver> {
    match cfg.platform {
        Platform::Android => Arc::new(AndroidDriver::new(cfg)),
        Platform::Ios => Arc::new(IosDriver::new(cfg)),
    }
}

/// Android devices: discovery and port-forwarding through adb, automation
/// through UIAutomator2.
pub struct AndroidDriver {
    adb_path: String,
    device_port: u16,
    base_port: u16,
    cache: AdbCache,
}

impl AndroidDriver {
    pub fn new(cfg: &Config) -> Self {
        Self {
            adb_path: cfg.adb_path.clone(),
            device_port: cfg.uia2_device_port,
            base_port: cfg.uia2_base_port,
            cache: AdbCache::new(cfg.adb_path.clone(), cfg.device_cache_ttl),
        }
    }

    async fn ensure_port_forward(
        &self,
        ctx: &ActionContext,
        device_id: &str,
        local_port: u16,
    ) -> Result<(), Error> {
        let adb_path = self.adb_path.clone();
        let device_id = device_id.to_string();
        let local = format!("tcp:{local_port}");
        let remote = format!("tcp:{}", self.device_port);
        ctx.run(async move {
            let status = Command::new(&adb_path)
                .args(["-s", &device_id, "forward", &local, &remote])
                .status()
                .await
                .map_err(|err| Error::Setup(format!("adb port-forward failed: {err}")))?;
            if !status.success() {
                return Err(Error::Setup(format!(
                    "adb port-forward failed with {status}"
                )));
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl PlatformDriver for AndroidDriver {
    fn platform(&self) -> Platform {
        Platform::Android
    }

    fn automation(&self) -> &'static str {
        "uiautomator2"
    }

    fn base_port(&self) -> u16 {
        self.base_port
    }

    async fn list_devices(&self, ctx: &ActionContext) -> Result<Vec<DeviceInfo>, Error> {
        self.cache.list(ctx).await
    }

    async fn connect(
        &self,
        ctx: &ActionContext,
        device_id: &str,
        local_port: u16,
    ) -> Result<Arc<dyn Bridge>, Error> {
        self.ensure_port_forward(ctx, device_id, local_port).await?;
        let client = Uia2Client::new(format!("http://127.0.0.1:{local_port}"));
        client.ensure_session(ctx).await?;
        Ok(Arc::new(client))
    }
}

/// iOS simulators: discovery through simctl, automation through a
/// WebDriverAgent that is directly reachable on the configured host.
pub struct IosDriver {
    wda_scheme: String,
    wda_host: String,
    base_port: u16,
    cache: SimctlCache,
}

impl IosDriver {
    pub fn new(cfg: &Config) -> Self {
        Self {
            wda_scheme: cfg.wda_scheme.clone(),
            wda_host: cfg.wda_host.clone(),
            base_port: cfg.wda_base_port,
            cache: SimctlCache::new(cfg.simctl_path.clone(), cfg.device_cache_ttl),
        }
    }
}

#[async_trait]
impl PlatformDriver for IosDriver {
    fn platform(&self) -> Platform {
        Platform::Ios
    }

    fn automation(&self) -> &'static str {
        "wda"
    }

    fn base_port(&self) -> u16 {
        self.base_port
    }

    async fn list_devices(&self, ctx: &ActionContext) -> Result<Vec<DeviceInfo>, Error> {
        self.cache.list(ctx).await
    }

    async fn connect(
        &self,
        ctx: &ActionContext,
        _device_id: &str,
        local_port: u16,
    ) -> Result<Arc<dyn Bridge>, Error> {
        let base_url = format!("{}://{}:{}", self.wda_scheme, self.wda_host, local_port);
        let client = WdaClient::new(base_url);
        client.ensure_session(ctx).await?;
        Ok(Arc::new(client))
    }
}
