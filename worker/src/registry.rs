use std::collections::HashMap;
use std::sync::Arc;

use mobile_core::config::Platform;
use mobile_core::context::ActionContext;
use mobile_core::device::DeviceInfo;
use mobile_core::executor::Executor;
use mobile_core::Error;
use tokio::sync::Mutex;

use crate::bridge::{Bridge, PlatformDriver};

const EXECUTOR_QUEUE: usize = 256;

/// Per-device automation runtime: the serializing executor plus the bridge
/// client it drives. Lives until service shutdown.
pub struct Runtime {
    pub device_id: String,
    pub executor: Executor,
    pub bridge: Arc<dyn Bridge>,
}

/// Lazy lifecycle manager for device runtimes.
///
/// The lock is held across the whole lookup-or-create, so concurrent first
/// touch of one device performs a single port-forward and health check.
pub struct Registry {
    driver: Arc<dyn PlatformDriver>,
    inner: Mutex<Inner>,
}

struct Inner {
    runtimes: HashMap<String, Arc<Runtime>>,
    port_by_device: HashMap<String, u16>,
    next_port: u16,
}

impl Registry {
    pub fn new(driver: Arc<dyn PlatformDriver>) -> Self {
        let next_port = driver.base_port();
        Self {
            driver,
            inner: Mutex::new(Inner {
                runtimes: HashMap::new(),
                port_by_device: HashMap::new(),
                next_port,
            }),
        }
    }

    pub fn platform(&self) -> Platform {
        self.driver.platform()
    }

    pub fn automation(&self) -> &'static str {
        self.driver.automation()
    }

    pub async fn list_devices(&self, ctx: &ActionContext) -> Result<Vec<DeviceInfo>, Error> {
        self.driver.list_devices(ctx).await
    }

    pub async fn runtime_for_device(
        &self,
        ctx: &ActionContext,
        device_id: &str,
    ) -> Result<Arc<Runtime>, Error> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.runtimes.get(device_id) {
            return Ok(Arc::clone(existing));
        }

        // A failed attempt keeps its port assignment so the retry reuses it.
        let port = match inner.port_by_device.get(device_id) {
            Some(port) => *port,
            None => {
                let port = inner.next_port;
                inner.next_port += 1;
                inner.port_by_device.insert(device_id.to_string(), port);
                port
            }
        };

        let bridge = self.driver.connect(ctx, device_id, port).await?;
        tracing::info!(device_id, port, "device runtime ready");

        let runtime = Arc::new(Runtime {
            device_id: device_id.to_string(),
            executor: Executor::new(EXECUTOR_QUEUE),
            bridge,
        });
        inner
            .runtimes
            .insert(device_id.to_string(), Arc::clone(&runtime));
        Ok(runtime)
    }

    /// Closes every runtime's executor, draining queued work.
    pub async fn close(&self) {
        let inner = self.inner.lock().await;
        for runtime in inner.runtimes.values() {
            runtime.executor.close().await;
        }
    }
}
