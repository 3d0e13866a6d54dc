use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use mobile_core::context::ActionContext;
use mobile_core::device::DeviceInfo;
use mobile_core::Error;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::Instant;

const RUNTIME_PREFIX: &str = "com.apple.CoreSimulator.SimRuntime.";

/// TTL-refreshed listing of iOS simulators via `xcrun simctl list devices
/// --json`.
pub struct SimctlCache {
    xcrun_path: String,
    ttl: Duration,
    state: RwLock<CacheState>,
}

#[derive(Default)]
struct CacheState {
    last_fetch: Option<Instant>,
    devices: Vec<DeviceInfo>,
}

#[derive(Deserialize)]
struct SimctlList {
    #[serde(default)]
    devices: HashMap<String, Vec<SimctlDevice>>,
}

#[derive(Deserialize)]
struct SimctlDevice {
    #[serde(default)]
    udid: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default, rename = "isAvailable")]
    is_available: bool,
    #[serde(default)]
    availability: String,
}

impl SimctlCache {
    pub fn new(xcrun_path: String, ttl: Duration) -> Self {
        Self {
            xcrun_path,
            ttl,
            state: RwLock::new(CacheState::default()),
        }
    }

    pub async fn list(&self, ctx: &ActionContext) -> Result<Vec<DeviceInfo>, Error> {
        {
            let state = self.state.read().expect("simctl cache lock");
            if let Some(last) = state.last_fetch {
                if last.elapsed() < self.ttl && !state.devices.is_empty() {
                    return Ok(state.devices.clone());
                }
            }
        }
        self.refresh(ctx).await
    }

    async fn refresh(&self, ctx: &ActionContext) -> Result<Vec<DeviceInfo>, Error> {
        let xcrun_path = self.xcrun_path.clone();
        let raw = ctx
            .run(async move {
                let output = Command::new(&xcrun_path)
                    .args(["simctl", "list", "devices", "--json"])
                    .output()
                    .await
                    .map_err(|err| Error::Discovery(format!("spawn {xcrun_path}: {err}")))?;
                if !output.status.success() {
                    return Err(Error::Discovery(format!(
                        "{xcrun_path} simctl exited with {}",
                        output.status
                    )));
                }
                Ok(output.stdout)
            })
            .await?;

        let devices = parse_simctl_devices(&raw)?;
        let mut state = self.state.write().expect("simctl cache lock");
        state.devices = devices.clone();
        state.last_fetch = Some(Instant::now());
        Ok(devices)
    }
}

/// Parses the simctl JSON listing. Devices are grouped by runtime key, which
/// yields the OS version; entries marked unavailable in both fields are
/// skipped.
pub(crate) fn parse_simctl_devices(raw: &[u8]) -> Result<Vec<DeviceInfo>, Error> {
    let payload: SimctlList = serde_json::from_slice(raw)
        .map_err(|err| Error::Discovery(format!("simctl json: {err}")))?;

    let mut out = Vec::with_capacity(16);
    for (runtime, devices) in &payload.devices {
        let version = runtime
            .strip_prefix(RUNTIME_PREFIX)
            .unwrap_or(runtime)
            .replace('-', " ");
        for device in devices {
            if !device.is_available && device.availability == "(unavailable)" {
                continue;
            }
            out.push(DeviceInfo {
                device_id: device.udid.clone(),
                name: device.name.clone(),
                model: device.name.clone(),
                os_version: version.clone(),
                is_simulator: true,
                status: device.state.to_lowercase(),
            });
        }
    }
    Ok(out)
}
