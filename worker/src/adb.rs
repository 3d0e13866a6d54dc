use std::sync::RwLock;
use std::time::Duration;

use mobile_core::context::ActionContext;
use mobile_core::device::DeviceInfo;
use mobile_core::Error;
use tokio::process::Command;
use tokio::time::Instant;

/// TTL-refreshed listing of attached Android devices via `adb devices -l`.
///
/// Two concurrent refreshes may both shell out; last writer wins, which is
/// fine because the tool's output is idempotent.
pub struct AdbCache {
    adb_path: String,
    ttl: Duration,
    state: RwLock<CacheState>,
}

#[derive(Default)]
struct CacheState {
    last_fetch: Option<Instant>,
    devices: Vec<DeviceInfo>,
}

impl AdbCache {
    pub fn new(adb_path: String, ttl: Duration) -> Self {
        Self {
            adb_path,
            ttl,
            state: RwLock::new(CacheState::default()),
        }
    }

    pub async fn list(&self, ctx: &ActionContext) -> Result<Vec<DeviceInfo>, Error> {
        {
            let state = self.state.read().expect("adb cache lock");
            if let Some(last) = state.last_fetch {
                if last.elapsed() < self.ttl && !state.devices.is_empty() {
                    return Ok(state.devices.clone());
                }
            }
        }
        self.refresh(ctx).await
    }

    async fn refresh(&self, ctx: &ActionContext) -> Result<Vec<DeviceInfo>, Error> {
        let adb_path = self.adb_path.clone();
        let raw = ctx
            .run(async move {
                let output = Command::new(&adb_path)
                    .args(["devices", "-l"])
                    .output()
                    .await
                    .map_err(|err| Error::Discovery(format!("spawn {adb_path}: {err}")))?;
                if !output.status.success() {
                    return Err(Error::Discovery(format!(
                        "{adb_path} devices exited with {}",
                        output.status
                    )));
                }
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            })
            .await?;

        let devices = parse_adb_devices(&raw);
        let mut state = self.state.write().expect("adb cache lock");
        state.devices = devices.clone();
        state.last_fetch = Some(Instant::now());
        Ok(devices)
    }
}

/// Parses `adb devices -l` output. First token is the serial, second the
/// status; remaining `key:value` tokens fill model and name.
pub(crate) fn parse_adb_devices(raw: &str) -> Vec<DeviceInfo> {
    let mut out = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("List of devices") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }

        let mut info = DeviceInfo {
            device_id: parts[0].to_string(),
            status: parts[1].to_string(),
            name: parts[0].to_string(),
            os_version: "unknown".to_string(),
            ..DeviceInfo::default()
        };
        for part in &parts[2..] {
            if let Some(model) = part.strip_prefix("model:") {
                info.model = model.to_string();
            }
            if let Some(name) = part.strip_prefix("device:") {
                info.name = name.to_string();
            }
        }
        out.push(info);
    }
    out
}
