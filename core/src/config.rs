use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Android,
    Ios,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            other => Err(format!("unknown platform {other:?} (expected android or ios)")),
        }
    }
}

/// Process-wide configuration snapshot, loaded once at startup and passed by
/// value into the registry and service.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub platform: Platform,
    pub device_cache_ttl: Duration,
    pub snapshot_ttl: Duration,
    pub snapshot_cleanup_interval: Duration,
    pub max_snapshots_per_device: usize,
    pub action_timeout: Duration,
    pub stream_chunk_bytes: usize,
    pub stream_max_fps: u32,
    pub adb_path: String,
    pub uia2_base_port: u16,
    pub uia2_device_port: u16,
    pub simctl_path: String,
    pub wda_base_port: u16,
    pub wda_host: String,
    pub wda_scheme: String,
    pub log_level: String,
}

impl Config {
    pub fn defaults(platform: Platform) -> Self {
        Self {
            listen_addr: "127.0.0.1:50051".to_string(),
            platform,
            device_cache_ttl: Duration::from_millis(match platform {
                Platform::Android => 3000,
                Platform::Ios => 5000,
            }),
            snapshot_ttl: Duration::from_millis(30_000),
            snapshot_cleanup_interval: Duration::from_millis(10_000),
            max_snapshots_per_device: 8,
            action_timeout: Duration::from_millis(2000),
            stream_chunk_bytes: 65536,
            stream_max_fps: match platform {
                Platform::Android => 15,
                Platform::Ios => 12,
            },
            adb_path: "adb".to_string(),
            uia2_base_port: 7900,
            uia2_device_port: 7912,
            simctl_path: "xcrun".to_string(),
            wda_base_port: 8100,
            wda_host: "127.0.0.1".to_string(),
            wda_scheme: "http".to_string(),
            log_level: "info".to_string(),
        }
    }

    pub fn from_env() -> Self {
        Self::from_env_for(None)
    }

    /// Loads config from the environment. A platform passed in (from a CLI
    /// flag) wins over `WORKER_PLATFORM`; platform-dependent defaults are
    /// resolved after that choice.
    pub fn from_env_for(platform: Option<Platform>) -> Self {
        let platform = platform.unwrap_or_else(|| {
            env_str("WORKER_PLATFORM", "android")
                .parse()
                .unwrap_or(Platform::Android)
        });
        let d = Self::defaults(platform);
        Self {
            listen_addr: env_str("LISTEN_ADDR", &d.listen_addr),
            platform,
            device_cache_ttl: env_ms("DEVICE_CACHE_TTL_MS", d.device_cache_ttl),
            snapshot_ttl: env_ms("SNAPSHOT_TTL_MS", d.snapshot_ttl),
            snapshot_cleanup_interval: env_ms(
                "SNAPSHOT_CLEANUP_INTERVAL_MS",
                d.snapshot_cleanup_interval,
            ),
            max_snapshots_per_device: env_parse(
                "MAX_SNAPSHOTS_PER_DEVICE",
                d.max_snapshots_per_device,
            ),
            action_timeout: env_ms("ACTION_TIMEOUT_MS", d.action_timeout),
            stream_chunk_bytes: env_parse("STREAM_CHUNK_BYTES", d.stream_chunk_bytes),
            stream_max_fps: env_parse("STREAM_MAX_FPS", d.stream_max_fps),
            adb_path: env_str("ADB_PATH", &d.adb_path),
            uia2_base_port: env_parse("UIA2_BASE_PORT", d.uia2_base_port),
            uia2_device_port: env_parse("UIA2_DEVICE_PORT", d.uia2_device_port),
            simctl_path: env_str("SIMCTL_PATH", &d.simctl_path),
            wda_base_port: env_parse("WDA_BASE_PORT", d.wda_base_port),
            wda_host: env_str("WDA_HOST", &d.wda_host),
            wda_scheme: env_str("WDA_SCHEME", &d.wda_scheme),
            log_level: env_str("LOG_LEVEL", &d.log_level),
        }
    }
}

fn env_str(key: &str, fallback: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => fallback.to_string(),
    }
}

fn env_ms(key: &str, fallback: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(fallback)
}

fn env_parse<T: FromStr>(key: &str, fallback: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}
