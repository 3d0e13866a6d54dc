use std::collections::HashMap;

use mobile_core::selector::Selector;
use mobile_core::snapshot::Node;
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Ok,
    Failed,
    Timeout,
}

#[derive(Debug, Serialize)]
pub struct Device {
    pub device_id: String,
    pub platform: String,
    pub name: String,
    pub model: String,
    pub os_version: String,
    pub is_simulator: bool,
    pub status: String,
    pub last_seen_unix_ms: i64,
    pub capabilities: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ListDevicesResponse {
    pub devices: Vec<Device>,
    pub cache_age_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ActiveAppResponse {
    pub device_id: String,
    pub bundle_id: String,
    pub app_name: String,
    pub is_foreground: bool,
    pub observed_at_unix_ms: i64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RequestOptions {
    #[serde(default)]
    pub timeout_ms: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct UiTreeQuery {
    #[serde(default)]
    pub depth_limit: u32,
    #[serde(default)]
    pub node_limit: usize,
    #[serde(default)]
    pub cursor: String,
    #[serde(default)]
    pub timeout_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct UiTreeResponse {
    pub device_id: String,
    pub snapshot_id: String,
    pub expires_at_unix_ms: i64,
    pub nodes: Vec<Node>,
    pub total_nodes: usize,
    pub next_cursor: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct FindElementsRequest {
    #[serde(default)]
    pub snapshot_id: String,
    #[serde(default)]
    pub selector: Selector,
    #[serde(default)]
    pub cursor: String,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub include_nodes: bool,
}

#[derive(Debug, Serialize)]
pub struct Element {
    pub ref_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<Node>,
}

#[derive(Debug, Serialize)]
pub struct FindElementsResponse {
    pub device_id: String,
    pub snapshot_id: String,
    pub elements: Vec<Element>,
    pub next_cursor: String,
    pub total_matched: usize,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Coordinates {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Default, Deserialize)]
pub struct TapRequest {
    #[serde(default)]
    pub snapshot_id: String,
    #[serde(default)]
    pub ref_id: String,
    #[serde(default)]
    pub selector: Option<Selector>,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub tap_count: u32,
    #[serde(default)]
    pub options: RequestOptions,
}

#[derive(Debug, Default, Deserialize)]
pub struct TypeRequest {
    pub text: String,
    #[serde(default)]
    pub clear_before_type: bool,
    #[serde(default)]
    pub snapshot_id: String,
    #[serde(default)]
    pub ref_id: String,
    #[serde(default)]
    pub selector: Option<Selector>,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub options: RequestOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Default, Deserialize)]
pub struct SwipeRequest {
    #[serde(default)]
    pub start: Option<Coordinates>,
    #[serde(default)]
    pub end: Option<Coordinates>,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub distance_px: i32,
    #[serde(default)]
    pub duration_ms: u32,
    #[serde(default)]
    pub options: RequestOptions,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub device_id: String,
    pub action_id: String,
    pub status: ActionStatus,
    pub started_at_unix_ms: i64,
    pub completed_at_unix_ms: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error_code: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub max_fps: u32,
    #[serde(default)]
    pub max_frames: u32,
}

/// One message of a screenshot stream, serialized as a line of NDJSON.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    FrameMeta {
        frame_id: String,
        device_id: String,
        width: u32,
        height: u32,
        mime_type: String,
        total_bytes: u64,
        chunk_count: u32,
        captured_at_unix_ms: i64,
    },
    Chunk {
        frame_id: String,
        chunk_index: u32,
        #[serde(serialize_with = "base64_bytes")]
        data: Vec<u8>,
    },
    End {
        reason: String,
    },
}

fn base64_bytes<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    serializer.serialize_str(&STANDARD.encode(data))
}
