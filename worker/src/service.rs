use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mobile_core::config::Config;
use mobile_core::context::ActionContext;
use mobile_core::selector::{filter_nodes, Selector};
use mobile_core::snapshot::{parse_cursor, Node, Snapshot, Store};
use mobile_core::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::bridge::PlatformDriver;
use crate::registry::Registry;
use crate::types::*;

const DEFAULT_TREE_PAGE: usize = 300;
const DEFAULT_FIND_LIMIT: usize = 50;
const DEFAULT_STREAM_FPS: u32 = 2;
const DEFAULT_SWIPE_DISTANCE: i32 = 400;
const DEFAULT_SWIPE_DURATION_MS: u32 = 200;

/// Errors surfaced as RPC-level failures. In-flight action failures never use
/// this; they travel inside `ActionResponse`.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
    #[error("stream cancelled by client")]
    Cancelled,
}

/// Platform-agnostic command dispatcher: resolves targets, routes bridge
/// calls through per-device executors, and caches UI snapshots.
pub struct MobileService {
    cfg: Config,
    registry: Registry,
    store: Arc<Store>,
}

impl MobileService {
    pub fn new(cfg: Config, driver: Arc<dyn PlatformDriver>) -> Self {
        let store = Store::new(
            cfg.snapshot_ttl,
            cfg.snapshot_cleanup_interval,
            cfg.max_snapshots_per_device,
        );
        Self {
            cfg,
            registry: Registry::new(driver),
            store,
        }
    }

    /// Ordered shutdown: executors drain before the store stops.
    pub async fn close(&self) {
        self.registry.close().await;
        self.store.close();
    }

    pub async fn list_devices(&self) -> Result<ListDevicesResponse, ServiceError> {
        let ctx = ActionContext::background();
        let list = self
            .registry
            .list_devices(&ctx)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let platform = self.registry.platform().as_str();
        let automation = self.registry.automation();
        let now = Utc::now().timestamp_millis();
        let devices = list
            .into_iter()
            .map(|d| Device {
                device_id: d.device_id,
                platform: platform.to_string(),
                name: d.name,
                model: d.model,
                os_version: d.os_version,
                is_simulator: d.is_simulator,
                status: "ready".to_string(),
                last_seen_unix_ms: now,
                capabilities: HashMap::from([(
                    "automation".to_string(),
                    automation.to_string(),
                )]),
            })
            .collect();

        Ok(ListDevicesResponse {
            devices,
            cache_age_ms: 0,
        })
    }

    pub async fn get_active_app(
        &self,
        device_id: &str,
        options: RequestOptions,
    ) -> Result<ActiveAppResponse, ServiceError> {
        let ctx = self.action_context(&options);
        let runtime = self
            .registry
            .runtime_for_device(&ctx, device_id)
            .await
            .map_err(|err| ServiceError::NotFound(err.to_string()))?;

        let bridge = Arc::clone(&runtime.bridge);
        let app = runtime
            .executor
            .submit(&ctx, move |run_ctx| async move {
                bridge.active_app(&run_ctx).await
            })
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;

        Ok(ActiveAppResponse {
            device_id: device_id.to_string(),
            bundle_id: app.bundle_id,
            app_name: app.app_name,
            is_foreground: true,
            observed_at_unix_ms: Utc::now().timestamp_millis(),
        })
    }

    pub async fn get_ui_tree(
        &self,
        device_id: &str,
        query: UiTreeQuery,
    ) -> Result<UiTreeResponse, ServiceError> {
        let ctx = self.action_context(&RequestOptions {
            timeout_ms: query.timeout_ms,
        });
        let runtime = self
            .registry
            .runtime_for_device(&ctx, device_id)
            .await
            .map_err(|err| ServiceError::NotFound(err.to_string()))?;

        let bridge = Arc::clone(&runtime.bridge);
        let mut nodes = runtime
            .executor
            .submit(&ctx, move |run_ctx| async move {
                bridge.dump_hierarchy(&run_ctx).await
            })
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;

        if query.depth_limit > 0 {
            nodes = prune_by_depth(nodes, query.depth_limit as i32);
        }

        let snap = self.store.put(device_id, nodes);
        let limit = if query.node_limit == 0 {
            DEFAULT_TREE_PAGE
        } else {
            query.node_limit
        };
        let page = self
            .store
            .page(&snap.id, &query.cursor, limit)
            .ok_or_else(|| ServiceError::NotFound("snapshot expired".to_string()))?;

        Ok(UiTreeResponse {
            device_id: device_id.to_string(),
            snapshot_id: snap.id,
            expires_at_unix_ms: snap.expires_at.timestamp_millis(),
            nodes: page.nodes,
            total_nodes: page.total,
            next_cursor: page.next_cursor,
        })
    }

    pub async fn find_elements(
        &self,
        device_id: &str,
        req: FindElementsRequest,
    ) -> Result<FindElementsResponse, ServiceError> {
        let ctx = ActionContext::background();
        let snap = self
            .resolve_snapshot(&ctx, device_id, &req.snapshot_id)
            .await
            .map_err(|err| ServiceError::NotFound(err.to_string()))?;

        let matches = filter_nodes(&snap.nodes, &req.selector);
        let start = parse_cursor(&req.cursor).min(matches.len());
        let limit = if req.limit == 0 {
            DEFAULT_FIND_LIMIT
        } else {
            req.limit
        };
        let end = (start + limit).min(matches.len());
        let next_cursor = if end < matches.len() {
            end.to_string()
        } else {
            String::new()
        };

        let elements = matches[start..end]
            .iter()
            .map(|node| Element {
                ref_id: node.ref_id.clone(),
                node: req.include_nodes.then(|| node.clone()),
            })
            .collect();

        Ok(FindElementsResponse {
            device_id: device_id.to_string(),
            snapshot_id: snap.id,
            elements,
            next_cursor,
            total_matched: matches.len(),
        })
    }

    pub async fn tap(&self, device_id: &str, req: TapRequest) -> ActionResponse {
        let started_at = Utc::now();
        let ctx = self.action_context(&req.options);
        let runtime = match self.registry.runtime_for_device(&ctx, device_id).await {
            Ok(runtime) => runtime,
            Err(err) => return action_failed(device_id, started_at, "DEVICE_NOT_FOUND", &err),
        };

        let point = match self
            .resolve_target_point(
                &ctx,
                device_id,
                &req.snapshot_id,
                &req.ref_id,
                req.selector.as_ref(),
                req.coordinates,
            )
            .await
        {
            Ok(point) => point,
            Err(err) => return action_failed(device_id, started_at, "INVALID_TARGET", &err),
        };

        let bridge = Arc::clone(&runtime.bridge);
        let count = if req.tap_count == 0 { 1 } else { req.tap_count };
        let submitted = runtime
            .executor
            .submit(&ctx, move |run_ctx| async move {
                bridge.tap(&run_ctx, point.0, point.1, count).await
            })
            .await;
        match submitted {
            Ok(()) => action_ok(device_id, started_at),
            Err(err) => action_failed(device_id, started_at, "TAP_FAILED", &err),
        }
    }

    pub async fn type_text(&self, device_id: &str, req: TypeRequest) -> ActionResponse {
        let started_at = Utc::now();
        let ctx = self.action_context(&req.options);
        let runtime = match self.registry.runtime_for_device(&ctx, device_id).await {
            Ok(runtime) => runtime,
            Err(err) => return action_failed(device_id, started_at, "DEVICE_NOT_FOUND", &err),
        };

        // Typing goes to the focused element, but the target must still
        // resolve.
        if let Err(err) = self
            .resolve_target_point(
                &ctx,
                device_id,
                &req.snapshot_id,
                &req.ref_id,
                req.selector.as_ref(),
                req.coordinates,
            )
            .await
        {
            return action_failed(device_id, started_at, "INVALID_TARGET", &err);
        }

        let bridge = Arc::clone(&runtime.bridge);
        let text = req.text.clone();
        let clear = req.clear_before_type;
        let submitted = runtime
            .executor
            .submit(&ctx, move |run_ctx| async move {
                bridge.type_text(&run_ctx, &text, clear).await
            })
            .await;
        match submitted {
            Ok(()) => action_ok(device_id, started_at),
            Err(err) => action_failed(device_id, started_at, "TYPE_FAILED", &err),
        }
    }

    pub async fn swipe(&self, device_id: &str, req: SwipeRequest) -> ActionResponse {
        let started_at = Utc::now();
        let ctx = self.action_context(&req.options);
        let runtime = match self.registry.runtime_for_device(&ctx, device_id).await {
            Ok(runtime) => runtime,
            Err(err) => return action_failed(device_id, started_at, "DEVICE_NOT_FOUND", &err),
        };

        let (sx, sy, ex, ey) = swipe_coordinates(&req);
        let duration = if req.duration_ms == 0 {
            DEFAULT_SWIPE_DURATION_MS
        } else {
            req.duration_ms
        };

        let bridge = Arc::clone(&runtime.bridge);
        let submitted = runtime
            .executor
            .submit(&ctx, move |run_ctx| async move {
                bridge.swipe(&run_ctx, sx, sy, ex, ey, duration).await
            })
            .await;
        match submitted {
            Ok(()) => action_ok(device_id, started_at),
            Err(err) => action_failed(device_id, started_at, "SWIPE_FAILED", &err),
        }
    }

    /// Streams screenshot frames as meta-plus-chunks events into `tx` until
    /// `max_frames` is reached, the client goes away, or a capture fails.
    pub async fn screenshot_stream(
        &self,
        ctx: &ActionContext,
        device_id: &str,
        query: StreamQuery,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ServiceError> {
        let runtime = self
            .registry
            .runtime_for_device(ctx, device_id)
            .await
            .map_err(|err| ServiceError::NotFound(err.to_string()))?;

        let requested = if query.max_fps == 0 {
            DEFAULT_STREAM_FPS
        } else {
            query.max_fps
        };
        let fps = requested.min(self.cfg.stream_max_fps).max(1);
        let chunk_size = if self.cfg.stream_chunk_bytes == 0 {
            65536
        } else {
            self.cfg.stream_chunk_bytes
        };

        let mut ticker = tokio::time::interval(Duration::from_secs(1) / fps);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // An interval's first tick fires immediately; swallow it and pace
        // frames from one interval in.
        ticker.tick().await;

        let mut frames_sent = 0u32;
        loop {
            if query.max_frames > 0 && frames_sent >= query.max_frames {
                let _ = tx
                    .send(StreamEvent::End {
                        reason: "max_frames_reached".to_string(),
                    })
                    .await;
                return Ok(());
            }

            tokio::select! {
                _ = ctx.done() => return Err(ServiceError::Cancelled),
                _ = ticker.tick() => {}
            }

            let bridge = Arc::clone(&runtime.bridge);
            let frame = runtime
                .executor
                .submit(ctx, move |run_ctx| async move {
                    bridge.screenshot(&run_ctx).await
                })
                .await
                .map_err(|err| match err {
                    Error::Cancelled => ServiceError::Cancelled,
                    other => ServiceError::Internal(other.to_string()),
                })?;

            let frame_id = Uuid::new_v4().to_string();
            let total_bytes = frame.data.len();
            let chunk_count = total_bytes.div_ceil(chunk_size);

            tx.send(StreamEvent::FrameMeta {
                frame_id: frame_id.clone(),
                device_id: device_id.to_string(),
                width: frame.width,
                height: frame.height,
                mime_type: "image/jpeg".to_string(),
                total_bytes: total_bytes as u64,
                chunk_count: chunk_count as u32,
                captured_at_unix_ms: Utc::now().timestamp_millis(),
            })
            .await
            .map_err(|_| ServiceError::Cancelled)?;

            for (i, chunk) in frame.data.chunks(chunk_size).enumerate() {
                tx.send(StreamEvent::Chunk {
                    frame_id: frame_id.clone(),
                    chunk_index: i as u32,
                    data: chunk.to_vec(),
                })
                .await
                .map_err(|_| ServiceError::Cancelled)?;
            }

            frames_sent += 1;
        }
    }

    /// Creates (or fetches) the device runtime without acting on it. Lets the
    /// stream endpoint answer not-found before committing to a response body.
    pub async fn ensure_runtime(
        &self,
        ctx: &ActionContext,
        device_id: &str,
    ) -> Result<(), ServiceError> {
        self.registry
            .runtime_for_device(ctx, device_id)
            .await
            .map(|_| ())
            .map_err(|err| ServiceError::NotFound(err.to_string()))
    }

    fn action_context(&self, options: &RequestOptions) -> ActionContext {
        let timeout = if options.timeout_ms > 0 {
            Duration::from_millis(options.timeout_ms)
        } else {
            self.cfg.action_timeout
        };
        ActionContext::with_timeout(timeout)
    }

    /// Resolution order: the named snapshot if it is live, else the device's
    /// latest, else a fresh capture.
    async fn resolve_snapshot(
        &self,
        ctx: &ActionContext,
        device_id: &str,
        snapshot_id: &str,
    ) -> Result<Snapshot, Error> {
        if !snapshot_id.is_empty() {
            if let Some(snap) = self.store.get(snapshot_id) {
                return Ok(snap);
            }
        }

        if let Some(latest) = self.store.latest(device_id) {
            return Ok(latest);
        }

        let runtime = self.registry.runtime_for_device(ctx, device_id).await?;
        let bridge = Arc::clone(&runtime.bridge);
        let nodes = runtime
            .executor
            .submit(ctx, move |run_ctx| async move {
                bridge.dump_hierarchy(&run_ctx).await
            })
            .await?;
        Ok(self.store.put(device_id, nodes))
    }

    /// Unifies the three addressing modes; explicit coordinates win, then
    /// ref-id against the resolved snapshot, then the first selector match.
    async fn resolve_target_point(
        &self,
        ctx: &ActionContext,
        device_id: &str,
        snapshot_id: &str,
        ref_id: &str,
        selector: Option<&Selector>,
        coordinates: Option<Coordinates>,
    ) -> Result<(i32, i32), Error> {
        if let Some(coords) = coordinates {
            return Ok((coords.x, coords.y));
        }

        let snap = self.resolve_snapshot(ctx, device_id, snapshot_id).await?;

        if !ref_id.is_empty() {
            let node = self
                .store
                .resolve_ref(&snap.id, ref_id)
                .ok_or_else(|| Error::InvalidTarget(format!("ref_id {ref_id} not found")))?;
            return Ok(node.bounds.center());
        }

        if let Some(selector) = selector {
            let matches = filter_nodes(&snap.nodes, selector);
            let first = matches
                .first()
                .ok_or_else(|| Error::InvalidTarget("selector matched zero nodes".to_string()))?;
            return Ok(first.bounds.center());
        }

        Err(Error::InvalidTarget("missing action target".to_string()))
    }
}

fn action_ok(device_id: &str, started_at: DateTime<Utc>) -> ActionResponse {
    ActionResponse {
        device_id: device_id.to_string(),
        action_id: Uuid::new_v4().to_string(),
        status: ActionStatus::Ok,
        started_at_unix_ms: started_at.timestamp_millis(),
        completed_at_unix_ms: Utc::now().timestamp_millis(),
        error_code: String::new(),
        error_message: String::new(),
        metadata: HashMap::new(),
    }
}

fn action_failed(
    device_id: &str,
    started_at: DateTime<Utc>,
    code: &str,
    err: &Error,
) -> ActionResponse {
    let error_message = err.to_string();
    let status = if deadline_like(code) || deadline_like(&error_message) {
        ActionStatus::Timeout
    } else {
        ActionStatus::Failed
    };
    ActionResponse {
        device_id: device_id.to_string(),
        action_id: Uuid::new_v4().to_string(),
        status,
        started_at_unix_ms: started_at.timestamp_millis(),
        completed_at_unix_ms: Utc::now().timestamp_millis(),
        error_code: code.to_string(),
        error_message,
        metadata: HashMap::new(),
    }
}

fn deadline_like(text: &str) -> bool {
    text.to_ascii_lowercase().contains("timeout")
}

/// Drops nodes deeper than `max_depth`. The list is pre-order, so a parent's
/// depth is always recorded before its children look it up. Kept nodes retain
/// their original `parent_ref_id` even when the parent was dropped.
fn prune_by_depth(nodes: Vec<Node>, max_depth: i32) -> Vec<Node> {
    if max_depth <= 0 {
        return nodes;
    }
    let mut depth_by_ref: HashMap<String, i32> = HashMap::from([(String::new(), -1)]);
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        let depth = depth_by_ref
            .get(&node.parent_ref_id)
            .copied()
            .unwrap_or(0)
            + 1;
        depth_by_ref.insert(node.ref_id.clone(), depth);
        if depth <= max_depth {
            out.push(node);
        }
    }
    out
}

/// Explicit start/end win; otherwise a directional swipe from screen center,
/// scrolling up by default.
fn swipe_coordinates(req: &SwipeRequest) -> (i32, i32, i32, i32) {
    if let (Some(start), Some(end)) = (req.start, req.end) {
        return (start.x, start.y, end.x, end.y);
    }
    let distance = if req.distance_px <= 0 {
        DEFAULT_SWIPE_DISTANCE
    } else {
        req.distance_px
    };
    let (sx, sy) = (500, 1000);
    match req.direction {
        Some(Direction::Down) => (sx, sy, sx, sy + distance),
        Some(Direction::Left) => (sx, sy, sx - distance, sy),
        Some(Direction::Right) => (sx, sy, sx + distance, sy),
        Some(Direction::Up) | None => (sx, sy, sx, sy - distance),
    }
}
