use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Axis-aligned rectangle in device pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn center(&self) -> (i32, i32) {
        ((self.left + self.right) / 2, (self.top + self.bottom) / 2)
    }
}

/// One UI element, stored flat in pre-order traversal of the source tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub ref_id: String,
    pub parent_ref_id: String,
    pub index: i32,
    pub text: String,
    pub content_desc: String,
    pub resource_id: String,
    pub class_name: String,
    pub package_name: String,
    pub bounds: Bounds,
    pub enabled: bool,
    pub clickable: bool,
    pub focusable: bool,
    pub visible: bool,
    pub selected: bool,
    pub checked: bool,
}

/// Immutable capture of a device's UI at one moment.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: String,
    pub device_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub nodes: Vec<Node>,
}

/// One page out of a snapshot's node list.
#[derive(Debug)]
pub struct Page {
    pub nodes: Vec<Node>,
    pub next_cursor: String,
    pub total: usize,
}

const DEFAULT_PAGE_LIMIT: usize = 200;

struct Inner {
    items: HashMap<String, Snapshot>,
    latest_by_device: HashMap<String, String>,
    by_device: HashMap<String, Vec<String>>,
}

/// In-memory, TTL-expiring, per-device-bounded cache of UI snapshots.
///
/// All reads hand out copies so the lock is released before callers iterate.
/// Expired entries are invisible to lookups immediately; the periodic cleanup
/// task reclaims their memory later.
pub struct Store {
    inner: RwLock<Inner>,
    ttl: Duration,
    max_per_device: usize,
    cancel: CancellationToken,
}

impl Store {
    /// Creates the store and spawns its cleanup task. Must be called from
    /// within a tokio runtime.
    pub fn new(ttl: Duration, cleanup_interval: Duration, max_per_device: usize) -> Arc<Self> {
        let store = Arc::new(Self {
            inner: RwLock::new(Inner {
                items: HashMap::new(),
                latest_by_device: HashMap::new(),
                by_device: HashMap::new(),
            }),
            ttl,
            max_per_device,
            cancel: CancellationToken::new(),
        });
        tokio::spawn(cleanup_loop(Arc::clone(&store), cleanup_interval));
        store
    }

    /// Signals the cleanup task to exit. Producers must be shut down first.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Stores a new snapshot and returns a copy of it. Evicts the oldest
    /// snapshot for the device once the per-device bound is exceeded.
    pub fn put(&self, device_id: &str, nodes: Vec<Node>) -> Snapshot {
        let now = Utc::now();
        let id = format!("{}-{}", device_id, now.timestamp_nanos_opt().unwrap_or_default());
        let snap = Snapshot {
            id: id.clone(),
            device_id: device_id.to_string(),
            created_at: now,
            expires_at: now + chrono::Duration::milliseconds(self.ttl.as_millis() as i64),
            nodes,
        };

        let mut guard = self.inner.write().expect("snapshot store lock");
        let inner = &mut *guard;

        inner.items.insert(id.clone(), snap.clone());
        inner
            .latest_by_device
            .insert(device_id.to_string(), id.clone());
        let ids = inner.by_device.entry(device_id.to_string()).or_default();
        ids.push(id);
        if ids.len() > self.max_per_device {
            let oldest = ids.remove(0);
            inner.items.remove(&oldest);
        }

        snap
    }

    /// Misses on unknown ids and on expired entries; expired entries are left
    /// in place for the cleanup task.
    pub fn get(&self, snapshot_id: &str) -> Option<Snapshot> {
        let inner = self.inner.read().expect("snapshot store lock");
        let snap = inner.items.get(snapshot_id)?;
        if Utc::now() > snap.expires_at {
            return None;
        }
        Some(snap.clone())
    }

    /// Latest snapshot for a device. The latest pointer is not rewound on
    /// expiry, so an expired latest is a miss even when older live entries
    /// exist.
    pub fn latest(&self, device_id: &str) -> Option<Snapshot> {
        let id = {
            let inner = self.inner.read().expect("snapshot store lock");
            inner.latest_by_device.get(device_id)?.clone()
        };
        self.get(&id)
    }

    pub fn resolve_ref(&self, snapshot_id: &str, ref_id: &str) -> Option<Node> {
        let snap = self.get(snapshot_id)?;
        snap.nodes.into_iter().find(|n| n.ref_id == ref_id)
    }

    /// Cursor-paged view of a snapshot's nodes. The cursor is the decimal
    /// offset into the node list; malformed cursors start from 0. None only
    /// when the snapshot is absent or expired.
    pub fn page(&self, snapshot_id: &str, cursor: &str, limit: usize) -> Option<Page> {
        let snap = self.get(snapshot_id)?;

        let total = snap.nodes.len();
        if total == 0 {
            return Some(Page {
                nodes: Vec::new(),
                next_cursor: String::new(),
                total: 0,
            });
        }

        let start = parse_cursor(cursor);
        if start >= total {
            return Some(Page {
                nodes: Vec::new(),
                next_cursor: String::new(),
                total,
            });
        }

        let limit = if limit == 0 { DEFAULT_PAGE_LIMIT } else { limit };
        let end = (start + limit).min(total);
        let next_cursor = if end < total {
            end.to_string()
        } else {
            String::new()
        };

        Some(Page {
            nodes: snap.nodes[start..end].to_vec(),
            next_cursor,
            total,
        })
    }

    fn cleanup_expired(&self) {
        let now = Utc::now();
        let mut guard = self.inner.write().expect("snapshot store lock");
        let Inner {
            items,
            latest_by_device,
            by_device,
        } = &mut *guard;

        let before = items.len();
        items.retain(|_, snap| now <= snap.expires_at);
        let expired = before - items.len();
        if expired > 0 {
            tracing::debug!(expired, "snapshot cleanup");
        }

        by_device.retain(|device_id, ids| {
            ids.retain(|id| items.contains_key(id));
            match ids.last() {
                Some(last) => {
                    // The newest survivor becomes latest, which may be older
                    // than the last put if that one expired.
                    latest_by_device.insert(device_id.clone(), last.clone());
                    true
                }
                None => {
                    latest_by_device.remove(device_id);
                    false
                }
            }
        });
    }
}

/// The string-encoded offset of a pagination cursor; empty or malformed
/// cursors mean offset 0.
pub fn parse_cursor(cursor: &str) -> usize {
    if cursor.is_empty() {
        return 0;
    }
    cursor.parse().unwrap_or(0)
}

async fn cleanup_loop(store: Arc<Store>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => store.cleanup_expired(),
            _ = store.cancel.cancelled() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(n: usize) -> Vec<Node> {
        (0..n)
            .map(|i| Node {
                ref_id: format!("n-{i}"),
                parent_ref_id: if i == 0 {
                    String::new()
                } else {
                    "n-0".to_string()
                },
                index: i as i32,
                text: format!("node {i}"),
                ..Node::default()
            })
            .collect()
    }

    fn store(ttl_ms: u64, max: usize) -> Arc<Store> {
        // Cleanup interval far in the future so tests control expiry timing.
        Store::new(
            Duration::from_millis(ttl_ms),
            Duration::from_secs(3600),
            max,
        )
    }

    #[tokio::test]
    async fn get_hits_within_ttl_and_misses_after() {
        let store = store(40, 8);
        let snap = store.put("dev-1", nodes(3));
        assert!(store.get(&snap.id).is_some());
        tokio::time::sleep(Duration::from_millis(80)).await;
        // No cleanup has run; lookups still treat the entry as missing.
        assert!(store.get(&snap.id).is_none());
        assert!(store.latest("dev-1").is_none());
        store.close();
    }

    #[tokio::test]
    async fn per_device_cap_evicts_oldest() {
        let store = store(3_600_000, 2);
        let first = store.put("dev-1", nodes(1));
        let second = store.put("dev-1", nodes(1));
        let third = store.put("dev-1", nodes(1));

        {
            let inner = store.inner.read().expect("snapshot store lock");
            let ids = &inner.by_device["dev-1"];
            assert_eq!(ids, &vec![second.id.clone(), third.id.clone()]);
            assert!(!inner.items.contains_key(&first.id));
            assert_eq!(inner.latest_by_device["dev-1"], third.id);
            for id in ids {
                assert!(inner.items.contains_key(id));
            }
        }
        assert!(store.get(&first.id).is_none());
        assert_eq!(store.latest("dev-1").map(|s| s.id), Some(third.id));
        store.close();
    }

    #[tokio::test]
    async fn pagination_round_trip_covers_all_nodes() {
        let store = store(3_600_000, 8);
        let snap = store.put("dev-1", nodes(10));

        let mut collected = Vec::new();
        let mut cursor = String::new();
        let mut calls = 0;
        loop {
            let page = store.page(&snap.id, &cursor, 3).expect("snapshot present");
            assert_eq!(page.total, 10);
            collected.extend(page.nodes);
            calls += 1;
            if page.next_cursor.is_empty() {
                break;
            }
            cursor = page.next_cursor;
        }

        assert_eq!(calls, 4);
        assert_eq!(collected, snap.nodes);
        store.close();
    }

    #[tokio::test]
    async fn page_treats_malformed_cursor_as_start() {
        let store = store(3_600_000, 8);
        let snap = store.put("dev-1", nodes(4));

        let page = store.page(&snap.id, "not-a-number", 2).expect("present");
        assert_eq!(page.nodes[0].ref_id, "n-0");

        let page = store.page(&snap.id, "-3", 2).expect("present");
        assert_eq!(page.nodes[0].ref_id, "n-0");

        let past_end = store.page(&snap.id, "99", 2).expect("present");
        assert!(past_end.nodes.is_empty());
        assert!(past_end.next_cursor.is_empty());
        assert_eq!(past_end.total, 4);

        assert!(store.page("missing", "", 2).is_none());
        store.close();
    }

    #[tokio::test]
    async fn page_defaults_limit_when_zero() {
        let store = store(3_600_000, 8);
        let snap = store.put("dev-1", nodes(250));
        let page = store.page(&snap.id, "", 0).expect("present");
        assert_eq!(page.nodes.len(), DEFAULT_PAGE_LIMIT);
        assert_eq!(page.next_cursor, "200");
        store.close();
    }

    #[tokio::test]
    async fn resolve_ref_matches_positional_lookup() {
        let store = store(3_600_000, 8);
        let snap = store.put("dev-1", nodes(5));
        for (i, node) in snap.nodes.iter().enumerate() {
            assert_eq!(node.ref_id, format!("n-{i}"));
            let resolved = store.resolve_ref(&snap.id, &node.ref_id).expect("hit");
            assert_eq!(&resolved, node);
        }
        assert!(store.resolve_ref(&snap.id, "n-99").is_none());
        store.close();
    }

    #[tokio::test]
    async fn cleanup_drops_expired_and_rewrites_indexes() {
        let store = store(30, 8);
        store.put("dev-1", nodes(2));
        store.put("dev-1", nodes(2));
        tokio::time::sleep(Duration::from_millis(60)).await;
        store.cleanup_expired();

        let inner = store.inner.read().expect("snapshot store lock");
        assert!(inner.items.is_empty());
        assert!(inner.by_device.is_empty());
        assert!(inner.latest_by_device.is_empty());
        drop(inner);
        store.close();
    }

    #[tokio::test]
    async fn put_returns_copy_independent_of_store() {
        let store = store(3_600_000, 8);
        let mut snap = store.put("dev-1", nodes(2));
        snap.nodes[0].text = "mutated".to_string();
        let stored = store.get(&snap.id).expect("present");
        assert_eq!(stored.nodes[0].text, "node 0");
        store.close();
    }
}
