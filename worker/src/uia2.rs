use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use mobile_core::context::ActionContext;
use mobile_core::snapshot::{Bounds, Node};
use mobile_core::Error;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use crate::bridge::{transport, ActiveApp, Bridge, Frame};

/// HTTP client for the UIAutomator2 server reachable on a forwarded local
/// port.
pub struct Uia2Client {
    base_url: String,
    http: reqwest::Client,
}

impl Uia2Client {
    pub fn new(base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(64)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(8))
            .build()
            .expect("build reqwest client");
        Self { base_url, http }
    }

    async fn get(&self, ctx: &ActionContext, path: &str) -> Result<Bytes, Error> {
        ctx.run(async {
            let resp = self
                .http
                .get(format!("{}{}", self.base_url, path))
                .send()
                .await
                .map_err(transport)?;
            let status = resp.status();
            let body = resp.bytes().await.map_err(transport)?;
            if status.as_u16() >= 300 {
                return Err(Error::BridgeStatus {
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&body).into_owned(),
                });
            }
            Ok(body)
        })
        .await
    }

    async fn post_json(
        &self,
        ctx: &ActionContext,
        path: &str,
        body: serde_json::Value,
    ) -> Result<(), Error> {
        ctx.run(async {
            let resp = self
                .http
                .post(format!("{}{}", self.base_url, path))
                .json(&body)
                .send()
                .await
                .map_err(transport)?;
            let status = resp.status();
            if status.as_u16() >= 300 {
                let body = resp.bytes().await.unwrap_or_default();
                return Err(Error::BridgeStatus {
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&body).into_owned(),
                });
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl Bridge for Uia2Client {
    async fn ensure_session(&self, ctx: &ActionContext) -> Result<(), Error> {
        self.get(ctx, "/version").await.map(|_| ())
    }

    async fn active_app(&self, ctx: &ActionContext) -> Result<ActiveApp, Error> {
        #[derive(Deserialize)]
        struct CurrentApp {
            #[serde(default)]
            package: String,
            #[serde(default)]
            activity: String,
        }
        let body = self.get(ctx, "/app/current").await?;
        let app: CurrentApp = serde_json::from_slice(&body)
            .map_err(|err| Error::InvalidResponse(format!("current app: {err}")))?;
        Ok(ActiveApp {
            bundle_id: app.package,
            app_name: app.activity,
        })
    }

    async fn dump_hierarchy(&self, ctx: &ActionContext) -> Result<Vec<Node>, Error> {
        let body = self.get(ctx, "/dump/hierarchy").await?;
        parse_hierarchy(&String::from_utf8_lossy(&body))
    }

    async fn tap(&self, ctx: &ActionContext, x: i32, y: i32, tap_count: u32) -> Result<(), Error> {
        self.post_json(ctx, "/click", json!({"x": x, "y": y, "count": tap_count}))
            .await
    }

    async fn type_text(&self, ctx: &ActionContext, text: &str, clear: bool) -> Result<(), Error> {
        self.post_json(ctx, "/send_keys", json!({"text": text, "clear": clear}))
            .await
    }

    async fn swipe(
        &self,
        ctx: &ActionContext,
        sx: i32,
        sy: i32,
        ex: i32,
        ey: i32,
        duration_ms: u32,
    ) -> Result<(), Error> {
        self.post_json(
            ctx,
            "/swipe",
            json!({"sx": sx, "sy": sy, "ex": ex, "ey": ey, "duration_ms": duration_ms}),
        )
        .await
    }

    async fn screenshot(&self, ctx: &ActionContext) -> Result<Frame, Error> {
        let data = self.get(ctx, "/screenshot/0").await?;
        let (width, height) = decode_dimensions(&data);
        Ok(Frame {
            data,
            width,
            height,
        })
    }
}

/// Width/height from the image header; (0, 0) when not decodable.
fn decode_dimensions(data: &[u8]) -> (u32, u32) {
    image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()
        .and_then(|reader| reader.into_dimensions().ok())
        .unwrap_or((0, 0))
}

/// Flattens the UIAutomator2 hierarchy XML into pre-order nodes with `n-<i>`
/// ref ids.
pub(crate) fn parse_hierarchy(xml: &str) -> Result<Vec<Node>, Error> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|err| Error::InvalidResponse(format!("hierarchy xml: {err}")))?;
    let mut nodes = Vec::with_capacity(256);
    let mut counter = 0usize;
    let roots = doc
        .root_element()
        .children()
        .filter(|child| child.has_tag_name("node"));
    for (i, child) in roots.enumerate() {
        walk_hierarchy(child, "", i as i32, &mut counter, &mut nodes);
    }
    Ok(nodes)
}

fn walk_hierarchy(
    el: roxmltree::Node<'_, '_>,
    parent_ref: &str,
    index: i32,
    counter: &mut usize,
    out: &mut Vec<Node>,
) {
    let ref_id = format!("n-{counter}");
    *counter += 1;

    out.push(Node {
        ref_id: ref_id.clone(),
        parent_ref_id: parent_ref.to_string(),
        index,
        text: attr(el, "text"),
        content_desc: attr(el, "content-desc"),
        resource_id: attr(el, "resource-id"),
        class_name: attr(el, "class"),
        package_name: attr(el, "package"),
        bounds: parse_bounds(&attr(el, "bounds")),
        enabled: attr_bool(el, "enabled"),
        clickable: attr_bool(el, "clickable"),
        focusable: attr_bool(el, "focusable"),
        visible: attr_bool(el, "visible-to-user"),
        selected: attr_bool(el, "selected"),
        checked: attr_bool(el, "checked"),
    });

    let children = el.children().filter(|child| child.has_tag_name("node"));
    for (i, child) in children.enumerate() {
        walk_hierarchy(child, &ref_id, i as i32, counter, out);
    }
}

fn attr(el: roxmltree::Node<'_, '_>, key: &str) -> String {
    el.attribute(key).unwrap_or_default().to_string()
}

fn attr_bool(el: roxmltree::Node<'_, '_>, key: &str) -> bool {
    el.attribute(key)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

static BOUNDS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+),(\d+)\]\[(\d+),(\d+)\]").expect("bounds regex"));

/// Parses the `[L,T][R,B]` attribute format; zeroed bounds on mismatch.
fn parse_bounds(raw: &str) -> Bounds {
    let Some(caps) = BOUNDS_PATTERN.captures(raw) else {
        return Bounds::default();
    };
    let field = |i: usize| caps[i].parse().unwrap_or(0);
    Bounds {
        left: field(1),
        top: field(2),
        right: field(3),
        bottom: field(4),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HIERARCHY: &str = r#"<?xml version='1.0' encoding='UTF-8'?>
<hierarchy rotation="0">
  <node index="0" text="" resource-id="" class="android.widget.FrameLayout" package="com.example.app" content-desc="" enabled="true" clickable="false" focusable="false" visible-to-user="true" selected="false" checked="false" bounds="[0,0][1080,1920]">
    <node index="0" text="Login" resource-id="com.example.app:id/login" class="android.widget.Button" package="com.example.app" content-desc="Login button" enabled="true" clickable="true" focusable="true" visible-to-user="true" selected="false" checked="false" bounds="[100,200][300,260]"/>
    <node index="1" text="" resource-id="" class="android.widget.LinearLayout" package="com.example.app" content-desc="" enabled="true" clickable="false" focusable="false" visible-to-user="true" selected="false" checked="false" bounds="[0,300][1080,1920]">
      <node index="0" text="Remember me" resource-id="com.example.app:id/remember" class="android.widget.CheckBox" package="com.example.app" content-desc="" enabled="true" clickable="true" focusable="true" visible-to-user="true" selected="false" checked="true" bounds="[0,300][200,340]"/>
    </node>
  </node>
</hierarchy>"#;

    #[test]
    fn parse_hierarchy_assigns_preorder_refs() {
        let nodes = parse_hierarchy(HIERARCHY).expect("parse");
        assert_eq!(nodes.len(), 4);
        let ids: Vec<_> = nodes.iter().map(|n| n.ref_id.as_str()).collect();
        assert_eq!(ids, vec!["n-0", "n-1", "n-2", "n-3"]);

        assert_eq!(nodes[0].parent_ref_id, "");
        assert_eq!(nodes[0].class_name, "android.widget.FrameLayout");
        assert_eq!(nodes[1].parent_ref_id, "n-0");
        assert_eq!(nodes[1].index, 0);
        assert_eq!(nodes[1].text, "Login");
        assert_eq!(nodes[1].content_desc, "Login button");
        assert!(nodes[1].clickable);
        assert_eq!(nodes[2].index, 1);
        assert_eq!(nodes[3].parent_ref_id, "n-2");
        assert!(nodes[3].checked);
        assert_eq!(nodes[3].package_name, "com.example.app");
    }

    #[test]
    fn parse_bounds_formats() {
        assert_eq!(
            parse_bounds("[100,200][300,260]"),
            Bounds {
                left: 100,
                top: 200,
                right: 300,
                bottom: 260
            }
        );
        assert_eq!(parse_bounds("garbage"), Bounds::default());
        assert_eq!(parse_bounds(""), Bounds::default());
    }

    #[test]
    fn bounds_center_truncates() {
        let b = Bounds {
            left: 100,
            top: 200,
            right: 301,
            bottom: 261,
        };
        assert_eq!(b.center(), (200, 230));
    }

    #[test]
    fn parse_hierarchy_rejects_invalid_xml() {
        assert!(parse_hierarchy("<hierarchy><node></hierarchy>").is_err());
    }
}
