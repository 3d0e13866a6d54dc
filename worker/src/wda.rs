use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use mobile_core::context::ActionContext;
use mobile_core::snapshot::{Bounds, Node};
use mobile_core::Error;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use crate::bridge::{transport, ActiveApp, Bridge, Frame};

/// HTTP client for a WebDriverAgent instance, reachable directly on the
/// configured host.
pub struct WdaClient {
    base_url: String,
    http: reqwest::Client,
}

impl WdaClient {
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
impl Bridge for WdaClient {
    async fn ensure_session(&self, ctx: &ActionContext) -> Result<(), Error> {
        self.get(ctx, "/status").await.map(|_| ())
    }

    async fn active_app(&self, ctx: &ActionContext) -> Result<ActiveApp, Error> {
        #[derive(Default, Deserialize)]
        #[serde(default)]
        struct AppValue {
            #[serde(rename = "bundleId")]
            bundle_id: String,
            name: String,
        }
        #[derive(Deserialize)]
        struct Payload {
            #[serde(default)]
            value: AppValue,
        }
        let body = self.get(ctx, "/wda/activeAppInfo").await?;
        let payload: Payload = serde_json::from_slice(&body)
            .map_err(|err| Error::InvalidResponse(format!("active app: {err}")))?;
        Ok(ActiveApp {
            bundle_id: payload.value.bundle_id,
            app_name: payload.value.name,
        })
    }

    async fn dump_hierarchy(&self, ctx: &ActionContext) -> Result<Vec<Node>, Error> {
        let body = self.get(ctx, "/source").await?;
        let raw = String::from_utf8_lossy(&body);
        parse_source(&unwrap_source_payload(&raw)?)
    }

    async fn tap(&self, ctx: &ActionContext, x: i32, y: i32, tap_count: u32) -> Result<(), Error> {
        let mut body = json!({"x": x, "y": y});
        if tap_count > 1 {
            body["count"] = json!(tap_count);
        }
        self.post_json(ctx, "/wda/tap/0", body).await
    }

    async fn type_text(&self, ctx: &ActionContext, text: &str, _clear: bool) -> Result<(), Error> {
        let keys: Vec<String> = text.chars().map(String::from).collect();
        self.post_json(ctx, "/wda/keys", json!({"value": keys})).await
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
            "/wda/dragfromtoforduration",
            json!({
                "fromX": sx,
                "fromY": sy,
                "toX": ex,
                "toY": ey,
                "duration": f64::from(duration_ms) / 1000.0,
            }),
        )
        .await
    }

    async fn screenshot(&self, ctx: &ActionContext) -> Result<Frame, Error> {
        #[derive(Deserialize)]
        struct Payload {
            #[serde(default)]
            value: String,
        }
        let body = self.get(ctx, "/screenshot").await?;
        let payload: Payload = serde_json::from_slice(&body)
            .map_err(|err| Error::InvalidResponse(format!("screenshot: {err}")))?;
        let data = BASE64
            .decode(payload.value.as_bytes())
            .map_err(|err| Error::InvalidResponse(format!("screenshot base64: {err}")))?;
        // WDA reports no dimensions; decoding them is left to clients.
        Ok(Frame {
            data: Bytes::from(data),
            width: 0,
            height: 0,
        })
    }
}

/// `/source` answers either XML directly or a JSON `{value: "<xml>"}` wrapper.
pub(crate) fn unwrap_source_payload(raw: &str) -> Result<String, Error> {
    if raw.trim_start().starts_with('{') {
        #[derive(Deserialize)]
        struct Payload {
            #[serde(default)]
            value: String,
        }
        let payload: Payload = serde_json::from_str(raw)
            .map_err(|err| Error::InvalidResponse(format!("source wrapper: {err}")))?;
        return Ok(payload.value);
    }
    Ok(raw.to_string())
}

/// Flattens the WDA source tree into pre-order nodes. The document element is
/// not emitted; its element children become the roots, matching the wire
/// shape where the outer element is the application wrapper.
pub(crate) fn parse_source(xml: &str) -> Result<Vec<Node>, Error> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|err| Error::InvalidResponse(format!("source xml: {err}")))?;
    let mut nodes = Vec::with_capacity(256);
    let mut counter = 0usize;
    let roots = doc.root_element().children().filter(|child| child.is_element());
    for (i, child) in roots.enumerate() {
        walk_source(child, "", i as i32, &mut counter, &mut nodes);
    }
    Ok(nodes)
}

fn walk_source(
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
        text: attr(el, "label"),
        content_desc: attr(el, "name"),
        resource_id: attr(el, "identifier"),
        class_name: el.tag_name().name().to_string(),
        package_name: String::new(),
        bounds: parse_rect(&attr(el, "rect")),
        enabled: attr_bool(el, "enabled"),
        clickable: attr_bool(el, "hittable"),
        focusable: true,
        visible: attr_bool_default(el, "visible", true),
        selected: attr_bool(el, "selected"),
        checked: attr_bool(el, "value"),
    });

    let children = el.children().filter(|child| child.is_element());
    for (i, child) in children.enumerate() {
        walk_source(child, &ref_id, i as i32, counter, out);
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

fn attr_bool_default(el: roxmltree::Node<'_, '_>, key: &str, fallback: bool) -> bool {
    match el.attribute(key) {
        None | Some("") => fallback,
        Some(v) => v.eq_ignore_ascii_case("true"),
    }
}

static RECT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(-?\d+),(-?\d+)\},\{(\d+),(\d+)\}\}").expect("rect regex"));

/// Parses the `{{x,y},{w,h}}` attribute format into edge bounds; x/y may be
/// negative.
fn parse_rect(raw: &str) -> Bounds {
    let Some(caps) = RECT_PATTERN.captures(raw) else {
        return Bounds::default();
    };
    let field = |i: usize| caps[i].parse::<i32>().unwrap_or(0);
    let (x, y, w, h) = (field(1), field(2), field(3), field(4));
    Bounds {
        left: x,
        top: y,
        right: x + w,
        bottom: y + h,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"<XCUIElementTypeApplication name="Example" label="Example" enabled="true" visible="true" rect="{{0,0},{390,844}}">
  <XCUIElementTypeWindow enabled="true" visible="true" rect="{{0,0},{390,844}}">
    <XCUIElementTypeButton name="login" label="Login" identifier="login-button" enabled="true" hittable="true" rect="{{20,100},{120,44}}"/>
    <XCUIElementTypeSwitch name="remember" label="Remember" value="true" enabled="true" rect="{{-10,200},{60,30}}"/>
  </XCUIElementTypeWindow>
</XCUIElementTypeApplication>"#;

    #[test]
    fn parse_source_skips_document_element() {
        let nodes = parse_source(SOURCE).expect("parse");
        assert_eq!(nodes.len(), 3);

        assert_eq!(nodes[0].ref_id, "n-0");
        assert_eq!(nodes[0].class_name, "XCUIElementTypeWindow");
        assert_eq!(nodes[0].parent_ref_id, "");

        assert_eq!(nodes[1].class_name, "XCUIElementTypeButton");
        assert_eq!(nodes[1].parent_ref_id, "n-0");
        assert_eq!(nodes[1].text, "Login");
        assert_eq!(nodes[1].content_desc, "login");
        assert_eq!(nodes[1].resource_id, "login-button");
        assert!(nodes[1].clickable);
        assert!(nodes[1].focusable);

        // `visible` missing defaults to true; `value` maps to checked.
        assert!(nodes[2].visible);
        assert!(nodes[2].checked);
        assert!(!nodes[2].clickable);
    }

    #[test]
    fn parse_rect_handles_signed_origin() {
        let nodes = parse_source(SOURCE).expect("parse");
        assert_eq!(
            nodes[2].bounds,
            Bounds {
                left: -10,
                top: 200,
                right: 50,
                bottom: 230
            }
        );
        assert_eq!(parse_rect("bogus"), Bounds::default());
    }

    #[test]
    fn unwrap_source_payload_handles_both_shapes() {
        let wrapped = r#"{"value": "<a enabled=\"true\"/>"}"#;
        assert_eq!(
            unwrap_source_payload(wrapped).expect("unwrap"),
            "<a enabled=\"true\"/>"
        );
        assert_eq!(unwrap_source_payload("<a/>").expect("unwrap"), "<a/>");
        assert!(unwrap_source_payload("{not json").is_err());
    }
}
