//! High-level browser driver wrapping the CDP client.
//!
//! Provides the operations the auth flow needs: navigation, frame-aware DOM
//! queries, element interaction (click, type, Enter commit), attribute
//! reads, screenshots, cookie access, and a one-time request-body rewrite
//! rule for the sign-in call.
//!
//! Element and document references are plain CDP node ids and go stale
//! whenever the page re-renders; callers re-resolve them immediately before
//! acting instead of holding them across waits.

use std::collections::HashMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde_json::{json, Value};

use crate::cdp::CdpClient;
use crate::error::BrowserError;

/// Opaque handle to a DOM node, as returned by CDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub i64);

/// A cookie from the browser's jar.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
}

impl Cookie {
    /// Render as a `name=value` pair.
    pub fn to_pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// High-level browser automation driver for one page target.
pub struct BrowserDriver {
    client: CdpClient,
}

impl BrowserDriver {
    /// Connect to a Chrome DevTools page target and enable the Page, DOM,
    /// and Runtime domains. The Network domain stays disabled: its commands
    /// work without the event stream, which nobody here drains.
    pub async fn connect(ws_url: &str) -> Result<Self, BrowserError> {
        let client = CdpClient::connect(ws_url).await?;

        client.enable_domain("Page").await?;
        client.enable_domain("DOM").await?;
        client.enable_domain("Runtime").await?;

        Ok(Self { client })
    }

    // -----------------------------------------------------------------------
    // Navigation
    // -----------------------------------------------------------------------

    /// Navigate to a URL. Navigation-level errors (DNS failures etc.) are
    /// surfaced; the load itself is awaited separately.
    pub async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let result = self
            .client
            .send_command("Page.navigate", json!({ "url": url }))
            .await?;

        if let Some(error_text) = result.get("errorText").and_then(|v| v.as_str()) {
            return Err(BrowserError::NavigationFailed {
                reason: error_text.to_string(),
            });
        }

        Ok(())
    }

    /// Wait for the page's load event, up to `timeout`.
    pub async fn wait_until_loaded(&mut self, timeout: Duration) -> Result<(), BrowserError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(BrowserError::PageLoadTimeout { duration: timeout });
            }

            match tokio::time::timeout(remaining, self.client.recv_event()).await {
                Ok(Some(event)) => {
                    if event.method == "Page.loadEventFired" {
                        return Ok(());
                    }
                }
                Ok(None) => {
                    return Err(BrowserError::Protocol {
                        detail: "WebSocket closed while waiting for page load".to_string(),
                    });
                }
                Err(_) => {
                    return Err(BrowserError::PageLoadTimeout { duration: timeout });
                }
            }
        }
    }

    /// Override the user agent for subsequent requests from this page.
    pub async fn set_user_agent(&self, user_agent: &str) -> Result<(), BrowserError> {
        self.client
            .send_command(
                "Network.setUserAgentOverride",
                json!({ "userAgent": user_agent }),
            )
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Documents and frames
    // -----------------------------------------------------------------------

    /// The top-level document node.
    pub async fn document_root(&self) -> Result<NodeId, BrowserError> {
        let result = self
            .client
            .send_command("DOM.getDocument", json!({ "depth": 0 }))
            .await?;

        result
            .get("root")
            .and_then(|r| r.get("nodeId"))
            .and_then(|n| n.as_i64())
            .map(NodeId)
            .ok_or_else(|| BrowserError::Protocol {
                detail: "DOM.getDocument did not return a root nodeId".to_string(),
            })
    }

    /// Find the document (top-level or embedded) whose URL contains one of
    /// `fragments`, by walking the pierced DOM tree. Returns `None` when no
    /// sub-document matches; the caller decides whether the top-level
    /// document is an acceptable fallback.
    pub async fn find_frame_document(
        &self,
        fragments: &[&str],
    ) -> Result<Option<NodeId>, BrowserError> {
        let result = self
            .client
            .send_command("DOM.getDocument", json!({ "depth": -1, "pierce": true }))
            .await?;

        let root = result.get("root").ok_or_else(|| BrowserError::Protocol {
            detail: "DOM.getDocument did not return a root".to_string(),
        })?;

        Ok(find_document_node(root, fragments).map(NodeId))
    }

    // -----------------------------------------------------------------------
    // DOM queries
    // -----------------------------------------------------------------------

    /// Find a single element under the top-level document.
    pub async fn query_selector(&self, selector: &str) -> Result<Option<NodeId>, BrowserError> {
        let root = self.document_root().await?;
        self.query_selector_within(root, selector).await
    }

    /// Find a single element under an arbitrary search root (typically an
    /// embedded document). Returns `Ok(None)` if nothing matches.
    pub async fn query_selector_within(
        &self,
        root: NodeId,
        selector: &str,
    ) -> Result<Option<NodeId>, BrowserError> {
        let result = self
            .client
            .send_command(
                "DOM.querySelector",
                json!({ "nodeId": root.0, "selector": selector }),
            )
            .await?;

        let node_id = result.get("nodeId").and_then(|n| n.as_i64()).unwrap_or(0);

        // CDP reports "no match" as nodeId 0.
        Ok((node_id != 0).then_some(NodeId(node_id)))
    }

    /// The element's attributes as a name -> value map.
    pub async fn attributes(&self, node: NodeId) -> Result<HashMap<String, String>, BrowserError> {
        let result = self
            .client
            .send_command("DOM.getAttributes", json!({ "nodeId": node.0 }))
            .await?;

        let pairs = result
            .get("attributes")
            .and_then(|a| a.as_array())
            .ok_or_else(|| BrowserError::Protocol {
                detail: "DOM.getAttributes did not return an attribute list".to_string(),
            })?;

        Ok(parse_attribute_pairs(pairs))
    }

    // -----------------------------------------------------------------------
    // Element interaction
    // -----------------------------------------------------------------------

    /// Click an element at the center of its box model.
    pub async fn click_node(&self, node: NodeId) -> Result<(), BrowserError> {
        let result = self
            .client
            .send_command("DOM.getBoxModel", json!({ "nodeId": node.0 }))
            .await?;

        let quad: Vec<f64> = result
            .get("model")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_f64()).collect())
            .ok_or_else(|| BrowserError::Protocol {
                detail: "DOM.getBoxModel did not return a content quad".to_string(),
            })?;

        let (cx, cy) = center_of_quad(&quad).ok_or_else(|| BrowserError::ElementNotInteractable {
            reason: "element has no usable content quad".to_string(),
        })?;

        for event_type in ["mousePressed", "mouseReleased"] {
            self.client
                .send_command(
                    "Input.dispatchMouseEvent",
                    json!({
                        "type": event_type,
                        "x": cx,
                        "y": cy,
                        "button": "left",
                        "clickCount": 1,
                    }),
                )
                .await?;
        }

        Ok(())
    }

    /// Focus an element and type text into it, one key event pair per
    /// character, spaced by `key_delay` to look like operator input.
    pub async fn type_into_node(
        &self,
        node: NodeId,
        text: &str,
        key_delay: Duration,
    ) -> Result<(), BrowserError> {
        self.client
            .send_command("DOM.focus", json!({ "nodeId": node.0 }))
            .await?;

        for ch in text.chars() {
            let ch = ch.to_string();
            for event_type in ["keyDown", "keyUp"] {
                self.client
                    .send_command(
                        "Input.dispatchKeyEvent",
                        json!({
                            "type": event_type,
                            "text": ch,
                            "unmodifiedText": ch,
                            "key": ch,
                        }),
                    )
                    .await?;
            }
            tokio::time::sleep(key_delay).await;
        }

        Ok(())
    }

    /// Send an Enter keypress to the focused element. The sign-in UI binds
    /// submission to this commit action rather than to a button.
    pub async fn press_enter(&self) -> Result<(), BrowserError> {
        let down = json!({
            "type": "rawKeyDown",
            "key": "Enter",
            "code": "Enter",
            "windowsVirtualKeyCode": 13,
            "nativeVirtualKeyCode": 13,
        });
        let chr = json!({ "type": "char", "key": "Enter", "text": "\r", "unmodifiedText": "\r" });
        let up = json!({
            "type": "keyUp",
            "key": "Enter",
            "code": "Enter",
            "windowsVirtualKeyCode": 13,
            "nativeVirtualKeyCode": 13,
        });

        for params in [down, chr, up] {
            self.client
                .send_command("Input.dispatchKeyEvent", params)
                .await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // JavaScript evaluation
    // -----------------------------------------------------------------------

    /// Evaluate a JavaScript expression in the page context and return its
    /// value. Exceptions are surfaced as [`BrowserError::JsException`].
    pub async fn evaluate(&self, expression: &str) -> Result<Value, BrowserError> {
        let result = self
            .client
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(exception) = result.get("exceptionDetails") {
            let message = exception
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(|d| d.as_str())
                .or_else(|| exception.get("text").and_then(|t| t.as_str()))
                .unwrap_or("unknown exception")
                .to_string();
            return Err(BrowserError::JsException { message });
        }

        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    // -----------------------------------------------------------------------
    // Screenshots and cookies
    // -----------------------------------------------------------------------

    /// Capture the current page as PNG bytes.
    pub async fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
        let result = self
            .client
            .send_command("Page.captureScreenshot", json!({ "format": "png" }))
            .await?;

        let data = result
            .get("data")
            .and_then(|d| d.as_str())
            .ok_or_else(|| BrowserError::Protocol {
                detail: "Page.captureScreenshot did not return 'data'".to_string(),
            })?;

        B64.decode(data).map_err(|e| BrowserError::Protocol {
            detail: format!("failed to decode screenshot base64: {e}"),
        })
    }

    /// Cookies visible to the given URLs.
    pub async fn cookies(&self, urls: &[&str]) -> Result<Vec<Cookie>, BrowserError> {
        let result = self
            .client
            .send_command("Network.getCookies", json!({ "urls": urls }))
            .await?;

        let cookies = result.get("cookies").cloned().unwrap_or(Value::Null);
        serde_json::from_value(cookies).map_err(|e| BrowserError::Protocol {
            detail: format!("failed to parse Network.getCookies response: {e}"),
        })
    }

    // -----------------------------------------------------------------------
    // Request interception
    // -----------------------------------------------------------------------

    /// Install a one-time request rewrite rule: JSON POST bodies of requests
    /// whose URL contains `url_fragment` get the keys of `patch` merged in
    /// before the request leaves the browser. Every other request continues
    /// unmodified.
    ///
    /// The rule runs on a background task for the life of the connection and
    /// can only be installed once per session.
    pub async fn rewrite_request_body(
        &mut self,
        url_fragment: &str,
        patch: Value,
    ) -> Result<(), BrowserError> {
        let Some(mut paused_rx) = self.client.take_paused_requests() else {
            return Err(BrowserError::Protocol {
                detail: "request rewrite rule already installed".to_string(),
            });
        };

        self.client
            .send_command(
                "Fetch.enable",
                json!({ "patterns": [{ "urlPattern": "*", "requestStage": "Request" }] }),
            )
            .await?;

        let handle = self.client.handle();
        let fragment = url_fragment.to_string();

        tokio::spawn(async move {
            while let Some(event) = paused_rx.recv().await {
                let Some(request_id) = event.params.get("requestId").and_then(|v| v.as_str())
                else {
                    continue;
                };

                let url = event
                    .params
                    .pointer("/request/url")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");

                let mut params = json!({ "requestId": request_id });
                if url.contains(&fragment) {
                    let body = event
                        .params
                        .pointer("/request/postData")
                        .and_then(|v| v.as_str())
                        .and_then(|raw| merge_request_body(raw, &patch));
                    if let Some(body) = body {
                        tracing::debug!(url, "rewriting sign-in request body");
                        params["postData"] = Value::String(B64.encode(body));
                    }
                }

                if let Err(e) = handle.send_command("Fetch.continueRequest", params).await {
                    tracing::warn!(error = %e, "failed to continue intercepted request");
                    break;
                }
            }
        });

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

/// Compute the center point of a content quad (8-element coordinate array).
pub fn center_of_quad(quad: &[f64]) -> Option<(f64, f64)> {
    if quad.len() < 8 {
        return None;
    }
    let xs: Vec<f64> = quad.iter().step_by(2).copied().collect();
    let ys: Vec<f64> = quad.iter().skip(1).step_by(2).copied().collect();

    let min_x = xs.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_x = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min_y = ys.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_y = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    if max_x <= min_x || max_y <= min_y {
        return None;
    }
    Some(((min_x + max_x) / 2.0, (min_y + max_y) / 2.0))
}

/// Fold CDP's flat `[name, value, name, value, ...]` attribute array into a
/// map.
pub fn parse_attribute_pairs(pairs: &[Value]) -> HashMap<String, String> {
    pairs
        .chunks_exact(2)
        .filter_map(|chunk| {
            let name = chunk[0].as_str()?;
            let value = chunk[1].as_str()?;
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// Walk a pierced DOM tree for a document node whose URL contains one of
/// `fragments`. Descends through child nodes and iframe content documents.
pub fn find_document_node(node: &Value, fragments: &[&str]) -> Option<i64> {
    let is_document = node.get("nodeType").and_then(|t| t.as_i64()) == Some(9);
    if is_document {
        if let Some(url) = node.get("documentURL").and_then(|u| u.as_str()) {
            if fragments.iter().any(|fragment| url.contains(fragment)) {
                return node.get("nodeId").and_then(|n| n.as_i64());
            }
        }
    }

    if let Some(content) = node.get("contentDocument") {
        if let Some(found) = find_document_node(content, fragments) {
            return Some(found);
        }
    }

    if let Some(children) = node.get("children").and_then(|c| c.as_array()) {
        for child in children {
            if let Some(found) = find_document_node(child, fragments) {
                return Some(found);
            }
        }
    }

    None
}

/// Merge the keys of `patch` into a JSON object body. Returns `None` when
/// the body is not a JSON object (such requests pass through untouched).
pub fn merge_request_body(raw_body: &str, patch: &Value) -> Option<String> {
    let mut body: Value = serde_json::from_str(raw_body).ok()?;
    let object = body.as_object_mut()?;
    let patch_object = patch.as_object()?;

    for (key, value) in patch_object {
        object.insert(key.clone(), value.clone());
    }

    serde_json::to_string(&body).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- center_of_quad ------------------------------------------------------

    #[test]
    fn center_of_axis_aligned_quad() {
        let quad = [0.0, 0.0, 100.0, 0.0, 100.0, 100.0, 0.0, 100.0];
        let (cx, cy) = center_of_quad(&quad).unwrap();
        assert!((cx - 50.0).abs() < 0.001);
        assert!((cy - 50.0).abs() < 0.001);
    }

    #[test]
    fn center_of_offset_quad() {
        let quad = [50.0, 75.0, 250.0, 75.0, 250.0, 175.0, 50.0, 175.0];
        let (cx, cy) = center_of_quad(&quad).unwrap();
        assert!((cx - 150.0).abs() < 0.001);
        assert!((cy - 125.0).abs() < 0.001);
    }

    #[test]
    fn degenerate_quads_are_rejected() {
        assert!(center_of_quad(&[0.0, 0.0, 1.0, 1.0]).is_none());
        let zero_size = [10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0];
        assert!(center_of_quad(&zero_size).is_none());
    }

    // -- parse_attribute_pairs ----------------------------------------------

    #[test]
    fn attribute_pairs_fold_into_a_map() {
        let pairs = vec![
            Value::String("id".into()),
            Value::String("password_text_field".into()),
            Value::String("tabindex".into()),
            Value::String("-1".into()),
        ];
        let attrs = parse_attribute_pairs(&pairs);
        assert_eq!(attrs.get("id").map(String::as_str), Some("password_text_field"));
        assert_eq!(attrs.get("tabindex").map(String::as_str), Some("-1"));
    }

    #[test]
    fn odd_length_attribute_array_drops_the_tail() {
        let pairs = vec![Value::String("a".into()), Value::String("1".into()), Value::String("b".into())];
        let attrs = parse_attribute_pairs(&pairs);
        assert_eq!(attrs.len(), 1);
    }

    // -- find_document_node --------------------------------------------------

    fn auth_page_tree() -> Value {
        serde_json::json!({
            "nodeId": 1,
            "nodeType": 9,
            "nodeName": "#document",
            "documentURL": "https://www.icloud.com/",
            "children": [{
                "nodeId": 2,
                "nodeType": 1,
                "nodeName": "HTML",
                "children": [{
                    "nodeId": 5,
                    "nodeType": 1,
                    "nodeName": "IFRAME",
                    "contentDocument": {
                        "nodeId": 10,
                        "nodeType": 9,
                        "nodeName": "#document",
                        "documentURL": "https://idmsa.apple.com/appleauth/auth/signin",
                        "children": []
                    }
                }]
            }]
        })
    }

    #[test]
    fn finds_embedded_auth_document() {
        let found = find_document_node(&auth_page_tree(), &["idmsa.apple.com", "appleid"]);
        assert_eq!(found, Some(10));
    }

    #[test]
    fn returns_none_when_no_fragment_matches() {
        let found = find_document_node(&auth_page_tree(), &["example.org"]);
        assert_eq!(found, None);
    }

    #[test]
    fn matches_top_level_document_when_it_hosts_the_auth_ui() {
        let tree = serde_json::json!({
            "nodeId": 1,
            "nodeType": 9,
            "documentURL": "https://appleid.apple.com/sign-in",
            "children": []
        });
        assert_eq!(find_document_node(&tree, &["appleid"]), Some(1));
    }

    #[test]
    fn element_nodes_are_not_mistaken_for_documents() {
        let tree = serde_json::json!({
            "nodeId": 3,
            "nodeType": 1,
            "documentURL": "https://idmsa.apple.com/",
        });
        assert_eq!(find_document_node(&tree, &["idmsa.apple.com"]), None);
    }

    // -- merge_request_body --------------------------------------------------

    #[test]
    fn merges_extended_login_into_json_body() {
        let merged = merge_request_body(
            r#"{"accountName":"user@example.com","rememberMe":false}"#,
            &serde_json::json!({ "extended_login": true }),
        )
        .unwrap();
        let parsed: Value = serde_json::from_str(&merged).unwrap();
        assert_eq!(parsed["accountName"], "user@example.com");
        assert_eq!(parsed["extended_login"], true);
    }

    #[test]
    fn merge_overwrites_an_existing_key() {
        let merged = merge_request_body(
            r#"{"extended_login":false}"#,
            &serde_json::json!({ "extended_login": true }),
        )
        .unwrap();
        let parsed: Value = serde_json::from_str(&merged).unwrap();
        assert_eq!(parsed["extended_login"], true);
    }

    #[test]
    fn merge_is_idempotent() {
        let patch = serde_json::json!({ "extended_login": true });
        let once = merge_request_body(r#"{"a":1}"#, &patch).unwrap();
        let twice = merge_request_body(&once, &patch).unwrap();
        let (a, b): (Value, Value) = (
            serde_json::from_str(&once).unwrap(),
            serde_json::from_str(&twice).unwrap(),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn non_json_bodies_pass_through_unmerged() {
        let patch = serde_json::json!({ "extended_login": true });
        assert_eq!(merge_request_body("a=1&b=2", &patch), None);
        assert_eq!(merge_request_body("[1,2,3]", &patch), None);
    }

    // -- cookies -------------------------------------------------------------

    #[test]
    fn cookie_deserializes_from_cdp_shape() {
        let json = serde_json::json!([{
            "name": "X-APPLE-WEBAUTH-HSA-TRUST",
            "value": "tok123",
            "domain": ".icloud.com",
            "path": "/",
            "expires": 1893456000.0,
            "httpOnly": true,
            "secure": true,
        }]);
        let cookies: Vec<Cookie> = serde_json::from_value(json).unwrap();
        assert_eq!(cookies[0].to_pair(), "X-APPLE-WEBAUTH-HSA-TRUST=tok123");
        assert_eq!(cookies[0].domain, ".icloud.com");
    }
}
