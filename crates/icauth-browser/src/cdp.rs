//! Low-level CDP (Chrome DevTools Protocol) WebSocket client.
//!
//! Connects to a Chrome page target via its DevTools WebSocket endpoint and
//! provides JSON-RPC command/response correlation plus event delivery.
//!
//! Two consumers read from one connection: the flow driver waits on page
//! events (load, navigation) while the request-interception task services
//! `Fetch.requestPaused`. The background reader therefore routes paused
//! requests to their own channel, and commands are issued through a
//! cloneable [`CommandHandle`] so the interception task can respond to
//! paused requests without holding up the driver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::BrowserError;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<CdpResponse>>>>;

/// Default per-command response timeout.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Event method routed to the interception channel instead of the general
/// event channel.
const REQUEST_PAUSED_METHOD: &str = "Fetch.requestPaused";

/// A CDP event received from the browser.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    /// The event method name (e.g. "Page.loadEventFired").
    pub method: String,
    /// The event parameters.
    pub params: Value,
}

#[derive(Debug, Clone, serde::Serialize)]
struct CdpCommand {
    id: u64,
    method: String,
    params: Value,
}

/// A CDP response correlated back to its command.
#[derive(Debug, Clone)]
pub struct CdpResponse {
    pub id: u64,
    pub result: Option<Value>,
    pub error: Option<CdpResponseError>,
}

/// Error object in a CDP response.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CdpResponseError {
    pub code: i64,
    pub message: String,
    pub data: Option<String>,
}

// ---------------------------------------------------------------------------
// CommandHandle
// ---------------------------------------------------------------------------

/// Cloneable command sender for an open CDP connection.
///
/// Each clone shares the id counter, the pending-response map, and the
/// WebSocket write half, so any task holding a handle can issue commands
/// concurrently with the others.
#[derive(Clone)]
pub struct CommandHandle {
    next_id: Arc<AtomicU64>,
    pending: PendingMap,
    writer: Arc<Mutex<WsSink>>,
}

impl CommandHandle {
    /// Send a CDP command and wait for its response with the default timeout.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, BrowserError> {
        self.send_command_with_timeout(method, params, COMMAND_TIMEOUT)
            .await
    }

    /// Send a CDP command with a custom response timeout.
    pub async fn send_command_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, BrowserError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let command = CdpCommand {
            id,
            method: method.to_string(),
            params,
        };

        let json = serde_json::to_string(&command).map_err(|e| BrowserError::Protocol {
            detail: format!("failed to serialize command: {e}"),
        })?;

        tracing::trace!(id, method, "sending CDP command");

        // Register before sending so the response cannot race the insert.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        {
            let mut writer = self.writer.lock().await;
            writer
                .send(Message::Text(json.into()))
                .await
                .map_err(|e| BrowserError::Protocol {
                    detail: format!("failed to send WebSocket message: {e}"),
                })?;
        }

        let response = tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| BrowserError::Timeout {
                method: method.to_string(),
                duration: timeout,
            })?
            .map_err(|_| BrowserError::Protocol {
                detail: "response channel closed unexpectedly".to_string(),
            })?;

        if let Some(err) = response.error {
            return Err(BrowserError::CdpError {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Enable a CDP domain (e.g. "Page", "DOM", "Network").
    pub async fn enable_domain(&self, domain: &str) -> Result<(), BrowserError> {
        self.send_command(&format!("{domain}.enable"), serde_json::json!({}))
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CdpClient
// ---------------------------------------------------------------------------

/// An open CDP connection to one page target.
pub struct CdpClient {
    handle: CommandHandle,
    event_rx: mpsc::UnboundedReceiver<CdpEvent>,
    paused_rx: Option<mpsc::UnboundedReceiver<CdpEvent>>,
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a Chrome DevTools page WebSocket endpoint of the form
    /// `ws://127.0.0.1:{port}/devtools/page/{target_id}`.
    pub async fn connect(ws_url: &str) -> Result<Self, BrowserError> {
        tracing::debug!(url = ws_url, "connecting to Chrome DevTools WebSocket");

        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| BrowserError::ConnectionFailed {
                url: ws_url.to_string(),
                reason: e.to_string(),
            })?;

        let (writer, reader) = ws_stream.split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (paused_tx, paused_rx) = mpsc::unbounded_channel();

        let reader_handle = tokio::spawn(read_loop(reader, Arc::clone(&pending), event_tx, paused_tx));

        tracing::debug!(url = ws_url, "CDP WebSocket connection established");

        Ok(Self {
            handle: CommandHandle {
                next_id: Arc::new(AtomicU64::new(1)),
                pending,
                writer: Arc::new(Mutex::new(writer)),
            },
            event_rx,
            paused_rx: Some(paused_rx),
            _reader_handle: reader_handle,
        })
    }

    /// A cloneable command sender sharing this connection.
    pub fn handle(&self) -> CommandHandle {
        self.handle.clone()
    }

    /// Send a CDP command and wait for its response.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, BrowserError> {
        self.handle.send_command(method, params).await
    }

    /// Enable a CDP domain.
    pub async fn enable_domain(&self, domain: &str) -> Result<(), BrowserError> {
        self.handle.enable_domain(domain).await
    }

    /// Receive the next page-level CDP event. `Fetch.requestPaused` events
    /// never appear here. Returns `None` once the connection has closed.
    pub async fn recv_event(&mut self) -> Option<CdpEvent> {
        self.event_rx.recv().await
    }

    /// Take the paused-request channel for the interception task. Yields
    /// `None` on a second call.
    pub fn take_paused_requests(&mut self) -> Option<mpsc::UnboundedReceiver<CdpEvent>> {
        self.paused_rx.take()
    }
}

/// Background task: read WebSocket messages, resolve pending commands,
/// route events.
async fn read_loop(
    mut reader: WsSource,
    pending: PendingMap,
    event_tx: mpsc::UnboundedSender<CdpEvent>,
    paused_tx: mpsc::UnboundedSender<CdpEvent>,
) {
    while let Some(message) = reader.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket read error, stopping reader");
                break;
            }
        };

        let text = match message {
            Message::Text(t) => t.to_string(),
            Message::Binary(b) => match String::from_utf8(b.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Message::Close(_) => {
                tracing::debug!("WebSocket closed by remote");
                break;
            }
            _ => continue,
        };

        let json: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse CDP message as JSON");
                continue;
            }
        };

        if let Some(response) = parse_cdp_response(&json) {
            let mut pending_guard = pending.lock().await;
            if let Some(tx) = pending_guard.remove(&response.id) {
                let _ = tx.send(response);
            } else {
                tracing::trace!(id = response.id, "response for unknown command id");
            }
        } else if let Some(event) = parse_cdp_event(&json) {
            // Dropped sends are fine: nobody listening means nobody cares.
            if event.method == REQUEST_PAUSED_METHOD {
                let _ = paused_tx.send(event);
            } else {
                let _ = event_tx.send(event);
            }
        }
    }

    // Connection gone: fail every command still waiting for a response.
    let mut pending_guard = pending.lock().await;
    for (id, tx) in pending_guard.drain() {
        let _ = tx.send(CdpResponse {
            id,
            result: None,
            error: Some(CdpResponseError {
                code: -1,
                message: "WebSocket connection closed".to_string(),
                data: None,
            }),
        });
    }
}

// ---------------------------------------------------------------------------
// Protocol parsing helpers
// ---------------------------------------------------------------------------

/// Parse a CDP message as a command response (a message with an `id`).
pub fn parse_cdp_response(json: &Value) -> Option<CdpResponse> {
    let id = json.get("id")?.as_u64()?;
    Some(CdpResponse {
        id,
        result: json.get("result").cloned(),
        error: json
            .get("error")
            .and_then(|e| serde_json::from_value(e.clone()).ok()),
    })
}

/// Parse a CDP message as an event (a message with a `method` and no `id`).
pub fn parse_cdp_event(json: &Value) -> Option<CdpEvent> {
    if json.get("id").is_some() {
        return None;
    }
    let method = json.get("method")?.as_str()?.to_string();
    let params = json.get("params").cloned().unwrap_or(Value::Null);
    Some(CdpEvent { method, params })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_with_result_parses() {
        let json = serde_json::json!({
            "id": 3,
            "result": { "frameId": "F1" }
        });
        let response = parse_cdp_response(&json).unwrap();
        assert_eq!(response.id, 3);
        assert_eq!(response.result.unwrap()["frameId"], "F1");
        assert!(response.error.is_none());
    }

    #[test]
    fn response_with_error_parses() {
        let json = serde_json::json!({
            "id": 9,
            "error": { "code": -32000, "message": "Target closed", "data": "gone" }
        });
        let response = parse_cdp_response(&json).unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, -32000);
        assert_eq!(error.message, "Target closed");
        assert_eq!(error.data.as_deref(), Some("gone"));
    }

    #[test]
    fn event_is_not_a_response() {
        let json = serde_json::json!({ "method": "Page.loadEventFired", "params": {} });
        assert!(parse_cdp_response(&json).is_none());
        let event = parse_cdp_event(&json).unwrap();
        assert_eq!(event.method, "Page.loadEventFired");
    }

    #[test]
    fn response_is_not_an_event() {
        let json = serde_json::json!({ "id": 1, "result": {} });
        assert!(parse_cdp_event(&json).is_none());
    }

    #[test]
    fn event_without_params_defaults_to_null() {
        let json = serde_json::json!({ "method": "Page.domContentEventFired" });
        let event = parse_cdp_event(&json).unwrap();
        assert_eq!(event.params, Value::Null);
    }

    #[test]
    fn malformed_messages_parse_as_neither() {
        let json = serde_json::json!({ "params": { "x": 1 } });
        assert!(parse_cdp_response(&json).is_none());
        assert!(parse_cdp_event(&json).is_none());
    }

    #[test]
    fn command_serializes_with_id_method_params() {
        let command = CdpCommand {
            id: 7,
            method: "Runtime.evaluate".to_string(),
            params: serde_json::json!({ "expression": "1 + 1" }),
        };
        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["method"], "Runtime.evaluate");
        assert_eq!(json["params"]["expression"], "1 + 1");
    }
}
