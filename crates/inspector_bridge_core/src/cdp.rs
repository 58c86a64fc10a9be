use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::{BridgeError, Result};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;
type SubscriberMap = Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Value>>>>>;

/// A JSON-RPC 2.0 peer over a single CDP WebSocket.
///
/// Commands carry monotonic ids and resolve the matching reply waiter;
/// frames without an id are events, fanned out to the subscribers
/// registered for their dotted method name.
pub struct CdpClient {
    sink: Arc<Mutex<WsSink>>,
    pending: PendingMap,
    subscribers: SubscriberMap,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    command_timeout: Duration,
    reader_task: JoinHandle<()>,
}

impl CdpClient {
    pub async fn connect(endpoint: &str, command_timeout: Duration) -> Result<Self> {
        let (ws, _response) = connect_async(endpoint).await?;
        let (sink, stream) = ws.split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let subscribers: SubscriberMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader_task = tokio::spawn(reader_loop(
            stream,
            pending.clone(),
            subscribers.clone(),
            closed.clone(),
        ));

        debug!(%endpoint, "CDP client connected");

        Ok(Self {
            sink: Arc::new(Mutex::new(sink)),
            pending,
            subscribers,
            next_id: AtomicU64::new(1),
            closed,
            command_timeout,
            reader_task,
        })
    }

    /// Register a subscriber for an event method (e.g. `Debugger.paused`).
    /// Events arrive in the order the target emitted them; subscribers for
    /// the same method are served in registration order.
    pub async fn subscribe(&self, method: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .await
            .entry(method.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Send one command and wait for its reply. A target-side error reply
    /// becomes `TargetCommandFailed`; a socket loss while waiting becomes
    /// `TransportClosed`.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::TransportClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = json!({"id": id, "method": method, "params": params});
        debug!(%method, id, "sending CDP command");

        {
            let mut sink = self.sink.lock().await;
            if let Err(e) = sink.send(Message::Text(frame.to_string())).await {
                self.pending.lock().await.remove(&id);
                warn!(%method, "CDP send failed: {e}");
                return Err(BridgeError::TransportClosed);
            }
        }

        let reply = match timeout(self.command_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(BridgeError::TransportClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(BridgeError::target_command_failed(
                    method,
                    format!("no reply within {:?}", self.command_timeout),
                ));
            }
        };

        if let Some(error) = reply.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown inspector error")
                .to_string();
            return Err(BridgeError::TargetCommandFailed {
                method: method.to_string(),
                message,
            });
        }

        Ok(reply.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Close the socket and fail every outstanding waiter.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);

        {
            let mut sink = self.sink.lock().await;
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }

        self.pending.lock().await.clear();
        self.subscribers.lock().await.clear();
        self.reader_task.abort();
        debug!("CDP client closed");
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn reader_loop(
    mut stream: WsStream,
    pending: PendingMap,
    subscribers: SubscriberMap,
    closed: Arc<AtomicBool>,
) {
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => {
                    warn!("discarding non-UTF-8 CDP frame: {e}");
                    continue;
                }
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("CDP socket read failed: {e}");
                break;
            }
        };

        let message: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                warn!("discarding malformed CDP frame: {e}");
                continue;
            }
        };

        if let Some(id) = message.get("id").and_then(Value::as_u64) {
            let waiter = pending.lock().await.remove(&id);
            if let Some(tx) = waiter {
                let _ = tx.send(message);
            } else {
                debug!(id, "reply with no waiter (likely timed out)");
            }
        } else if let Some(method) = message.get("method").and_then(Value::as_str) {
            let params = message.get("params").cloned().unwrap_or(Value::Null);
            let mut subs = subscribers.lock().await;
            if let Some(list) = subs.get_mut(method) {
                // Prune subscribers whose receiving side is gone.
                list.retain(|tx| tx.send(params.clone()).is_ok());
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    // Dropping the senders wakes every waiter with a transport-closed error.
    pending.lock().await.clear();
    subscribers.lock().await.clear();
    debug!("CDP reader loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn bind_fake_target() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let endpoint = format!("ws://{}", listener.local_addr().expect("addr"));
        (listener, endpoint)
    }

    #[tokio::test]
    async fn test_send_resolves_reply_and_fans_out_events() {
        let (listener, endpoint) = bind_fake_target().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("handshake");
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    let request: Value = serde_json::from_str(&text).expect("request json");
                    let id = request["id"].as_u64().expect("request id");
                    // Event first, then the reply: both must be routed.
                    ws.send(Message::Text(
                        json!({
                            "method": "Debugger.scriptParsed",
                            "params": {"scriptId": "7", "url": "file:///tmp/a.js"}
                        })
                        .to_string(),
                    ))
                    .await
                    .expect("send event");
                    ws.send(Message::Text(
                        json!({"id": id, "result": {"debuggerId": "uid-1"}}).to_string(),
                    ))
                    .await
                    .expect("send reply");
                }
            }
        });

        let client = CdpClient::connect(&endpoint, Duration::from_secs(5))
            .await
            .expect("connect");
        let mut events = client.subscribe("Debugger.scriptParsed").await;

        let result = client.send("Debugger.enable", json!({})).await.expect("reply");
        assert_eq!(result["debuggerId"], "uid-1");

        let event = events.recv().await.expect("event");
        assert_eq!(event["scriptId"], "7");
        assert_eq!(event["url"], "file:///tmp/a.js");

        client.close().await;
        server.abort();
    }

    #[tokio::test]
    async fn test_error_reply_surfaces_as_target_command_failed() {
        let (listener, endpoint) = bind_fake_target().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("handshake");
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let request: Value = serde_json::from_str(&text).expect("request json");
                let id = request["id"].as_u64().expect("request id");
                ws.send(Message::Text(
                    json!({
                        "id": id,
                        "error": {"code": -32000, "message": "Not paused"}
                    })
                    .to_string(),
                ))
                .await
                .expect("send error");
            }
        });

        let client = CdpClient::connect(&endpoint, Duration::from_secs(5))
            .await
            .expect("connect");

        let err = client
            .send("Debugger.resume", json!({}))
            .await
            .expect_err("error reply must fail the command");
        match err {
            BridgeError::TargetCommandFailed { method, message } => {
                assert_eq!(method, "Debugger.resume");
                assert_eq!(message, "Not paused");
            }
            other => panic!("unexpected error: {other}"),
        }

        client.close().await;
        server.abort();
    }

    #[tokio::test]
    async fn test_socket_close_fails_pending_waiter_with_transport_closed() {
        let (listener, endpoint) = bind_fake_target().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("handshake");
            // Read the command, never answer, close instead.
            let _ = ws.next().await;
            let _ = ws.close(None).await;
        });

        let client = CdpClient::connect(&endpoint, Duration::from_secs(5))
            .await
            .expect("connect");

        let err = client
            .send("Runtime.enable", json!({}))
            .await
            .expect_err("closed socket must fail the waiter");
        assert!(matches!(err, BridgeError::TransportClosed), "got {err}");

        server.abort();
    }

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let (listener, endpoint) = bind_fake_target().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("handshake");
            let mut seen = Vec::new();
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let request: Value = serde_json::from_str(&text).expect("request json");
                let id = request["id"].as_u64().expect("request id");
                seen.push(id);
                ws.send(Message::Text(json!({"id": id, "result": {}}).to_string()))
                    .await
                    .expect("send reply");
                if seen.len() == 3 {
                    assert_eq!(seen, vec![1, 2, 3]);
                    break;
                }
            }
        });

        let client = CdpClient::connect(&endpoint, Duration::from_secs(5))
            .await
            .expect("connect");
        for _ in 0..3 {
            client.send("Runtime.enable", json!({})).await.expect("reply");
        }

        client.close().await;
        server.await.expect("server assertions");
    }
}
