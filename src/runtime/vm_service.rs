//! WebSocket JSON-RPC client for the runtime introspection service.
//!
//! Requests are correlated by string ids through a pending map of oneshot
//! senders; `streamNotify` frames are translated into [`RuntimeEvent`]s.
//! The client subscribes to the `Isolate`, `Debug` and `Extension` streams
//! on connect and tracks the main isolate, which is the default target for
//! extension calls and memory queries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::runtime::endpoint::to_websocket_uri;
use crate::runtime::{BoxFuture, IsolateInfo, RuntimeConnector, RuntimeEvent, RuntimeService};
use crate::{AppError, Result};

/// Streams subscribed on connect.
const STREAMS: [&str; 3] = ["Isolate", "Debug", "Extension"];

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value>>>>>;

/// Connected runtime service client.
pub struct VmServiceClient {
    next_id: AtomicU64,
    pending: PendingMap,
    outbound: mpsc::UnboundedSender<Message>,
    main_isolate: Arc<Mutex<Option<String>>>,
    cancel: CancellationToken,
    timeout: Duration,
}

impl std::fmt::Debug for VmServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmServiceClient")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl VmServiceClient {
    /// Connect to `uri`, subscribe to the event streams and discover isolates.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Runtime` if the WebSocket handshake or the initial
    /// `getVM` call fails.
    pub async fn connect(
        uri: &str,
        events: mpsc::UnboundedSender<RuntimeEvent>,
        timeout: Duration,
    ) -> Result<Arc<Self>> {
        let ws_uri = to_websocket_uri(uri);
        let (stream, _) = tokio_tungstenite::connect_async(ws_uri.as_str()).await?;
        let (mut sink, mut source) = stream.split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let main_isolate = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        let span = info_span!("runtime_service", uri = ws_uri.as_str());

        let writer_cancel = cancel.clone();
        tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        biased;
                        () = writer_cancel.cancelled() => {
                            let _ = sink.close().await;
                            break;
                        }
                        msg = outbound_rx.recv() => {
                            let Some(msg) = msg else { break };
                            if let Err(err) = sink.send(msg).await {
                                warn!(%err, "runtime service write failed");
                                break;
                            }
                        }
                    }
                }
            }
            .instrument(span.clone()),
        );

        let reader_pending = Arc::clone(&pending);
        let reader_isolate = Arc::clone(&main_isolate);
        let reader_cancel = cancel.clone();
        tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        biased;
                        () = reader_cancel.cancelled() => break,
                        frame = source.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                handle_frame(&text, &reader_pending, &reader_isolate, &events).await;
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                warn!(%err, "runtime service read failed");
                                break;
                            }
                        }
                    }
                }
                reader_cancel.cancel();
                for (_, tx) in reader_pending.lock().await.drain() {
                    let _ = tx.send(Err(AppError::Runtime("connection closed".into())));
                }
                let _ = events.send(RuntimeEvent::Disconnected);
                debug!("runtime service reader stopped");
            }
            .instrument(span),
        );

        let client = Arc::new(Self {
            next_id: AtomicU64::new(1),
            pending,
            outbound,
            main_isolate,
            cancel,
            timeout,
        });

        for stream_id in STREAMS {
            if let Err(err) = client
                .request("streamListen", json!({ "streamId": stream_id }))
                .await
            {
                // Already-subscribed errors are expected when reconnecting.
                debug!(stream_id, %err, "streamListen failed");
            }
        }

        client.discover_isolates().await?;
        info!("runtime service connected");
        Ok(client)
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let frame = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        if self.outbound.send(Message::Text(frame.to_string())).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(AppError::Runtime(format!("cannot send {method}: connection closed")));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(AppError::Runtime(format!(
                "connection closed before {method} completed"
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(AppError::Runtime(format!(
                    "{method} did not complete within {:?}",
                    self.timeout
                )))
            }
        }
    }

    async fn discover_isolates(&self) -> Result<()> {
        let isolates = self.list_isolates().await?;
        if let Some(first) = isolates.first() {
            let mut main = self.main_isolate.lock().await;
            if main.is_none() {
                *main = Some(first.id.clone());
            }
        }
        Ok(())
    }

    async fn list_isolates(&self) -> Result<Vec<IsolateInfo>> {
        let vm = self.request("getVM", json!({})).await?;
        let isolates = vm
            .get("isolates")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(isolate_info).collect())
            .unwrap_or_default();
        Ok(isolates)
    }

    async fn main_isolate_id(&self) -> Result<String> {
        if let Some(id) = self.main_isolate.lock().await.clone() {
            return Ok(id);
        }
        self.discover_isolates().await?;
        self.main_isolate
            .lock()
            .await
            .clone()
            .ok_or_else(|| AppError::Runtime("no isolate is running".into()))
    }

    /// Report isolates that were already paused at start before we subscribed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Runtime` on transport failure.
    pub async fn paused_at_start(&self) -> Result<Vec<String>> {
        let mut paused = Vec::new();
        for isolate in self.list_isolates().await? {
            let detail = self
                .request("getIsolate", json!({ "isolateId": isolate.id }))
                .await?;
            let kind = detail
                .get("pauseEvent")
                .and_then(|e| e.get("kind"))
                .and_then(Value::as_str);
            if kind == Some("PauseStart") {
                paused.push(isolate.id);
            }
        }
        Ok(paused)
    }
}

impl RuntimeService for VmServiceClient {
    fn call_extension(&self, method: &str, params: Value) -> BoxFuture<'_, Result<Value>> {
        let method = method.to_owned();
        Box::pin(async move {
            let isolate_id = self.main_isolate_id().await?;
            let mut params = match params {
                Value::Object(map) => map,
                Value::Null => serde_json::Map::new(),
                other => {
                    let mut map = serde_json::Map::new();
                    map.insert("value".into(), other);
                    map
                }
            };
            params.insert("isolateId".into(), Value::String(isolate_id));
            self.request(&method, Value::Object(params)).await
        })
    }

    fn isolates(&self) -> BoxFuture<'_, Result<Vec<IsolateInfo>>> {
        Box::pin(self.list_isolates())
    }

    fn stack(&self, isolate_id: &str) -> BoxFuture<'_, Result<Value>> {
        let isolate_id = isolate_id.to_owned();
        Box::pin(async move {
            self.request("getStack", json!({ "isolateId": isolate_id }))
                .await
        })
    }

    fn resume(&self, isolate_id: &str) -> BoxFuture<'_, Result<()>> {
        let isolate_id = isolate_id.to_owned();
        Box::pin(async move {
            self.request("resume", json!({ "isolateId": isolate_id }))
                .await
                .map(|_| ())
        })
    }

    fn memory_usage(&self) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let isolate_id = self.main_isolate_id().await?;
            self.request("getMemoryUsage", json!({ "isolateId": isolate_id }))
                .await
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.cancel.cancel();
        })
    }
}

/// Production [`RuntimeConnector`] backed by [`VmServiceClient`].
#[derive(Debug, Clone, Copy)]
pub struct WebSocketConnector {
    timeout: Duration,
}

impl WebSocketConnector {
    /// Connector whose clients use `timeout` for every request.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl RuntimeConnector for WebSocketConnector {
    fn connect(
        &self,
        uri: &str,
        events: mpsc::UnboundedSender<RuntimeEvent>,
    ) -> BoxFuture<'_, Result<Arc<dyn RuntimeService>>> {
        let uri = uri.to_owned();
        Box::pin(async move {
            let client = VmServiceClient::connect(&uri, events.clone(), self.timeout).await?;
            match client.paused_at_start().await {
                Ok(paused) => {
                    for isolate_id in paused {
                        let _ = events.send(RuntimeEvent::PausedAtStart { isolate_id });
                    }
                }
                Err(err) => debug!(%err, "could not query initial pause state"),
            }
            Ok(client as Arc<dyn RuntimeService>)
        })
    }
}

async fn handle_frame(
    text: &str,
    pending: &PendingMap,
    main_isolate: &Arc<Mutex<Option<String>>>,
    events: &mpsc::UnboundedSender<RuntimeEvent>,
) {
    let Ok(frame) = serde_json::from_str::<Value>(text) else {
        warn!("runtime service sent a non-json frame");
        return;
    };

    if let Some(id) = frame.get("id").and_then(id_text) {
        let Some(tx) = pending.lock().await.remove(&id) else {
            debug!(%id, "runtime response without a pending request");
            return;
        };
        let outcome = match (frame.get("result"), frame.get("error")) {
            (_, Some(error)) => Err(AppError::Runtime(rpc_error_text(error))),
            (Some(result), None) => Ok(result.clone()),
            (None, None) => Ok(Value::Null),
        };
        let _ = tx.send(outcome);
        return;
    }

    if frame.get("method").and_then(Value::as_str) != Some("streamNotify") {
        return;
    }
    let Some(params) = frame.get("params") else {
        return;
    };
    let stream_id = params.get("streamId").and_then(Value::as_str).unwrap_or("");
    let Some(event) = params.get("event") else {
        return;
    };

    if let Some(runtime_event) = translate_event(stream_id, event) {
        track_isolate(&runtime_event, main_isolate).await;
        let _ = events.send(runtime_event);
    }
}

/// Map one `streamNotify` event onto a [`RuntimeEvent`].
#[must_use]
pub fn translate_event(stream_id: &str, event: &Value) -> Option<RuntimeEvent> {
    let kind = event.get("kind").and_then(Value::as_str)?;
    let isolate = event.get("isolate");
    let isolate_id = || {
        isolate
            .and_then(|i| i.get("id"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
    };

    match (stream_id, kind) {
        ("Isolate", "IsolateStart" | "IsolateRunnable") => Some(RuntimeEvent::IsolateStarted {
            isolate_id: isolate_id()?,
            name: isolate
                .and_then(|i| i.get("name"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        }),
        ("Isolate", "IsolateExit") => Some(RuntimeEvent::IsolateExited {
            isolate_id: isolate_id()?,
        }),
        ("Debug", "PauseStart") => Some(RuntimeEvent::PausedAtStart {
            isolate_id: isolate_id()?,
        }),
        ("Debug", "Inspect") => Some(RuntimeEvent::Inspect {
            isolate_id: isolate_id()?,
            inspectee: event.get("inspectee").cloned().unwrap_or(Value::Null),
        }),
        ("Extension", "Extension") => {
            let extension_kind = event.get("extensionKind").and_then(Value::as_str)?;
            let data = event.get("extensionData").cloned().unwrap_or(Value::Null);
            Some(match extension_kind {
                "Flutter.FirstFrame" => RuntimeEvent::FirstFrame,
                "Flutter.Frame" => RuntimeEvent::Frame,
                "Flutter.ServiceExtensionStateChanged" => {
                    RuntimeEvent::ServiceExtensionStateChanged(data)
                }
                other => RuntimeEvent::Extension {
                    kind: other.to_owned(),
                    data,
                },
            })
        }
        _ => None,
    }
}

async fn track_isolate(event: &RuntimeEvent, main_isolate: &Arc<Mutex<Option<String>>>) {
    match event {
        RuntimeEvent::IsolateStarted { isolate_id, .. } => {
            let mut main = main_isolate.lock().await;
            if main.is_none() {
                *main = Some(isolate_id.clone());
            }
        }
        RuntimeEvent::IsolateExited { isolate_id } => {
            let mut main = main_isolate.lock().await;
            if main.as_deref() == Some(isolate_id.as_str()) {
                *main = None;
            }
        }
        _ => {}
    }
}

fn isolate_info(value: &Value) -> Option<IsolateInfo> {
    Some(IsolateInfo {
        id: value.get("id").and_then(Value::as_str)?.to_owned(),
        name: value
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
    })
}

fn id_text(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn rpc_error_text(error: &Value) -> String {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    match error.get("data").and_then(|d| d.get("details")).and_then(Value::as_str) {
        Some(details) => format!("{message}: {details}"),
        None => message.to_owned(),
    }
}
