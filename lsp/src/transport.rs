//! Transport seam and its JSON-RPC implementation.
//!
//! [`RpcConnection`] owns two tasks: a writer fed by a bounded queue and a
//! reader that routes responses to waiting requests, answers unexpected
//! peer requests with `-32601`, and forwards published diagnostics as
//! [`RpcEvent`]s.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::{FrameReader, FrameWriter};
use crate::protocol::{
    self, IncomingFrame, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_NOT_FOUND, METHOD_PUBLISH,
    Notification, PublishDiagnosticsParams, Request, Response,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const WRITER_CHANNEL_CAPACITY: usize = 1024;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("outgoing queue is full")]
    Busy,
    #[error("request timed out")]
    Timeout,
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("cannot encode message: {0}")]
    Encode(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Encode(e.to_string())
    }
}

/// The channel the delivery client speaks over.
pub trait Transport: Send + Sync + 'static {
    /// Enqueue a notification without waiting for it to be written.
    fn notify(&self, method: &'static str, params: Value) -> Result<(), TransportError>;

    /// Send a request and wait for its result. An error response is `Err`.
    fn request(
        &self,
        method: &'static str,
        params: Value,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send;

    /// Perform the connection handshake.
    fn initialize(&self, root_uri: &str) -> impl Future<Output = Result<(), TransportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn notify(&self, method: &'static str, params: Value) -> Result<(), TransportError> {
        (**self).notify(method, params)
    }

    fn request(
        &self,
        method: &'static str,
        params: Value,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send {
        (**self).request(method, params)
    }

    fn initialize(&self, root_uri: &str) -> impl Future<Output = Result<(), TransportError>> + Send {
        (**self).initialize(root_uri)
    }
}

/// Why the peer stopped talking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Exited,
    Failed(String),
}

/// Traffic from the peer that is not a response.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcEvent {
    Diagnostics(PublishDiagnosticsParams),
    Stopped(StopReason),
}

enum WriterCommand {
    Send(Value),
    Shutdown,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// One JSON-RPC connection over a reader/writer pair.
pub struct RpcConnection {
    writer_tx: mpsc::Sender<WriterCommand>,
    next_id: AtomicU64,
    pending: PendingMap,
    request_timeout: Duration,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl RpcConnection {
    /// Start the reader and writer tasks. Must be called inside a tokio runtime.
    pub fn new<R, W>(reader: R, writer: W) -> (Self, mpsc::Receiver<RpcEvent>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);

        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(writer);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!("RPC write error: {e}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_writer_tx = writer_tx.clone();
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(reader);
            let reason = loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => {
                        dispatch_frame(&frame, &reader_pending, &event_tx, &reader_writer_tx)
                            .await;
                    }
                    Ok(None) => {
                        tracing::debug!("RPC peer closed the stream");
                        break StopReason::Exited;
                    }
                    Err(e) => {
                        tracing::warn!("RPC read error: {e}");
                        break StopReason::Failed(e.to_string());
                    }
                }
            };
            // Dropping the senders fails every in-flight request immediately.
            reader_pending.lock().await.clear();
            let _ = event_tx.send(RpcEvent::Stopped(reason)).await;
        });

        let connection = Self {
            writer_tx,
            next_id: AtomicU64::new(1),
            pending,
            request_timeout: REQUEST_TIMEOUT,
            reader_handle,
            writer_handle,
        };
        (connection, event_rx)
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Send a request and return the raw response body.
    pub async fn call(
        &self,
        method: &'static str,
        params: Option<Value>,
    ) -> Result<Value, TransportError> {
        if self.reader_handle.is_finished() {
            return Err(TransportError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_value(Request::new(id, method, params))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if self.writer_tx.send(WriterCommand::Send(frame)).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(TransportError::Closed);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                Err(TransportError::Closed)
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(TransportError::Timeout)
            }
        }
    }

    /// Enqueue a notification; fails instead of waiting when the queue is full.
    pub fn send_notification(
        &self,
        method: &'static str,
        params: Option<Value>,
    ) -> Result<(), TransportError> {
        let frame = serde_json::to_value(Notification::new(method, params))?;
        self.writer_tx
            .try_send(WriterCommand::Send(frame))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::Busy,
                mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
            })
    }

    /// Stop the writer after everything already queued has been written.
    pub async fn close(&self) {
        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.reader_handle.is_finished() || self.writer_handle.is_finished()
    }
}

impl Drop for RpcConnection {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

impl Transport for RpcConnection {
    fn notify(&self, method: &'static str, params: Value) -> Result<(), TransportError> {
        self.send_notification(method, Some(params))
    }

    async fn request(&self, method: &'static str, params: Value) -> Result<Value, TransportError> {
        let body = self.call(method, Some(params)).await?;
        into_result(body)
    }

    async fn initialize(&self, root_uri: &str) -> Result<(), TransportError> {
        let params = protocol::initialize_params(root_uri);
        let body = self
            .call(METHOD_INITIALIZE, Some(params))
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        into_result(body).map_err(|e| TransportError::Handshake(e.to_string()))?;
        self.send_notification(METHOD_INITIALIZED, Some(serde_json::json!({})))
    }
}

/// Split a response body into its result or its error.
fn into_result(mut body: Value) -> Result<Value, TransportError> {
    if let Some(error) = body.get("error") {
        return Err(TransportError::Remote {
            code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        });
    }
    Ok(body.get_mut("result").map_or(Value::Null, Value::take))
}

async fn dispatch_frame(
    frame: &Value,
    pending: &Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    event_tx: &mpsc::Sender<RpcEvent>,
    writer_tx: &mpsc::Sender<WriterCommand>,
) {
    let Some(incoming) = protocol::parse_incoming(frame) else {
        tracing::trace!("Ignoring malformed JSON-RPC frame");
        return;
    };

    match incoming {
        IncomingFrame::Response { id, body } => {
            let sender = pending.lock().await.remove(&id);
            match sender {
                Some(tx) => {
                    let _ = tx.send(body);
                }
                None => tracing::trace!(id, "Response for unknown request"),
            }
        }
        IncomingFrame::Request { id, method, .. } => {
            tracing::debug!("Peer sent request {method}, replying method not found");
            let response = Response::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {method}"),
            );
            match serde_json::to_value(&response) {
                Ok(frame) => {
                    let _ = writer_tx.send(WriterCommand::Send(frame)).await;
                }
                Err(e) => tracing::warn!("Cannot encode error response: {e}"),
            }
        }
        IncomingFrame::Notification { method, params } if method == METHOD_PUBLISH => {
            let Some(params) = params else { return };
            match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                Ok(params) => {
                    let _ = event_tx.send(RpcEvent::Diagnostics(params)).await;
                }
                Err(e) => tracing::debug!("Failed to parse publishDiagnostics: {e}"),
            }
        }
        IncomingFrame::Notification { method, .. } => {
            tracing::trace!("Ignoring notification: {method}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{DuplexStream, duplex};

    /// A connection plus the peer's half of both pipes.
    fn connected() -> (
        RpcConnection,
        mpsc::Receiver<RpcEvent>,
        FrameReader<DuplexStream>,
        FrameWriter<DuplexStream>,
    ) {
        let (client_out, peer_in) = duplex(64 * 1024);
        let (peer_out, client_in) = duplex(64 * 1024);
        let (conn, events) = RpcConnection::new(client_in, client_out);
        (conn, events, FrameReader::new(peer_in), FrameWriter::new(peer_out))
    }

    #[tokio::test]
    async fn request_resolves_with_result() {
        let (conn, _events, mut peer_rx, mut peer_tx) = connected();

        let peer = tokio::spawn(async move {
            let req = peer_rx.read_frame().await.unwrap().unwrap();
            assert_eq!(req["method"], "diagnostics/append");
            assert_eq!(req["params"]["resourceId"], "file:///w/a.py");
            peer_tx
                .write_frame(&json!({"jsonrpc": "2.0", "id": req["id"], "result": {"ok": true}}))
                .await
                .unwrap();
            (peer_rx, peer_tx)
        });

        let result = conn
            .request("diagnostics/append", json!({"resourceId": "file:///w/a.py"}))
            .await
            .unwrap();
        assert_eq!(result, json!({"ok": true}));
        let _ = peer.await.unwrap();
    }

    #[tokio::test]
    async fn error_response_is_a_failure() {
        let (conn, _events, mut peer_rx, mut peer_tx) = connected();

        tokio::spawn(async move {
            let req = peer_rx.read_frame().await.unwrap().unwrap();
            peer_tx
                .write_frame(&json!({
                    "jsonrpc": "2.0",
                    "id": req["id"],
                    "error": {"code": -32602, "message": "bad params"}
                }))
                .await
                .unwrap();
            peer_rx.read_frame().await
        });

        let err = conn.request("diagnostics/append", json!({})).await.unwrap_err();
        match err {
            TransportError::Remote { code, message } => {
                assert_eq!(code, -32602);
                assert_eq!(message, "bad params");
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn peer_request_gets_method_not_found() {
        let (_conn, _events, mut peer_rx, mut peer_tx) = connected();
        peer_tx
            .write_frame(&json!({"jsonrpc": "2.0", "id": 5, "method": "workspace/configuration"}))
            .await
            .unwrap();

        let reply = peer_rx.read_frame().await.unwrap().unwrap();
        assert_eq!(reply["id"], 5);
        assert_eq!(reply["error"]["code"], -32601);
        assert!(
            reply["error"]["message"]
                .as_str()
                .unwrap()
                .contains("workspace/configuration")
        );
    }

    #[tokio::test]
    async fn published_diagnostics_become_events() {
        let (_conn, mut events, _peer_rx, mut peer_tx) = connected();
        peer_tx
            .write_frame(&json!({"jsonrpc": "2.0", "method": "window/logMessage", "params": {}}))
            .await
            .unwrap();
        peer_tx
            .write_frame(&json!({
                "jsonrpc": "2.0",
                "method": "textDocument/publishDiagnostics",
                "params": {"uri": "file:///w/a.py", "diagnostics": []}
            }))
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            RpcEvent::Diagnostics(params) => {
                assert_eq!(params.uri, "file:///w/a.py");
                assert!(params.diagnostics.is_empty());
            }
            other => panic!("expected diagnostics, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn peer_close_fails_pending_and_reports_stop() {
        let (conn, mut events, mut peer_rx, peer_tx) = connected();
        let waiter = tokio::spawn(async move {
            let result = conn.call("shutdown", None).await;
            (conn, result)
        });
        let req = peer_rx.read_frame().await.unwrap().unwrap();
        assert_eq!(req["method"], "shutdown");
        drop(peer_tx);

        let (_conn, result) = waiter.await.unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
        assert_eq!(
            events.recv().await.unwrap(),
            RpcEvent::Stopped(StopReason::Exited)
        );
        drop(peer_rx);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out() {
        let (conn, _events, _peer_rx, _peer_tx) = connected();
        let conn = conn.with_request_timeout(Duration::from_millis(250));
        let err = conn.call("shutdown", None).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
        assert!(conn.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn initialize_sends_request_then_initialized() {
        let (conn, _events, mut peer_rx, mut peer_tx) = connected();

        let peer = tokio::spawn(async move {
            let req = peer_rx.read_frame().await.unwrap().unwrap();
            assert_eq!(req["method"], "initialize");
            assert_eq!(req["params"]["rootUri"], "file:///w");
            peer_tx
                .write_frame(&json!({"jsonrpc": "2.0", "id": req["id"], "result": {"capabilities": {}}}))
                .await
                .unwrap();
            let initialized = peer_rx.read_frame().await.unwrap().unwrap();
            assert_eq!(initialized["method"], "initialized");
            assert!(initialized.get("id").is_none());
        });

        conn.initialize("file:///w").await.unwrap();
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_initialize_is_a_handshake_error() {
        let (conn, _events, mut peer_rx, mut peer_tx) = connected();
        tokio::spawn(async move {
            let req = peer_rx.read_frame().await.unwrap().unwrap();
            peer_tx
                .write_frame(&json!({
                    "jsonrpc": "2.0", "id": req["id"],
                    "error": {"code": -32002, "message": "not now"}
                }))
                .await
                .unwrap();
            peer_rx.read_frame().await
        });

        let err = conn.initialize("file:///w").await.unwrap_err();
        assert!(matches!(err, TransportError::Handshake(ref m) if m.contains("not now")));
    }
}
