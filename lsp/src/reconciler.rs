//! Remote reconciler: the consumer end of a lintbridge connection.
//!
//! Streamed records are additive per resource; snapshots replace a
//! resource's list outright. After every change the affected resources are
//! republished as `textDocument/publishDiagnostics`.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use lintbridge_types::{ClearResource, ResourceId, ResourceSnapshot, StreamedRecord, WireRecord};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::{FrameReader, FrameWriter};
use crate::diagnostics::to_lsp_diagnostic;
use crate::protocol::{
    self, INVALID_PARAMS, IncomingFrame, LspDiagnostic, METHOD_APPEND, METHOD_CLEAR, METHOD_EXIT,
    METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_NOT_FOUND, METHOD_PUBLISH, METHOD_REPLACE,
    METHOD_SHUTDOWN, Notification, PublishDiagnosticsParams, Response,
};

/// Per-resource record lists held by the reconciler.
#[derive(Debug, Default)]
pub struct ReconcilerStore {
    data: BTreeMap<ResourceId, Vec<WireRecord>>,
}

impl ReconcilerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot lane: the list becomes exactly `records`.
    pub fn replace(&mut self, resource_id: ResourceId, records: Vec<WireRecord>) {
        if records.is_empty() {
            self.data.remove(&resource_id);
        } else {
            self.data.insert(resource_id, records);
        }
    }

    /// Streamed lane.
    pub fn append(&mut self, resource_id: ResourceId, record: WireRecord) {
        self.data.entry(resource_id).or_default().push(record);
    }

    /// Clear one resource, or all when `None`. Returns what was cleared.
    pub fn clear(&mut self, resource_id: Option<&ResourceId>) -> Vec<ResourceId> {
        match resource_id {
            Some(id) => {
                self.data.remove(id);
                vec![id.clone()]
            }
            None => std::mem::take(&mut self.data).into_keys().collect(),
        }
    }

    #[must_use]
    pub fn records(&self, resource_id: &ResourceId) -> &[WireRecord] {
        self.data.get(resource_id).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn diagnostics(&self, resource_id: &ResourceId) -> Vec<LspDiagnostic> {
        self.records(resource_id)
            .iter()
            .map(to_lsp_diagnostic)
            .collect()
    }

    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.data.len()
    }
}

/// Whether the serve loop should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// Serves one connection until `exit` or end of input.
pub struct ReconcilerServer<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    store: ReconcilerStore,
    shutdown_requested: bool,
}

impl<R, W> ReconcilerServer<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
            store: ReconcilerStore::new(),
            shutdown_requested: false,
        }
    }

    pub fn store(&self) -> &ReconcilerStore {
        &self.store
    }

    /// Process frames until the peer sends `exit` or closes the stream.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            let Some(frame) = self.reader.read_frame().await.context("reading frame")? else {
                tracing::info!("Client closed the connection");
                return Ok(());
            };
            let flow = match protocol::parse_incoming(&frame) {
                Some(IncomingFrame::Request { id, method, params }) => {
                    self.handle_request(id, &method, params).await?;
                    Flow::Continue
                }
                Some(IncomingFrame::Notification { method, params }) => {
                    self.handle_notification(&method, params).await?
                }
                Some(IncomingFrame::Response { id, .. }) => {
                    tracing::trace!(id, "Ignoring response");
                    Flow::Continue
                }
                None => {
                    tracing::trace!("Ignoring malformed JSON-RPC frame");
                    Flow::Continue
                }
            };
            if flow == Flow::Exit {
                tracing::info!(
                    clean = self.shutdown_requested,
                    "Exit requested"
                );
                return Ok(());
            }
        }
    }

    async fn handle_request(&mut self, id: Value, method: &str, params: Option<Value>) -> Result<()> {
        let response = match method {
            METHOD_INITIALIZE => Response::success(id, protocol::initialize_result()),
            METHOD_SHUTDOWN => {
                self.shutdown_requested = true;
                Response::success(id, Value::Null)
            }
            METHOD_APPEND => match decode::<StreamedRecord>(params) {
                Ok(update) => {
                    tracing::debug!(uri = %update.resource_id, "Append");
                    let resource_id = update.resource_id.clone();
                    self.store.append(update.resource_id, update.record);
                    self.publish(&resource_id).await?;
                    Response::success(id, serde_json::json!({ "ok": true }))
                }
                Err(e) => Response::error(id, INVALID_PARAMS, e.to_string()),
            },
            other => {
                tracing::debug!("Unknown request {other}");
                Response::error(id, METHOD_NOT_FOUND, format!("Method not found: {other}"))
            }
        };
        self.writer
            .write_frame(&response)
            .await
            .context("writing response")
    }

    async fn handle_notification(&mut self, method: &str, params: Option<Value>) -> Result<Flow> {
        match method {
            METHOD_INITIALIZED => {}
            METHOD_EXIT => return Ok(Flow::Exit),
            METHOD_REPLACE => match decode::<ResourceSnapshot>(params) {
                Ok(snapshot) => {
                    tracing::debug!(
                        uri = %snapshot.resource_id,
                        count = snapshot.records.len(),
                        "Replace"
                    );
                    let resource_id = snapshot.resource_id.clone();
                    self.store.replace(snapshot.resource_id, snapshot.records);
                    self.publish(&resource_id).await?;
                }
                Err(e) => tracing::warn!("Bad {METHOD_REPLACE} params: {e}"),
            },
            METHOD_CLEAR => {
                let request = match params {
                    Some(params) => match serde_json::from_value::<ClearResource>(params) {
                        Ok(request) => request,
                        Err(e) => {
                            tracing::warn!("Bad {METHOD_CLEAR} params: {e}");
                            return Ok(Flow::Continue);
                        }
                    },
                    None => ClearResource::default(),
                };
                for resource_id in self.store.clear(request.resource_id.as_ref()) {
                    self.publish(&resource_id).await?;
                }
            }
            other => tracing::trace!("Ignoring notification: {other}"),
        }
        Ok(Flow::Continue)
    }

    async fn publish(&mut self, resource_id: &ResourceId) -> Result<()> {
        let params = PublishDiagnosticsParams {
            uri: resource_id.to_string(),
            diagnostics: self.store.diagnostics(resource_id),
        };
        let notification = Notification::new(METHOD_PUBLISH, Some(serde_json::to_value(params)?));
        self.writer
            .write_frame(&notification)
            .await
            .context("publishing diagnostics")
    }
}

fn decode<T: DeserializeOwned>(params: Option<Value>) -> Result<T, serde_json::Error> {
    serde_json::from_value(params.unwrap_or(Value::Null))
}
