//! JSON-RPC plumbing between the diagnostic aggregator and its consumer.
//!
//! The producing side wraps a [`Transport`] in a [`DeliveryClient`]; the
//! consuming side runs a [`ReconcilerServer`]. [`ReconcilerProcess`] spawns
//! the consumer as a child and connects the two over stdio.

pub mod codec;
pub mod diagnostics;
pub mod protocol;

mod client;
mod process;
mod reconciler;
mod transport;

pub use client::{DeliveryClient, DeliveryConfig, TransportState};
pub use diagnostics::{PublishedDiagnostics, SeverityCounts, doc_url, to_lsp_diagnostic};
pub use process::ReconcilerProcess;
pub use reconciler::{ReconcilerServer, ReconcilerStore};
pub use transport::{RpcConnection, RpcEvent, StopReason, Transport, TransportError};
