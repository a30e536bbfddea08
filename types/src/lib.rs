//! Core diagnostic types for lintbridge.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer: the parser that produces records,
//! the aggregator that groups them, and the consumer that renders them.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod payload;
mod record;
mod resource;

pub use payload::{ClearResource, ResourceSnapshot, StreamedRecord};
pub use record::{DiagnosticRecord, RawCategory, Severity, WireRecord};
pub use resource::{PathToUriError, ResourceId, normalize_path};

/// Prefix of the structured marker line written to the trace sink for every
/// completed record. The remainder of the line is a single-line [`WireRecord`].
pub const ISSUE_MARKER: &str = "__PYLINT_ISSUE__";
