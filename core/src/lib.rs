//! Turning tool output into aggregated diagnostics.
//!
//! ```text
//! chunk ─▶ LineClassifier ─▶ Block ─▶ Grammar::parse_line ─▶ DiagnosticAggregator
//!              (classify)       │          (parse)                 │      │
//!                               └─ verbatim ─▶ trace sink          │      │
//!                                                  stream lane ◀───┘      └──▶ snapshot lane
//! ```
//!
//! Nothing here performs IO besides writing to the caller's trace sink; the
//! delivery lanes are abstracted behind [`DiagnosticSink`].

pub mod aggregate;
pub mod classify;
pub mod handler;
pub mod parse;

pub use aggregate::{DeliveryError, DiagnosticAggregator, DiagnosticSink};
pub use classify::{Block, BlockOutcome, LineClassifier, LineKind, NoiseKind, classify_line};
pub use handler::{OutputHandler, marker_line};
pub use parse::{ALTERNATE_PATTERN, Grammar, PRIMARY_PATTERN, parse_line};
