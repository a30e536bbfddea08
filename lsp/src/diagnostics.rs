//! Editor-facing diagnostics: conversion from wire records and the
//! client-side view of what the reconciler has published.

use std::collections::BTreeMap;

use lintbridge_types::{Severity, WireRecord};

use crate::protocol::{CodeDescription, LspDiagnostic, Position, PublishDiagnosticsParams, Range};

pub const SOURCE: &str = "pylint";

const DOCS_BASE: &str = "https://pylint.readthedocs.io/en/latest";

/// Reference page listing every message id.
pub const MESSAGES_REFERENCE: &str =
    "https://pylint.readthedocs.io/en/latest/technical_reference/messages/messages.html";

/// Documentation link for a record.
///
/// The per-message page needs both the symbolic tag and the category the
/// tool reported; without them the link falls back to the reference index.
#[must_use]
pub fn doc_url(record: &WireRecord) -> String {
    match (record.code_tag.as_deref(), record.original_category) {
        (Some(tag), Some(category)) => format!(
            "{DOCS_BASE}/user_guide/messages/{}/{tag}.html",
            category.doc_name()
        ),
        _ => match record.code.as_deref() {
            Some(code) => format!("{MESSAGES_REFERENCE}#{code}"),
            None => MESSAGES_REFERENCE.to_string(),
        },
    }
}

#[must_use]
pub fn severity_to_lsp(severity: Severity) -> u8 {
    match severity {
        Severity::Error => 1,
        Severity::Warning => 2,
        Severity::Info => 3,
    }
}

/// Hints fold into `Info`; anything unrecognized is `None`.
#[must_use]
pub fn severity_from_lsp(value: u8) -> Option<Severity> {
    match value {
        1 => Some(Severity::Error),
        2 => Some(Severity::Warning),
        3 | 4 => Some(Severity::Info),
        _ => None,
    }
}

/// Convert a wire record into an editor diagnostic.
///
/// Lines and columns arrive 1-based from the tool and leave 0-based; a
/// column of 0 (grammar without columns) clamps to the line start.
#[must_use]
pub fn to_lsp_diagnostic(record: &WireRecord) -> LspDiagnostic {
    let start = Position {
        line: record.line.saturating_sub(1),
        character: record.column.saturating_sub(1),
    };
    let end = Position {
        line: start.line,
        character: start.character + 1,
    };
    let code = record
        .code_tag
        .clone()
        .or_else(|| record.code.clone())
        .unwrap_or_else(|| record.category.letter().to_string());

    LspDiagnostic {
        range: Range { start, end },
        severity: Some(severity_to_lsp(record.category)),
        code: Some(code),
        code_description: Some(CodeDescription {
            href: doc_url(record),
        }),
        source: Some(SOURCE.to_string()),
        message: record.message.clone(),
    }
}

/// Per-severity totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeverityCounts {
    pub errors: usize,
    pub warnings: usize,
    pub infos: usize,
}

impl SeverityCounts {
    pub fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
            Severity::Info => self.infos += 1,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.errors + self.warnings + self.infos
    }

    /// `E:1 W:2 I:0` style summary.
    #[must_use]
    pub fn status_string(&self) -> String {
        format!("E:{} W:{} I:{}", self.errors, self.warnings, self.infos)
    }
}

/// Latest published diagnostics per URI, as seen by the client.
#[derive(Debug, Default)]
pub struct PublishedDiagnostics {
    data: BTreeMap<String, Vec<LspDiagnostic>>,
}

impl PublishedDiagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publications replace; an empty list forgets the URI.
    pub fn update(&mut self, params: PublishDiagnosticsParams) {
        if params.diagnostics.is_empty() {
            self.data.remove(&params.uri);
        } else {
            self.data.insert(params.uri, params.diagnostics);
        }
    }

    #[must_use]
    pub fn get(&self, uri: &str) -> &[LspDiagnostic] {
        self.data.get(uri).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn file_count(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Files with errors first, then by URI.
    #[must_use]
    pub fn files(&self) -> Vec<(&str, &[LspDiagnostic])> {
        let mut files: Vec<(&str, &[LspDiagnostic])> = self
            .data
            .iter()
            .map(|(uri, items)| (uri.as_str(), items.as_slice()))
            .collect();
        files.sort_by(|a, b| {
            let a_err = a.1.iter().any(is_error);
            let b_err = b.1.iter().any(is_error);
            b_err.cmp(&a_err).then_with(|| a.0.cmp(b.0))
        });
        files
    }

    #[must_use]
    pub fn counts(&self) -> SeverityCounts {
        let mut counts = SeverityCounts::default();
        for diag in self.data.values().flatten() {
            counts.add(
                diag.severity
                    .and_then(severity_from_lsp)
                    .unwrap_or(Severity::Warning),
            );
        }
        counts
    }
}

fn is_error(diag: &LspDiagnostic) -> bool {
    diag.severity.and_then(severity_from_lsp) == Some(Severity::Error)
}
