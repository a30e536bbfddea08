//! The diagnostic record and its severity model.

use serde::{Deserialize, Serialize};

/// Normalized three-level severity understood by editors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "E")]
    Error,
    #[serde(rename = "W")]
    Warning,
    #[serde(rename = "I")]
    Info,
}

impl Severity {
    #[must_use]
    pub const fn letter(self) -> char {
        match self {
            Self::Error => 'E',
            Self::Warning => 'W',
            Self::Info => 'I',
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

/// The tool's own category letter, before normalization.
///
/// Five raw categories fold into three [`Severity`] levels: refactor and
/// convention findings are reported as informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RawCategory {
    #[serde(rename = "E")]
    Error,
    #[serde(rename = "W")]
    Warning,
    #[serde(rename = "I")]
    Info,
    #[serde(rename = "R")]
    Refactor,
    #[serde(rename = "C")]
    Convention,
}

impl RawCategory {
    #[must_use]
    pub const fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'E' => Some(Self::Error),
            'W' => Some(Self::Warning),
            'I' => Some(Self::Info),
            'R' => Some(Self::Refactor),
            'C' => Some(Self::Convention),
            _ => None,
        }
    }

    #[must_use]
    pub const fn letter(self) -> char {
        match self {
            Self::Error => 'E',
            Self::Warning => 'W',
            Self::Info => 'I',
            Self::Refactor => 'R',
            Self::Convention => 'C',
        }
    }

    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::Error => Severity::Error,
            Self::Warning => Severity::Warning,
            Self::Info | Self::Refactor | Self::Convention => Severity::Info,
        }
    }

    /// Directory name the tool's documentation uses for this category.
    #[must_use]
    pub const fn doc_name(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "information",
            Self::Refactor => "refactor",
            Self::Convention => "convention",
        }
    }
}

/// A single finding extracted from tool output.
///
/// Location, category and rule id are fixed at construction. Only the message
/// and raw text grow, and only through [`append_continuation`](Self::append_continuation).
/// The rule tag is never stored: it is re-derived from the current message on
/// every read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticRecord {
    resource_path: String,
    line_number: u32,
    column_number: u32,
    original_category: RawCategory,
    rule_id: Option<String>,
    message: String,
    raw_text: Option<String>,
}

impl DiagnosticRecord {
    /// Build a record from already-matched fields.
    ///
    /// `rule_rest` is the untrimmed remainder of the rule token; blank input
    /// yields no rule id.
    #[must_use]
    pub fn new(
        resource_path: impl Into<String>,
        line_number: u32,
        column_number: u32,
        original_category: RawCategory,
        rule_rest: &str,
        message: impl Into<String>,
        raw_text: Option<String>,
    ) -> Self {
        let trimmed = rule_rest.trim();
        Self {
            resource_path: resource_path.into(),
            line_number,
            column_number,
            original_category,
            rule_id: (!trimmed.is_empty()).then(|| trimmed.to_string()),
            message: message.into(),
            raw_text,
        }
    }

    #[must_use]
    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    /// 1-based line number as reported by the tool.
    #[must_use]
    pub fn line_number(&self) -> u32 {
        self.line_number
    }

    /// Column as reported by the tool; 0 when the grammar has no column.
    #[must_use]
    pub fn column_number(&self) -> u32 {
        self.column_number
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        self.original_category.severity()
    }

    #[must_use]
    pub fn original_category(&self) -> RawCategory {
        self.original_category
    }

    #[must_use]
    pub fn rule_id(&self) -> Option<&str> {
        self.rule_id.as_deref()
    }

    /// Parenthesized suffix of the final message line, e.g. `unused-import`.
    #[must_use]
    pub fn rule_tag(&self) -> Option<&str> {
        rule_tag_of(&self.message)
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn raw_text(&self) -> Option<&str> {
        self.raw_text.as_deref()
    }

    /// Extend the record with one continuation line (without its terminator).
    pub fn append_continuation(&mut self, line: &str) {
        self.message.push('\n');
        self.message.push_str(line);
        let raw = self.raw_text.get_or_insert_with(String::new);
        raw.push_str(line);
        raw.push('\n');
    }

    #[must_use]
    pub fn to_wire(&self) -> WireRecord {
        WireRecord {
            file: self.resource_path.clone(),
            line: self.line_number,
            column: self.column_number,
            category: self.severity(),
            original_category: Some(self.original_category),
            code: self.rule_id.clone(),
            code_tag: self.rule_tag().map(str::to_string),
            message: self.message.clone(),
            raw: self.raw_text.clone(),
        }
    }
}

fn rule_tag_of(message: &str) -> Option<&str> {
    let last_line = message.rsplit('\n').next()?;
    let inner = last_line.strip_suffix(')')?;
    let open = inner.rfind('(')?;
    let tag = &inner[open + 1..];
    (!tag.is_empty() && !tag.contains(')')).then_some(tag)
}

/// Serialized form of a record, shared by the trace sink and the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRecord {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub category: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_category: Option<RawCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_tag: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl From<&DiagnosticRecord> for WireRecord {
    fn from(record: &DiagnosticRecord) -> Self {
        record.to_wire()
    }
}
