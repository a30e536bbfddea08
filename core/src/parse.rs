//! Record parser: turns one line of tool output into a [`DiagnosticRecord`].
//!
//! Two grammars are tried in order:
//!
//! ```text
//! primary:    <path>:<line>:<column>: <CAT><rest>: <message>
//! alternate:  <path>:<line>: [<CODE>...] <message>
//! ```
//!
//! A line matching neither is not an error; it simply is not the start of a
//! diagnostic.

use std::sync::OnceLock;

use lintbridge_types::{DiagnosticRecord, RawCategory};
use regex::{Captures, Regex};

/// Default primary grammar. Groups: path, line, column, category, rule rest, message.
pub const PRIMARY_PATTERN: &str = r"^(.*):([0-9]+):([0-9]+):\s+(W|E|I|R|C)([^:]*):\s+(.*)$";

/// Default alternate grammar. Groups: path, line, code, message.
pub const ALTERNATE_PATTERN: &str = r"^(.*):([0-9]+):\s*\[([A-Z][0-9]+)[^\]]*\]\s*(.*)$";

/// A pair of line grammars.
///
/// Custom patterns must keep the capture-group layout of
/// [`PRIMARY_PATTERN`] and [`ALTERNATE_PATTERN`].
#[derive(Debug, Clone)]
pub struct Grammar {
    primary: Regex,
    alternate: Regex,
}

static STANDARD: OnceLock<Grammar> = OnceLock::new();

impl Grammar {
    pub fn new(primary: &str, alternate: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            primary: Regex::new(primary)?,
            alternate: Regex::new(alternate)?,
        })
    }

    /// The grammar pair for pylint's default text and parseable formats.
    pub fn standard() -> &'static Self {
        STANDARD.get_or_init(|| {
            Self::new(PRIMARY_PATTERN, ALTERNATE_PATTERN).expect("valid default grammar")
        })
    }

    /// Parse exactly one line; a single trailing line ending is ignored.
    #[must_use]
    pub fn parse_line(&self, line: &str) -> Option<DiagnosticRecord> {
        let clean = strip_line_ending(line);
        let raw = format!("{clean}\n");
        self.primary
            .captures(clean)
            .and_then(|caps| from_primary(&caps, &raw))
            .or_else(|| {
                self.alternate
                    .captures(clean)
                    .and_then(|caps| from_alternate(&caps, &raw))
            })
    }

    /// Whether `line` would start a new diagnostic.
    #[must_use]
    pub fn is_start(&self, line: &str) -> bool {
        self.parse_line(line).is_some()
    }
}

/// Parse with the [`standard`](Grammar::standard) grammar.
#[must_use]
pub fn parse_line(line: &str) -> Option<DiagnosticRecord> {
    Grammar::standard().parse_line(line)
}

fn strip_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

fn first_letter(s: &str) -> Option<char> {
    s.chars().next()
}

fn from_primary(caps: &Captures<'_>, raw: &str) -> Option<DiagnosticRecord> {
    let line_number = caps[2].parse().ok()?;
    let column_number = caps[3].parse().ok()?;
    let category = RawCategory::from_letter(first_letter(&caps[4])?)?;
    Some(DiagnosticRecord::new(
        &caps[1],
        line_number,
        column_number,
        category,
        caps.get(5).map_or("", |m| m.as_str()),
        &caps[6],
        Some(raw.to_string()),
    ))
}

fn from_alternate(caps: &Captures<'_>, raw: &str) -> Option<DiagnosticRecord> {
    let line_number = caps[2].parse().ok()?;
    let code = &caps[3];
    let category = RawCategory::from_letter(first_letter(code)?)?;
    Some(DiagnosticRecord::new(
        &caps[1],
        line_number,
        0,
        category,
        &format!(" {code}"),
        caps.get(4).map_or("", |m| m.as_str()),
        Some(raw.to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lintbridge_types::Severity;

    #[test]
    fn parses_primary_warning() {
        let rec = parse_line("file.py:10:5: W0123: Example message\n").unwrap();
        assert_eq!(rec.resource_path(), "file.py");
        assert_eq!(rec.line_number(), 10);
        assert_eq!(rec.column_number(), 5);
        assert_eq!(rec.severity(), Severity::Warning);
        assert_eq!(rec.original_category(), RawCategory::Warning);
        assert_eq!(rec.rule_id(), Some("0123"));
        assert_eq!(rec.message(), "Example message");
        assert_eq!(rec.raw_text(), Some("file.py:10:5: W0123: Example message\n"));
    }

    #[test]
    fn refactor_and_convention_normalize_to_info() {
        for (letter, expected) in [
            ('E', Severity::Error),
            ('W', Severity::Warning),
            ('I', Severity::Info),
            ('R', Severity::Info),
            ('C', Severity::Info),
        ] {
            let rec = parse_line(&format!("a.py:1:0: {letter}0001: msg")).unwrap();
            assert_eq!(rec.severity(), expected, "category {letter}");
            assert_eq!(rec.original_category().letter(), letter);
        }
    }

    #[test]
    fn duplicate_code_header_trims_rule_id() {
        let mut rec =
            parse_line("path/to/file.py:1:0: R0801: Similar lines in 2 files\n").unwrap();
        rec.append_continuation("==a.tests:[107:113]");
        rec.append_continuation("==b.tests:[50:56]");
        assert_eq!(rec.resource_path(), "path/to/file.py");
        assert_eq!(rec.column_number(), 0);
        assert_eq!(rec.severity(), Severity::Info);
        assert_eq!(rec.rule_id(), Some("0801"));
        assert_eq!(rec.message().lines().count(), 3);
    }

    #[test]
    fn empty_rule_rest_has_no_rule_id() {
        let rec = parse_line("a.py:2:3: E: Crash").unwrap();
        assert_eq!(rec.rule_id(), None);
        assert_eq!(rec.severity(), Severity::Error);
    }

    #[test]
    fn rule_tag_from_message_suffix() {
        let rec = parse_line("m.py:1:0: W0611: Unused import os (unused-import)").unwrap();
        assert_eq!(rec.rule_tag(), Some("unused-import"));
        assert_eq!(rec.to_wire().code_tag.as_deref(), Some("unused-import"));
    }

    #[test]
    fn parses_alternate_without_column() {
        let rec = parse_line("pkg/mod.py:42: [C0301(line-too-long), ] Line too long").unwrap();
        assert_eq!(rec.resource_path(), "pkg/mod.py");
        assert_eq!(rec.line_number(), 42);
        assert_eq!(rec.column_number(), 0);
        assert_eq!(rec.original_category(), RawCategory::Convention);
        assert_eq!(rec.severity(), Severity::Info);
        assert_eq!(rec.rule_id(), Some("C0301"));
        assert_eq!(rec.message(), "Line too long");
    }

    #[test]
    fn alternate_with_unknown_category_is_a_miss() {
        assert!(parse_line("a.py:1: [F0001] fatal").is_none());
    }

    #[test]
    fn crlf_is_stripped() {
        let rec = parse_line("a.py:1:0: W0001: msg\r\n").unwrap();
        assert_eq!(rec.message(), "msg");
        assert_eq!(rec.raw_text(), Some("a.py:1:0: W0001: msg\n"));
    }

    #[test]
    fn windows_drive_paths_keep_their_colon() {
        let rec = parse_line(r"C:\src\a.py:7:1: E1101: No member").unwrap();
        assert_eq!(rec.resource_path(), r"C:\src\a.py");
        assert_eq!(rec.line_number(), 7);
    }

    #[test]
    fn non_diagnostic_lines_are_misses() {
        for line in [
            "",
            "************* Module pkg.mod",
            "------------------------------------------------------------------",
            "Your code has been rated at 9.50/10 (previous run: 9.00/10, +0.50)",
            "==pkg.a:[1:5]",
            "    x = 1",
        ] {
            assert!(parse_line(line).is_none(), "{line:?}");
        }
    }

    #[test]
    fn overflowing_line_number_is_a_miss() {
        assert!(parse_line("a.py:99999999999:0: W0001: msg").is_none());
    }

    #[test]
    fn non_ascii_digits_do_not_match() {
        let primary = Regex::new(PRIMARY_PATTERN).unwrap();
        let alternate = Regex::new(ALTERNATE_PATTERN).unwrap();
        assert!(!primary.is_match("a.py:\u{663}:\u{661}: W0611: msg"));
        assert!(!alternate.is_match("a.py:\u{663}: [C\u{661}] msg"));
        assert!(parse_line("a.py:\u{663}:0: W0611: msg").is_none());
    }

    #[test]
    fn custom_grammar_is_used() {
        let grammar = Grammar::new(
            r"^(.*)\|(\d+)\|(\d+)\|(W|E|I|R|C)([^|]*)\|(.*)$",
            ALTERNATE_PATTERN,
        )
        .unwrap();
        let rec = grammar.parse_line("x.py|3|4|E0602|undefined").unwrap();
        assert_eq!(rec.line_number(), 3);
        assert_eq!(rec.rule_id(), Some("0602"));
        assert!(grammar.parse_line("x.py:3:4: E0602: undefined").is_none());
    }

    #[test]
    fn invalid_custom_grammar_is_rejected() {
        assert!(Grammar::new("(", ALTERNATE_PATTERN).is_err());
    }
}
