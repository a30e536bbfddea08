//! Block classifier: groups streamed output lines into logical blocks.
//!
//! A block is one primary line plus the continuation lines that follow it.
//! The classifier is a two-state machine:
//!
//! ```text
//!                 line                       continuation
//! AwaitingStart ───────▶ InBlock(lines) ◀───────────────┐
//!                           │  └────────────────────────┘
//!                           │ noise or diagnostic start
//!                           ▼
//!                   emit block, InBlock([line])
//! ```
//!
//! Decisions look exactly one line ahead. A continuation line that happens
//! to match a diagnostic grammar (and is not indented or marked) ends the
//! current block early; the output format has no end-of-record marker to do
//! better.
//!
//! Chunks need not align with line boundaries: an unterminated trailing
//! segment is carried to the next [`feed`](LineClassifier::feed), and the
//! open block stays open until a terminating line or [`finish`](LineClassifier::finish).

use std::sync::OnceLock;

use lintbridge_types::DiagnosticRecord;
use regex::Regex;

use crate::parse::Grammar;

/// Explicit continuation marker used by duplicate-code reports.
const BLOCK_MARKER: &str = "==";

/// Fixed phrase of the tool's closing score line.
const RATING_PREFIX: &str = "Your code has been rated at";

/// Lines that never belong to a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseKind {
    /// `************* Module pkg.mod`
    Banner,
    /// `-----------------------------------`
    Separator,
    /// `Your code has been rated at 9.50/10`
    Rating,
}

/// How a line relates to the block before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Noise(NoiseKind),
    /// Starts with the block marker or whitespace; always a continuation.
    Marked,
    /// Parses as a new diagnostic.
    Start,
    /// Anything else; a continuation.
    Plain,
}

impl LineKind {
    /// Whether a line of this kind closes the currently open block.
    #[must_use]
    pub fn terminates_block(self) -> bool {
        matches!(self, Self::Noise(_) | Self::Start)
    }
}

struct NoisePatterns {
    banner: Regex,
    separator: Regex,
}

static NOISE: OnceLock<NoisePatterns> = OnceLock::new();

fn noise_patterns() -> &'static NoisePatterns {
    NOISE.get_or_init(|| NoisePatterns {
        banner: Regex::new(r"^\*{5,}(\s.*)?$").expect("valid banner regex"),
        separator: Regex::new(r"^\s*-{5,}\s*$").expect("valid separator regex"),
    })
}

fn noise_kind(line: &str) -> Option<NoiseKind> {
    let patterns = noise_patterns();
    if patterns.banner.is_match(line) {
        Some(NoiseKind::Banner)
    } else if patterns.separator.is_match(line) {
        Some(NoiseKind::Separator)
    } else if line.starts_with(RATING_PREFIX) {
        Some(NoiseKind::Rating)
    } else {
        None
    }
}

/// Classify a candidate continuation line.
///
/// Guard order matters: noise terminates even when indented, and marked
/// lines continue even when they would parse as a diagnostic.
#[must_use]
pub fn classify_line(grammar: &Grammar, line: &str) -> LineKind {
    if let Some(kind) = noise_kind(line) {
        return LineKind::Noise(kind);
    }
    if line.starts_with(BLOCK_MARKER) || line.starts_with(char::is_whitespace) {
        return LineKind::Marked;
    }
    if grammar.is_start(line) {
        return LineKind::Start;
    }
    LineKind::Plain
}

/// A finalized group of lines, without line terminators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    lines: Vec<String>,
}

/// What a finalized block turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// First line parsed; the rest were appended as continuations.
    Diagnostic(DiagnosticRecord),
    /// Not a diagnostic; pass the lines through untouched.
    Verbatim(Vec<String>),
}

impl Block {
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    #[must_use]
    pub fn into_outcome(self, grammar: &Grammar) -> BlockOutcome {
        let Some(mut record) = self.lines.first().and_then(|l| grammar.parse_line(l)) else {
            return BlockOutcome::Verbatim(self.lines);
        };
        for line in &self.lines[1..] {
            record.append_continuation(line);
        }
        BlockOutcome::Diagnostic(record)
    }
}

#[derive(Debug)]
enum State {
    AwaitingStart,
    InBlock(Vec<String>),
}

/// Streaming line buffer with one-line lookahead.
#[derive(Debug)]
pub struct LineClassifier {
    grammar: Grammar,
    state: State,
    partial: String,
}

impl LineClassifier {
    #[must_use]
    pub fn new(grammar: Grammar) -> Self {
        Self {
            grammar,
            state: State::AwaitingStart,
            partial: String::new(),
        }
    }

    #[must_use]
    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    /// Consume one chunk and return every block it completed.
    pub fn feed(&mut self, chunk: &str) -> Vec<Block> {
        self.partial.push_str(chunk);
        let mut blocks = Vec::new();

        let Some(end) = self.partial.rfind('\n') else {
            return blocks;
        };
        let rest = self.partial.split_off(end + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        for line in complete.lines() {
            self.step(line.to_string(), &mut blocks);
        }
        blocks
    }

    /// End of stream: classify any carried partial line and close the open block.
    pub fn finish(&mut self) -> Vec<Block> {
        let mut blocks = Vec::new();
        let partial = std::mem::take(&mut self.partial);
        if !partial.is_empty() {
            let line = partial.strip_suffix('\r').unwrap_or(&partial).to_string();
            self.step(line, &mut blocks);
        }
        if let State::InBlock(lines) = std::mem::replace(&mut self.state, State::AwaitingStart) {
            blocks.push(Block { lines });
        }
        blocks
    }

    /// Whether a block is open or a partial line is buffered.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        matches!(self.state, State::InBlock(_)) || !self.partial.is_empty()
    }

    fn step(&mut self, line: String, blocks: &mut Vec<Block>) {
        self.state = match std::mem::replace(&mut self.state, State::AwaitingStart) {
            State::AwaitingStart => State::InBlock(vec![line]),
            State::InBlock(mut lines) => {
                if classify_line(&self.grammar, &line).terminates_block() {
                    blocks.push(Block { lines });
                    State::InBlock(vec![line])
                } else {
                    lines.push(line);
                    State::InBlock(lines)
                }
            }
        };
    }
}

impl Default for LineClassifier {
    fn default() -> Self {
        Self::new(Grammar::standard().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lintbridge_types::Severity;

    fn lines_of(blocks: &[Block]) -> Vec<Vec<&str>> {
        blocks
            .iter()
            .map(|b| b.lines().iter().map(String::as_str).collect())
            .collect()
    }

    fn run(chunks: &[&str]) -> Vec<Block> {
        let mut classifier = LineClassifier::default();
        let mut blocks = Vec::new();
        for chunk in chunks {
            blocks.extend(classifier.feed(chunk));
        }
        blocks.extend(classifier.finish());
        blocks
    }

    #[test]
    fn duplicate_code_block_collects_marked_lines() {
        let blocks = run(&[concat!(
            "path/to/file.py:1:0: R0801: Similar lines in 2 files\n",
            "==a.tests:[107:113]\n",
            "==b.tests:[50:56]\n",
        )]);
        assert_eq!(blocks.len(), 1);
        let BlockOutcome::Diagnostic(rec) = blocks[0].clone().into_outcome(Grammar::standard())
        else {
            panic!("expected diagnostic");
        };
        assert_eq!(rec.severity(), Severity::Info);
        assert_eq!(rec.rule_id(), Some("0801"));
        assert_eq!(rec.message().lines().count(), 3);
    }

    #[test]
    fn banner_terminates_block() {
        let blocks = run(&["a.py:1:0: W0611: Unused import os\n***** Module x\n"]);
        assert_eq!(
            lines_of(&blocks),
            vec![vec!["a.py:1:0: W0611: Unused import os"], vec!["***** Module x"]]
        );
    }

    #[test]
    fn separator_and_rating_terminate_block() {
        let blocks = run(&[concat!(
            "a.py:1:0: C0114: Missing module docstring\n",
            "\n",
            "  -----------------------------------\n",
            "Your code has been rated at 9.50/10\n",
        )]);
        assert_eq!(
            lines_of(&blocks),
            vec![
                vec!["a.py:1:0: C0114: Missing module docstring", ""],
                vec!["  -----------------------------------"],
                vec!["Your code has been rated at 9.50/10"],
            ]
        );
    }

    #[test]
    fn consecutive_diagnostics_split() {
        let blocks = run(&["a.py:1:0: W0001: one\na.py:2:0: E0002: two\n"]);
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn indented_line_continues_even_if_it_parses() {
        let blocks = run(&["a.py:1:0: W0001: one\n  b.py:2:0: E0002: nested\n"]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].lines().len(), 2);
    }

    #[test]
    fn unmarked_lookalike_ends_block_early() {
        // Known limitation of one-line lookahead.
        let blocks = run(&[concat!(
            "a.py:1:0: R0801: Similar lines in 2 files\n",
            "quoted.py:3:1: W0001: looks like a diagnostic\n",
            "tail\n",
        )]);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].lines().len(), 2);
    }

    #[test]
    fn non_diagnostic_text_groups_until_start() {
        let blocks = run(&["some preamble\nmore text\na.py:1:0: W0001: msg\n"]);
        assert_eq!(
            lines_of(&blocks),
            vec![vec!["some preamble", "more text"], vec!["a.py:1:0: W0001: msg"]]
        );
        assert!(matches!(
            blocks[0].clone().into_outcome(Grammar::standard()),
            BlockOutcome::Verbatim(lines) if lines.len() == 2
        ));
    }

    #[test]
    fn partial_line_carries_across_chunks() {
        let blocks = run(&["a.py:1:0: W00", "01: split message\n==x:[1:2]", "\n"]);
        assert_eq!(
            lines_of(&blocks),
            vec![vec!["a.py:1:0: W0001: split message", "==x:[1:2]"]]
        );
    }

    #[test]
    fn continuation_in_later_chunk_joins_open_block() {
        let mut classifier = LineClassifier::default();
        assert!(classifier.feed("a.py:1:0: R0801: Similar lines\n").is_empty());
        assert!(classifier.has_pending());
        assert!(classifier.feed("==a:[1:2]\n").is_empty());
        let done = classifier.feed("b.py:2:0: W0001: next\n");
        assert_eq!(
            lines_of(&done),
            vec![vec!["a.py:1:0: R0801: Similar lines", "==a:[1:2]"]]
        );
        assert_eq!(classifier.finish().len(), 1);
        assert!(!classifier.has_pending());
    }

    #[test]
    fn crlf_lines_are_accepted() {
        let blocks = run(&["a.py:1:0: W0001: one\r\n==m:[1:2]\r\n"]);
        assert_eq!(lines_of(&blocks), vec![vec!["a.py:1:0: W0001: one", "==m:[1:2]"]]);
    }

    #[test]
    fn unterminated_final_line_is_flushed_by_finish() {
        let mut classifier = LineClassifier::default();
        assert!(classifier.feed("a.py:1:0: W0001: no newline").is_empty());
        let blocks = classifier.finish();
        assert_eq!(lines_of(&blocks), vec![vec!["a.py:1:0: W0001: no newline"]]);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(run(&["", ""]).is_empty());
    }

    #[test]
    fn classify_line_guard_order() {
        let g = Grammar::standard();
        assert_eq!(classify_line(g, "***** Module x"), LineKind::Noise(NoiseKind::Banner));
        assert_eq!(classify_line(g, "*****"), LineKind::Noise(NoiseKind::Banner));
        assert_eq!(classify_line(g, "**** four"), LineKind::Plain);
        assert_eq!(classify_line(g, "   ------  "), LineKind::Noise(NoiseKind::Separator));
        assert_eq!(
            classify_line(g, "Your code has been rated at 10.00/10"),
            LineKind::Noise(NoiseKind::Rating)
        );
        assert_eq!(classify_line(g, "==a.py:1:0: W0001: x"), LineKind::Marked);
        assert_eq!(classify_line(g, "\tcontext"), LineKind::Marked);
        assert_eq!(classify_line(g, "a.py:1:0: W0001: x"), LineKind::Start);
        assert_eq!(classify_line(g, "plain words"), LineKind::Plain);
        assert_eq!(classify_line(g, ""), LineKind::Plain);
    }
}
