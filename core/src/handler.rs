//! Output handler: drives the classifier over tool output and routes blocks.
//!
//! Diagnostics go to the aggregator and, as one structured marker line, to
//! the trace sink. Everything else is written to the trace sink verbatim.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use lintbridge_types::{DiagnosticRecord, ISSUE_MARKER};

use crate::aggregate::{DiagnosticAggregator, DiagnosticSink};
use crate::classify::{Block, BlockOutcome, LineClassifier};

/// Format the marker line for a completed record (without trailing newline).
pub fn marker_line(record: &DiagnosticRecord) -> serde_json::Result<String> {
    let json = serde_json::to_string(&record.to_wire())?;
    Ok(format!("{ISSUE_MARKER} {json}"))
}

/// Streams one tool invocation's output into an aggregator.
#[derive(Debug)]
pub struct OutputHandler {
    classifier: LineClassifier,
    root: PathBuf,
    emitted: usize,
}

impl OutputHandler {
    /// `root` is the workspace folder relative record paths resolve against.
    #[must_use]
    pub fn new(classifier: LineClassifier, root: impl Into<PathBuf>) -> Self {
        Self {
            classifier,
            root: root.into(),
            emitted: 0,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of diagnostics the aggregator accepted so far.
    #[must_use]
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Process one chunk of output.
    pub fn handle<S: DiagnosticSink>(
        &mut self,
        chunk: &str,
        out: &mut impl Write,
        aggregator: &mut DiagnosticAggregator<S>,
    ) -> io::Result<()> {
        let blocks = self.classifier.feed(chunk);
        self.route(blocks, out, aggregator)
    }

    /// End of output (normal exit or cancellation): flush the open block.
    pub fn finish<S: DiagnosticSink>(
        &mut self,
        out: &mut impl Write,
        aggregator: &mut DiagnosticAggregator<S>,
    ) -> io::Result<()> {
        let blocks = self.classifier.finish();
        self.route(blocks, out, aggregator)?;
        out.flush()
    }

    fn route<S: DiagnosticSink>(
        &mut self,
        blocks: Vec<Block>,
        out: &mut impl Write,
        aggregator: &mut DiagnosticAggregator<S>,
    ) -> io::Result<()> {
        for block in blocks {
            match block.into_outcome(self.classifier.grammar()) {
                BlockOutcome::Diagnostic(record) => {
                    writeln!(out, "{}", marker_line(&record)?)?;
                    if aggregator.add_issue(record, &self.root) {
                        self.emitted += 1;
                    }
                }
                BlockOutcome::Verbatim(lines) => {
                    for line in lines {
                        writeln!(out, "{line}")?;
                    }
                }
            }
        }
        Ok(())
    }
}
