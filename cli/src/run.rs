//! One lint pass, or a session of them, delivered to a reconciler.
//!
//! ```text
//! pylint ──chunks──> OutputHandler ──> DiagnosticAggregator ──> DeliveryClient
//!                         │                                          │ JSON-RPC
//!                         v                                          v
//!                  stdout (trace)                           reconciler child
//!                                                                    │
//!                              PublishedDiagnostics <──publish───────┘
//! ```
//!
//! A [`Session`] keeps one aggregator and one reconciler connection across
//! passes, so a targeted pass replaces only the diagnostics under its
//! target and leaves every other file's diagnostics in place.

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use lintbridge_config::{PylintSettings, ReconcilerSettings, Settings};
use lintbridge_core::{
    ALTERNATE_PATTERN, DiagnosticAggregator, DiagnosticSink, Grammar, LineClassifier,
    OutputHandler, PRIMARY_PATTERN,
};
use lintbridge_lsp::{
    DeliveryClient, PublishedDiagnostics, ReconcilerProcess, RpcConnection, RpcEvent,
    SeverityCounts,
};
use lintbridge_types::{ResourceId, normalize_path};
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::gateway::{self, ToolRun, ToolStream};

/// Time between SIGINT and a hard kill after Ctrl-C.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Exit code after an interrupted run (128 + SIGINT).
const INTERRUPTED_EXIT: u8 = 130;

type Client = DeliveryClient<Arc<RpcConnection>>;

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// File or directory to lint; the whole workspace when `None`.
    pub target: Option<PathBuf>,
    /// Absolute workspace root.
    pub workspace: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub counts: SeverityCounts,
    pub files: usize,
    /// Diagnostics recognized in the tool's output.
    pub emitted: usize,
    pub tool_exit: Option<i32>,
    pub interrupted: bool,
}

impl PassSummary {
    #[must_use]
    pub fn status_line(&self) -> String {
        let mut line = status_line(self.counts, self.files);
        if self.interrupted {
            line.push_str(" (interrupted)");
        }
        line
    }

    /// pylint's own exit code is a bitmask of message categories, so a
    /// completed run is a success regardless of findings.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        if self.interrupted {
            ExitCode::from(INTERRUPTED_EXIT)
        } else {
            ExitCode::SUCCESS
        }
    }
}

fn status_line(counts: SeverityCounts, files: usize) -> String {
    format!(
        "{} in {files} file{}",
        counts.status_string(),
        if files == 1 { "" } else { "s" }
    )
}

/// Grammar from the configured patterns, falling back to the defaults.
pub fn grammar_for(settings: &PylintSettings) -> Result<Grammar> {
    if settings.primary_pattern.is_none() && settings.alternate_pattern.is_none() {
        return Ok(Grammar::standard().clone());
    }
    let primary = settings.primary_pattern.as_deref().unwrap_or(PRIMARY_PATTERN);
    let alternate = settings
        .alternate_pattern
        .as_deref()
        .unwrap_or(ALTERNATE_PATTERN);
    Grammar::new(primary, alternate).context("invalid pylint line pattern in config")
}

/// The reconciler executable: the configured command, or this binary.
pub fn reconciler_command(settings: &ReconcilerSettings, workspace: &Path) -> Result<PathBuf> {
    match &settings.command {
        Some(command) => Ok(gateway::resolve_program(command, workspace)?),
        None => std::env::current_exe().context("locating the lintbridge executable"),
    }
}

fn absolute_target(target: &Path, workspace: &Path) -> PathBuf {
    if target.is_absolute() {
        target.to_path_buf()
    } else {
        workspace.join(target)
    }
}

/// Matches the target's own URI and every URI below it.
fn target_pattern(target: &ResourceId) -> Result<Regex> {
    let pattern = format!("^{}(?:/|$)", regex::escape(target.as_str()));
    Regex::new(&pattern).context("building target pattern")
}

/// Lint once and report what the reconciler ended up publishing.
pub async fn run(options: RunOptions, settings: &Settings) -> Result<PassSummary> {
    let mut session = Session::start(options.workspace, settings).await?;
    let mut summary = session.lint(options.target.as_deref()).await?;
    let published = session.close().await?;
    summary.counts = published.counts();
    summary.files = published.file_count();
    Ok(summary)
}

/// A reconciler connection and the aggregate state that feeds it.
pub struct Session {
    workspace: PathBuf,
    pylint: PylintSettings,
    grammar: Grammar,
    process: ReconcilerProcess,
    client: Client,
    aggregator: DiagnosticAggregator<Client>,
    collector: JoinHandle<PublishedDiagnostics>,
}

impl Session {
    /// Spawn the reconciler and complete the handshake.
    ///
    /// A handshake failure is logged, not returned: passes still run and
    /// print their output, only delivery is skipped.
    pub async fn start(workspace: PathBuf, settings: &Settings) -> Result<Self> {
        let grammar = grammar_for(&settings.pylint)?;
        let spec = settings.pylint.spawn_spec(None, &workspace);
        gateway::resolve_program(&spec.program, &spec.cwd)?;

        let command = reconciler_command(&settings.reconciler, &workspace)?;
        let (process, events) =
            ReconcilerProcess::spawn(&command, &settings.reconciler.args, &workspace)?;
        let collector = tokio::spawn(collect(events));

        let client = DeliveryClient::new(process.connection(), settings.delivery.delivery_config());
        let root_uri = ResourceId::from_path(&workspace)?;
        if let Err(e) = client.initialize(root_uri.as_str()).await {
            tracing::warn!("Reconciler handshake failed, delivery will be skipped: {e}");
        }

        Ok(Self {
            workspace,
            pylint: settings.pylint.clone(),
            grammar,
            process,
            aggregator: DiagnosticAggregator::new(client.clone()),
            client,
            collector,
        })
    }

    /// Run pylint once. Without a target every resource is replaced; with
    /// one, only resources at or below the target are.
    pub async fn lint(&mut self, target: Option<&Path>) -> Result<PassSummary> {
        match target {
            None => self.aggregator.clear(),
            Some(target) => {
                let target = absolute_target(target, &self.workspace);
                let target = ResourceId::from_path(&normalize_path(&target))?;
                self.aggregator.clear_uri_match(&target_pattern(&target)?);
            }
        }

        let spec = self.pylint.spawn_spec(target, &self.workspace);
        let program = gateway::resolve_program(&spec.program, &spec.cwd)?;
        let tool = ToolRun::spawn(&program, &spec)?;
        let outcome = pump(tool, &self.grammar, &self.workspace, &mut self.aggregator).await?;

        self.client.idle().await;
        self.aggregator.flush();
        tracing::info!(
            resources = self.aggregator.resource_count(),
            records = self.aggregator.record_count(),
            "Snapshots flushed"
        );

        Ok(PassSummary {
            counts: self.counts(),
            files: self.aggregator.resource_count(),
            emitted: outcome.emitted,
            tool_exit: outcome.exit_code,
            interrupted: outcome.interrupted,
        })
    }

    /// Empty every known resource on the reconciler, then ask it to drop
    /// anything else it still holds.
    pub fn clear(&mut self) {
        self.aggregator.clear();
        if let Err(e) = self.client.clear_remote(None) {
            tracing::warn!("Failed to clear reconciler: {e}");
        }
    }

    /// Totals over the aggregate state.
    #[must_use]
    pub fn counts(&self) -> SeverityCounts {
        let mut counts = SeverityCounts::default();
        for resource_id in self.aggregator.resources() {
            for record in self.aggregator.records(resource_id) {
                counts.add(record.severity());
            }
        }
        counts
    }

    #[must_use]
    pub fn status_line(&self) -> String {
        status_line(self.counts(), self.aggregator.resource_count())
    }

    /// Shut the reconciler down and return what it published last.
    pub async fn close(self) -> Result<PublishedDiagnostics> {
        self.client.idle().await;
        self.process.shutdown().await;
        self.collector
            .await
            .context("collecting published diagnostics")
    }
}

struct PumpOutcome {
    emitted: usize,
    exit_code: Option<i32>,
    interrupted: bool,
}

/// Feed the tool's output through one handler per stream until it exits.
async fn pump<S: DiagnosticSink>(
    mut tool: ToolRun,
    grammar: &Grammar,
    root: &Path,
    aggregator: &mut DiagnosticAggregator<S>,
) -> Result<PumpOutcome> {
    let mut stdout_handler = OutputHandler::new(LineClassifier::new(grammar.clone()), root);
    let mut stderr_handler = OutputHandler::new(LineClassifier::new(grammar.clone()), root);
    let mut out = io::stdout();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut kill_at: Option<Instant> = None;

    loop {
        tokio::select! {
            chunk = tool.next_chunk() => {
                let Some(chunk) = chunk else { break };
                let handler = match chunk.stream {
                    ToolStream::Stdout => &mut stdout_handler,
                    ToolStream::Stderr => &mut stderr_handler,
                };
                handler.handle(&chunk.text, &mut out, aggregator)?;
            }
            _ = &mut ctrl_c, if !interrupted => {
                tracing::info!("Interrupted, stopping pylint");
                interrupted = true;
                tool.interrupt();
                kill_at = Some(Instant::now() + KILL_GRACE);
            }
            () = tokio::time::sleep_until(kill_at.unwrap_or_else(Instant::now)), if kill_at.is_some() => {
                tracing::warn!("pylint ignored SIGINT, killing");
                tool.kill();
                kill_at = None;
            }
        }
    }

    stdout_handler.finish(&mut out, aggregator)?;
    stderr_handler.finish(&mut out, aggregator)?;

    let status = tool.wait().await.context("waiting for pylint")?;
    tracing::debug!(%status, "pylint exited");

    Ok(PumpOutcome {
        emitted: stdout_handler.emitted() + stderr_handler.emitted(),
        exit_code: status.code(),
        interrupted,
    })
}

/// Drain reconciler events until it stops. Runs concurrently so the
/// connection's reader never stalls on a full event queue.
async fn collect(mut events: mpsc::Receiver<RpcEvent>) -> PublishedDiagnostics {
    let mut published = PublishedDiagnostics::new();
    while let Some(event) = events.recv().await {
        match event {
            RpcEvent::Diagnostics(params) => published.update(params),
            RpcEvent::Stopped(reason) => {
                tracing::debug!(?reason, "Reconciler stopped");
                break;
            }
        }
    }
    published
}

#[cfg(test)]
mod tests {
    use super::*;
    use lintbridge_lsp::protocol::{LspDiagnostic, Position, PublishDiagnosticsParams, Range};

    fn diagnostic(severity: u8) -> LspDiagnostic {
        let start = Position {
            line: 0,
            character: 0,
        };
        LspDiagnostic {
            range: Range {
                start,
                end: Position {
                    line: 0,
                    character: 1,
                },
            },
            severity: Some(severity),
            code: None,
            code_description: None,
            source: None,
            message: "m".to_string(),
        }
    }

    #[test]
    fn default_grammar_without_overrides() {
        let grammar = grammar_for(&PylintSettings::default()).unwrap();
        assert!(grammar.is_start("a.py:1:0: W0611: Unused import os (unused-import)"));
    }

    #[test]
    fn partial_override_keeps_the_other_default() {
        let settings = PylintSettings {
            primary_pattern: Some(r"^(.*)\|(\d+)\|(\d+)\|([A-Z]\d+)\|(.*)$".to_string()),
            ..PylintSettings::default()
        };
        let grammar = grammar_for(&settings).unwrap();
        assert!(!grammar.is_start("a.py:1:0: W0611: Unused import os (unused-import)"));
        assert!(grammar.is_start("a.py:3: [E0602(undefined-variable), f] Undefined variable 'x'"));
    }

    #[test]
    fn invalid_override_is_an_error() {
        let settings = PylintSettings {
            alternate_pattern: Some("(".to_string()),
            ..PylintSettings::default()
        };
        let err = grammar_for(&settings).unwrap_err();
        assert!(err.to_string().contains("invalid pylint line pattern"));
    }

    #[test]
    fn default_reconciler_is_this_binary() {
        let command = reconciler_command(&ReconcilerSettings::default(), Path::new(".")).unwrap();
        assert_eq!(command, std::env::current_exe().unwrap());
    }

    #[test]
    fn relative_target_joins_workspace() {
        let workspace = std::env::temp_dir();
        assert_eq!(
            absolute_target(Path::new("pkg"), &workspace),
            workspace.join("pkg")
        );
        let absolute = workspace.join("other");
        assert_eq!(absolute_target(&absolute, &workspace), absolute);
    }

    #[tokio::test]
    async fn collect_stops_at_the_stop_event() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(RpcEvent::Diagnostics(PublishDiagnosticsParams {
            uri: "file:///w/a.py".to_string(),
            diagnostics: vec![diagnostic(1), diagnostic(2)],
        }))
        .await
        .unwrap();
        tx.send(RpcEvent::Stopped(lintbridge_lsp::StopReason::Exited))
            .await
            .unwrap();
        // Ignored: arrives after the stop.
        tx.send(RpcEvent::Diagnostics(PublishDiagnosticsParams {
            uri: "file:///w/b.py".to_string(),
            diagnostics: vec![diagnostic(3)],
        }))
        .await
        .unwrap();

        let published = collect(rx).await;
        assert_eq!(published.file_count(), 1);
        assert_eq!(published.counts().status_string(), "E:1 W:1 I:0");
    }

    #[test]
    fn target_pattern_stops_at_path_boundaries() {
        let pattern = target_pattern(&ResourceId::from_uri("file:///w/pkg")).unwrap();
        assert!(pattern.is_match("file:///w/pkg"));
        assert!(pattern.is_match("file:///w/pkg/mod.py"));
        assert!(!pattern.is_match("file:///w/pkg2/mod.py"));
        assert!(!pattern.is_match("file:///other/file:///w/pkg"));

        let file = target_pattern(&ResourceId::from_uri("file:///w/a+b.py")).unwrap();
        assert!(file.is_match("file:///w/a+b.py"));
        assert!(!file.is_match("file:///w/aab.py"));
    }

    #[test]
    fn status_line_reports_interruption() {
        let summary = PassSummary {
            counts: SeverityCounts::default(),
            files: 0,
            emitted: 0,
            tool_exit: None,
            interrupted: true,
        };
        assert_eq!(summary.status_line(), "E:0 W:0 I:0 in 0 files (interrupted)");
        assert_eq!(summary.exit_code(), ExitCode::from(INTERRUPTED_EXIT));

        let one = PassSummary {
            counts: SeverityCounts {
                errors: 1,
                warnings: 0,
                infos: 0,
            },
            files: 1,
            interrupted: false,
            ..summary
        };
        assert_eq!(one.status_line(), "E:1 W:0 I:0 in 1 file");
        assert_eq!(one.exit_code(), ExitCode::SUCCESS);
    }
}
