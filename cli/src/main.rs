//! lintbridge CLI - runs pylint and delivers its diagnostics to a reconciler.
//!
//! # Commands
//!
//! ```text
//! lintbridge run [TARGET]   pylint -> aggregator -> delivery client -> reconciler child
//! lintbridge session        repeated runs and clears against one reconciler
//! lintbridge serve          reconciler on stdin/stdout (spawned by the others)
//! ```
//!
//! `run` passes pylint's output through to stdout, with each recognized
//! diagnostic replaced by one `__PYLINT_ISSUE__ {json}` line, and prints a
//! severity summary to stderr when done.

mod gateway;
mod run;
mod session;

use std::{
    env,
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Mutex,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use lintbridge_config::Settings;
use lintbridge_lsp::ReconcilerServer;

use crate::run::RunOptions;

const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Parser)]
#[command(name = "lintbridge", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Lint the workspace (or one file or directory) and deliver diagnostics.
    Run {
        /// File or directory to lint, relative to the workspace.
        target: Option<PathBuf>,
        /// Workspace root. Defaults to the current directory.
        #[arg(long)]
        workspace: Option<PathBuf>,
        /// Config file to use instead of the usual lookup.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Read `run [TARGET]`, `clear`, `status` and `quit` commands from stdin,
    /// keeping diagnostics across runs.
    Session {
        /// Workspace root. Defaults to the current directory.
        #[arg(long)]
        workspace: Option<PathBuf>,
        /// Config file to use instead of the usual lookup.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Serve the diagnostic reconciler over stdin/stdout.
    Serve {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("lintbridge: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Run {
            target,
            workspace,
            config,
        } => {
            let workspace = resolve_workspace(workspace)?;
            let settings = Settings::load(&workspace, config.as_deref())?;
            init_tracing(settings.log_file.as_deref());

            let summary = run::run(RunOptions { target, workspace }, &settings).await?;
            tracing::info!(
                emitted = summary.emitted,
                tool_exit = ?summary.tool_exit,
                "Run finished"
            );
            eprintln!("{}", summary.status_line());
            Ok(summary.exit_code())
        }
        Command::Session { workspace, config } => {
            let workspace = resolve_workspace(workspace)?;
            let settings = Settings::load(&workspace, config.as_deref())?;
            init_tracing(settings.log_file.as_deref());

            let active = run::Session::start(workspace, &settings).await?;
            session::serve_commands(active).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Serve { config } => {
            let cwd = env::current_dir().context("reading current directory")?;
            let settings = Settings::load(&cwd, config.as_deref())?;
            init_tracing(settings.log_file.as_deref());

            let mut server = ReconcilerServer::new(tokio::io::stdin(), tokio::io::stdout());
            server.run().await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn resolve_workspace(workspace: Option<PathBuf>) -> Result<PathBuf> {
    let workspace = match workspace {
        Some(path) => path,
        None => env::current_dir().context("reading current directory")?,
    };
    workspace
        .canonicalize()
        .with_context(|| format!("workspace {} is not accessible", workspace.display()))
}

fn init_tracing(log_file: Option<&Path>) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let mut init_warning = None;
    if let Some(path) = log_file {
        match open_log_file(path) {
            Ok(file) => {
                tracing_subscriber::registry()
                    .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                    .with(env_filter)
                    .init();
                tracing::info!(path = %path.display(), "Logging initialized");
                return;
            }
            Err(e) => {
                init_warning = Some(format!(
                    "Failed to open log file {}: {e}; logging to stderr",
                    path.display()
                ));
            }
        }
    }

    // stdout carries the tool trace, so logs never go there.
    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(false).with_writer(io::stderr))
        .with(env_filter)
        .init();
    if let Some(warning) = init_warning {
        tracing::warn!("{warning}");
    }
}

fn open_log_file(path: &Path) -> io::Result<fs::File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_accepts_target_and_flags() {
        let cli = Cli::try_parse_from([
            "lintbridge",
            "run",
            "pkg/mod.py",
            "--workspace",
            "/w",
            "--config",
            "/w/lb.toml",
        ])
        .unwrap();
        match cli.command {
            Command::Run {
                target,
                workspace,
                config,
            } => {
                assert_eq!(target, Some(PathBuf::from("pkg/mod.py")));
                assert_eq!(workspace, Some(PathBuf::from("/w")));
                assert_eq!(config, Some(PathBuf::from("/w/lb.toml")));
            }
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn run_target_is_optional() {
        let cli = Cli::try_parse_from(["lintbridge", "run"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Run {
                target: None,
                workspace: None,
                config: None
            }
        ));
    }

    #[test]
    fn serve_takes_no_target() {
        assert!(Cli::try_parse_from(["lintbridge", "serve", "x.py"]).is_err());
        assert!(Cli::try_parse_from(["lintbridge", "serve"]).is_ok());
    }

    #[test]
    fn session_takes_workspace_but_no_target() {
        let cli = Cli::try_parse_from(["lintbridge", "session", "--workspace", "/w"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Session {
                workspace: Some(_),
                config: None
            }
        ));
        assert!(Cli::try_parse_from(["lintbridge", "session", "x.py"]).is_err());
    }

    #[test]
    fn missing_workspace_is_reported() {
        let dir = std::env::temp_dir().join("lintbridge-no-such-workspace");
        let err = resolve_workspace(Some(dir)).unwrap_err();
        assert!(err.to_string().contains("lintbridge-no-such-workspace"));
    }

    #[test]
    fn log_file_parent_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("lintbridge.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }
}
