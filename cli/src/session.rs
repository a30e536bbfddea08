//! `lintbridge session`: line commands on stdin against one long-lived
//! reconciler.
//!
//! ```text
//! run            lint the whole workspace, replacing every resource
//! run <target>   lint one file or directory, replacing only what is under it
//! clear          empty every resource on the reconciler
//! status         print the current totals
//! quit           shut down (also on EOF or Ctrl-C at the prompt)
//! ```

use std::io::BufRead;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::run::Session;

const COMMAND_QUEUE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Run(Option<PathBuf>),
    Clear,
    Status,
    Quit,
}

impl FromStr for SessionCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        match (word, rest.is_empty()) {
            ("run", true) => Ok(Self::Run(None)),
            ("run", false) => Ok(Self::Run(Some(PathBuf::from(rest)))),
            ("clear", true) => Ok(Self::Clear),
            ("status", true) => Ok(Self::Status),
            ("quit" | "exit", true) => Ok(Self::Quit),
            ("clear" | "status" | "quit" | "exit", false) => {
                Err(format!("`{word}` takes no arguments"))
            }
            _ => Err(format!("unknown command `{word}`")),
        }
    }
}

/// Read stdin on a plain thread; a pending read must not hold up runtime
/// shutdown.
fn spawn_line_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

pub async fn serve_commands(mut session: Session) -> Result<()> {
    let mut lines = spawn_line_reader();
    eprintln!("{}", session.status_line());

    loop {
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<SessionCommand>() {
            Ok(SessionCommand::Run(target)) => match session.lint(target.as_deref()).await {
                Ok(summary) => eprintln!("{}", summary.status_line()),
                Err(e) => eprintln!("lintbridge: {e:#}"),
            },
            Ok(SessionCommand::Clear) => {
                session.clear();
                eprintln!("{}", session.status_line());
            }
            Ok(SessionCommand::Status) => eprintln!("{}", session.status_line()),
            Ok(SessionCommand::Quit) => break,
            Err(e) => eprintln!("lintbridge: {e}"),
        }
    }

    let published = session.close().await?;
    tracing::info!(files = published.file_count(), "Session closed");
    Ok(())
}
