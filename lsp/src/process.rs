//! Reconciler child process: spawns the consumer and owns its lifecycle.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::protocol::{METHOD_EXIT, METHOD_SHUTDOWN};
use crate::transport::{RpcConnection, RpcEvent};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// A running reconciler speaking JSON-RPC over its stdin/stdout.
pub struct ReconcilerProcess {
    child: Child,
    connection: Arc<RpcConnection>,
}

impl ReconcilerProcess {
    /// Spawn `command args…` in `cwd`. The command must already be resolved.
    pub fn spawn(
        command: &Path,
        args: &[String],
        cwd: &Path,
    ) -> Result<(Self, mpsc::Receiver<RpcEvent>)> {
        let mut child = Command::new(command)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", command.display()))?;

        let stdout = child.stdout.take().context("no stdout from reconciler")?;
        let stdin = child.stdin.take().context("no stdin from reconciler")?;
        let (connection, events) = RpcConnection::new(stdout, stdin);
        tracing::info!(pid = child.id(), "Reconciler started");

        Ok((
            Self {
                child,
                connection: Arc::new(connection),
            },
            events,
        ))
    }

    #[must_use]
    pub fn connection(&self) -> Arc<RpcConnection> {
        Arc::clone(&self.connection)
    }

    /// `shutdown` then `exit`; kill the child if it lingers.
    pub async fn shutdown(mut self) {
        match self.connection.call(METHOD_SHUTDOWN, None).await {
            Ok(response) if response.get("error").is_none() => {
                if let Err(e) = self.connection.send_notification(METHOD_EXIT, None) {
                    tracing::debug!("Failed to send exit: {e}");
                }
            }
            Ok(_) => tracing::debug!("Reconciler rejected shutdown"),
            Err(e) => tracing::debug!("Shutdown request failed: {e}"),
        }
        self.connection.close().await;

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(%status, "Reconciler exited"),
            Ok(Err(e)) => tracing::warn!("Waiting for reconciler failed: {e}"),
            Err(_) => {
                tracing::debug!("Reconciler didn't exit in time, killing");
                let _ = self.child.kill().await;
            }
        }
    }
}
