//! Tool gateway: spawns pylint and streams its output as text chunks.
//!
//! stdout and stderr are read on separate tasks and arrive on one channel,
//! tagged with their origin so each stream keeps its own line state.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use lintbridge_config::SpawnSpec;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

const READ_BUF_BYTES: usize = 8192;
const CHUNK_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("cannot find `{program}`: {source}")]
    NotFound {
        program: String,
        source: which::Error,
    },
    #[error("failed to spawn {}: {source}", program.display())]
    Spawn { program: PathBuf, source: io::Error },
    #[error("{0} pipe was not captured")]
    MissingPipe(ToolStream),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for ToolStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ToolStream::Stdout => "stdout",
            ToolStream::Stderr => "stderr",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolChunk {
    pub stream: ToolStream,
    pub text: String,
}

/// Look `program` up on PATH; relative paths resolve against `cwd`.
pub fn resolve_program(program: &str, cwd: &Path) -> Result<PathBuf, GatewayError> {
    which::which_in(program, std::env::var_os("PATH"), cwd).map_err(|source| {
        GatewayError::NotFound {
            program: program.to_string(),
            source,
        }
    })
}

/// Kills the child (and its process group on Unix) on drop unless disarmed.
struct ChildGuard {
    child: Child,
    armed: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self { child, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                unsafe {
                    if libc::killpg(pid as i32, libc::SIGKILL) == -1 {
                        let _ = self.child.start_kill();
                    }
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }
        let _ = self.child.try_wait();
    }
}

#[cfg(unix)]
fn set_new_session(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    unsafe {
        cmd.as_std_mut().pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            // Linux-only: the tool dies with us even on SIGKILL.
            #[cfg(target_os = "linux")]
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// One running tool invocation.
pub struct ToolRun {
    guard: ChildGuard,
    chunks: mpsc::Receiver<ToolChunk>,
}

impl ToolRun {
    /// Spawn the already-resolved `program` with the arguments and working
    /// directory from `spec`.
    pub fn spawn(program: &Path, spec: &SpawnSpec) -> Result<Self, GatewayError> {
        let mut command = Command::new(program);
        command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        set_new_session(&mut command);

        let child = command.spawn().map_err(|source| GatewayError::Spawn {
            program: program.to_path_buf(),
            source,
        })?;
        let mut guard = ChildGuard::new(child);
        tracing::debug!(pid = guard.child.id(), program = %program.display(), args = ?spec.args, "Tool started");

        let stdout = guard
            .child
            .stdout
            .take()
            .ok_or(GatewayError::MissingPipe(ToolStream::Stdout))?;
        let stderr = guard
            .child
            .stderr
            .take()
            .ok_or(GatewayError::MissingPipe(ToolStream::Stderr))?;

        let (tx, chunks) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        tokio::spawn(read_stream(stdout, ToolStream::Stdout, tx.clone()));
        tokio::spawn(read_stream(stderr, ToolStream::Stderr, tx));

        Ok(Self { guard, chunks })
    }

    /// Next chunk from either stream; `None` once both have closed.
    pub async fn next_chunk(&mut self) -> Option<ToolChunk> {
        self.chunks.recv().await
    }

    /// Ask the tool to stop (SIGINT to its process group on Unix).
    pub fn interrupt(&mut self) {
        #[cfg(unix)]
        {
            if let Some(pid) = self.guard.child.id() {
                unsafe {
                    if libc::killpg(pid as i32, libc::SIGINT) == -1 {
                        libc::kill(pid as i32, libc::SIGINT);
                    }
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.guard.child.start_kill();
        }
    }

    /// Force-stop the tool.
    pub fn kill(&mut self) {
        #[cfg(unix)]
        {
            if let Some(pid) = self.guard.child.id() {
                unsafe {
                    if libc::killpg(pid as i32, libc::SIGKILL) == 0 {
                        return;
                    }
                }
            }
        }
        if let Err(e) = self.guard.child.start_kill() {
            tracing::debug!("Failed to kill tool: {e}");
        }
    }

    pub async fn wait(mut self) -> io::Result<ExitStatus> {
        let status = self.guard.child.wait().await?;
        self.guard.disarm();
        Ok(status)
    }
}

async fn read_stream<R: AsyncRead + Unpin>(
    mut reader: R,
    stream: ToolStream,
    tx: mpsc::Sender<ToolChunk>,
) {
    let mut buf = vec![0u8; READ_BUF_BYTES];
    let mut decoder = Utf8Chunker::default();
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(%stream, "Read failed: {e}");
                break;
            }
        };
        let text = decoder.push(&buf[..n]);
        if !text.is_empty() && tx.send(ToolChunk { stream, text }).await.is_err() {
            return;
        }
    }
    let text = decoder.finish();
    if !text.is_empty() {
        let _ = tx.send(ToolChunk { stream, text }).await;
    }
}

/// Lossy UTF-8 decoding that holds back a code point split across reads.
#[derive(Debug, Default)]
struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
