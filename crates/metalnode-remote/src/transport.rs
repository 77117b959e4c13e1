//! Transport sessions: one authenticated connection to one host.
//!
//! The [`Transport`] and [`Session`] traits expose the raw primitives a
//! connection offers (exec, write, stat, remove). The free functions
//! [`open`], [`execute`] and [`upload`] build the guarantees on top of them,
//! so every transport validates hosts, streams output line by line and
//! verifies uploads the same way.

use std::net::SocketAddr;

use async_trait::async_trait;
use metalnode_core::{Diagnostic, FileTransfer, Host};
use tracing::{debug, error, info, warn};

use crate::error::{RemoteError, Result};

/// Opens sessions to hosts.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The session type produced by this transport.
    type Session: Session + 'static;

    /// Connect and authenticate to an already validated host.
    ///
    /// # Errors
    ///
    /// Returns `Connect`, `Auth` or `InvalidKey` errors.
    async fn connect(&self, host: &Host, addr: SocketAddr) -> Result<Self::Session>;
}

/// One live connection to a host.
#[async_trait]
pub trait Session: Send {
    /// Run `command`, feeding output into `output` as it arrives.
    ///
    /// Returns the exit status reported by the server, if any.
    ///
    /// # Errors
    ///
    /// Returns `Channel` if the transport fails mid-command.
    async fn exec(&mut self, command: &str, output: &mut CommandOutput<'_>) -> Result<Option<u32>>;

    /// Create or truncate `path` and write `contents` to it.
    ///
    /// # Errors
    ///
    /// Returns `Sftp` if the remote file cannot be written.
    async fn write_file(&mut self, path: &str, contents: &[u8]) -> Result<()>;

    /// Size in bytes of the remote file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `Sftp` if the file cannot be stat'ed.
    async fn file_size(&mut self, path: &str) -> Result<u64>;

    /// Delete the remote file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `Sftp` if the file cannot be removed.
    async fn remove_file(&mut self, path: &str) -> Result<()>;

    /// Release the connection. Calling this more than once is a no-op.
    async fn close(&mut self);
}

/// Validate `host` and open a session to it.
///
/// # Errors
///
/// Returns `Config` without touching the network if the host is malformed,
/// otherwise whatever [`Transport::connect`] returns.
pub async fn open<T: Transport + ?Sized>(transport: &T, host: &Host) -> Result<T::Session> {
    let addr = host.validate().inspect_err(|e| {
        error!(host = %host.address, error = %e, "host validation failed");
    })?;
    debug!(host = %host.address, user = %host.user, "opening session");
    transport.connect(host, addr).await
}

/// Run one command, appending its stderr lines to `diagnostic`.
///
/// Empty commands are skipped. Output captured before a failure is kept. When
/// a command exits non-zero without writing any stderr, a line naming the
/// command and its status is recorded instead.
///
/// # Errors
///
/// Returns `NonZeroExit`, the session's `Channel` error, or `Channel` if the
/// channel closed before the server reported an exit status.
pub async fn execute<S: Session + ?Sized>(
    session: &mut S,
    command: &str,
    diagnostic: &mut Diagnostic,
) -> Result<()> {
    if command.is_empty() {
        return Ok(());
    }

    let captured_before = diagnostic.len();
    let mut output = CommandOutput::new(command, diagnostic);
    let status = session.exec(command, &mut output).await;
    output.finish();

    match status? {
        Some(0) => Ok(()),
        None => Err(RemoteError::Channel {
            command: command.to_string(),
            message: "channel closed without exit status".to_string(),
        }),
        Some(status) => {
            if diagnostic.len() == captured_before {
                diagnostic.push(format!("command `{command}` exited with status {status}"));
            }
            Err(RemoteError::NonZeroExit {
                command: command.to_string(),
                status,
            })
        }
    }
}

/// Copy a local file into a remote directory and verify its size.
///
/// On a size mismatch the remote file is removed and `LostData` is returned,
/// even if the removal itself fails.
///
/// # Errors
///
/// Returns `LocalFile`, `InvalidTransfer`, `Sftp` or `LostData`.
pub async fn upload<S: Session + ?Sized>(session: &mut S, transfer: &FileTransfer) -> Result<()> {
    let local = transfer.source().display().to_string();
    let remote = transfer
        .remote_path()
        .ok_or_else(|| RemoteError::InvalidTransfer(local.clone()))?;

    let contents = tokio::fs::read(transfer.source())
        .await
        .map_err(|source| RemoteError::LocalFile {
            path: local.clone(),
            source,
        })?;
    let expected = contents.len() as u64;

    if let Err(e) = session.write_file(&remote, &contents).await {
        error!(local = %local, remote = %remote, error = %e, "failed to write remote file");
        if let Err(cleanup) = session.remove_file(&remote).await {
            debug!(remote = %remote, error = %cleanup, "no partial file to remove");
        }
        return Err(e);
    }

    let actual = session.file_size(&remote).await?;
    if actual != expected {
        error!(remote = %remote, expected, actual, "lost data when uploading file");
        if let Err(e) = session.remove_file(&remote).await {
            error!(remote = %remote, error = %e, "failed to remove damaged file");
        }
        return Err(RemoteError::LostData {
            path: remote,
            expected,
            actual,
        });
    }

    info!(local = %local, remote = %remote, bytes = expected, "file uploaded");
    Ok(())
}

/// Sink for the output of one running command.
///
/// Stdout lines are logged. Stderr lines are logged and appended to the
/// diagnostic in arrival order; blank stderr lines are dropped.
pub struct CommandOutput<'a> {
    command: &'a str,
    diagnostic: &'a mut Diagnostic,
    stdout: LineBuffer,
    stderr: LineBuffer,
}

impl<'a> CommandOutput<'a> {
    /// Create a sink that appends stderr to `diagnostic`.
    pub fn new(command: &'a str, diagnostic: &'a mut Diagnostic) -> Self {
        Self {
            command,
            diagnostic,
            stdout: LineBuffer::default(),
            stderr: LineBuffer::default(),
        }
    }

    /// Feed a chunk of stdout.
    pub fn stdout(&mut self, chunk: &[u8]) {
        for line in self.stdout.push(chunk) {
            self.stdout_line(&line);
        }
    }

    /// Feed a chunk of stderr.
    pub fn stderr(&mut self, chunk: &[u8]) {
        for line in self.stderr.push(chunk) {
            self.stderr_line(line);
        }
    }

    /// Flush any unterminated trailing lines.
    pub fn finish(mut self) {
        if let Some(line) = self.stdout.flush() {
            self.stdout_line(&line);
        }
        if let Some(line) = self.stderr.flush() {
            self.stderr_line(line);
        }
    }

    fn stdout_line(&self, line: &str) {
        debug!(command = %self.command, "{line}");
    }

    fn stderr_line(&mut self, line: String) {
        if line.is_empty() {
            return;
        }
        warn!(command = %self.command, "{line}");
        self.diagnostic.push(line);
    }
}

/// Splits a byte stream into lines.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode(&raw[..pos]));
        }
        lines
    }

    fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(decode(&raw))
    }
}

fn decode(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
