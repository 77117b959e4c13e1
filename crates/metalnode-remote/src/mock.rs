//! An in-memory transport for testing without real hosts.
//!
//! Every host is reachable and every command succeeds silently unless a
//! behaviour is scripted for it. Uploaded files, executed commands and
//! session open/close counts are recorded per host address.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metalnode_core::Host;
use parking_lot::Mutex;

use crate::error::{RemoteError, Result};
use crate::transport::{CommandOutput, Session, Transport};

/// Scripted behaviour of one command.
#[derive(Debug, Clone, Default)]
pub struct MockCommand {
    stdout: Vec<String>,
    stderr: Vec<String>,
    exit_status: u32,
    delay: Option<Duration>,
    hang: bool,
    panic: bool,
    channel_error: bool,
}

impl MockCommand {
    /// A command that exits 0 with no output.
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    /// A command that exits with `status` and no output.
    #[must_use]
    pub fn exit(status: u32) -> Self {
        Self {
            exit_status: status,
            ..Self::default()
        }
    }

    /// A command whose exec channel breaks.
    #[must_use]
    pub fn channel_error() -> Self {
        Self {
            channel_error: true,
            ..Self::default()
        }
    }

    /// A command that panics inside the session.
    #[must_use]
    pub fn panics() -> Self {
        Self {
            panic: true,
            ..Self::default()
        }
    }

    /// A command that never finishes.
    #[must_use]
    pub fn hangs() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    /// Set the stdout lines.
    #[must_use]
    pub fn with_stdout<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stdout = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Set the stderr lines.
    #[must_use]
    pub fn with_stderr<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stderr = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Sleep before producing output.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug, Clone, Default)]
struct MockHost {
    commands: HashMap<String, MockCommand>,
    refuse: bool,
    reject_auth: bool,
    truncate_uploads: bool,
}

#[derive(Debug, Default)]
struct Recorded {
    files: HashMap<(String, String), Vec<u8>>,
    executed: HashMap<String, Vec<String>>,
    opened: HashMap<String, usize>,
    closed: HashMap<String, usize>,
    active: usize,
    peak_active: usize,
}

/// A transport that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MockTransport {
    hosts: Mutex<HashMap<String, MockHost>>,
    recorded: Arc<Mutex<Recorded>>,
}

impl MockTransport {
    /// Create a new mock transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_host(&self, address: &str, f: impl FnOnce(&mut MockHost)) {
        f(self.hosts.lock().entry(address.to_string()).or_default());
    }

    /// Script the behaviour of `command` on `address`.
    pub fn script(&self, address: &str, command: &str, behaviour: MockCommand) {
        self.with_host(address, |h| {
            h.commands.insert(command.to_string(), behaviour);
        });
    }

    /// Make connections to `address` fail.
    pub fn refuse_connections(&self, address: &str) {
        self.with_host(address, |h| h.refuse = true);
    }

    /// Make authentication on `address` fail.
    pub fn reject_auth(&self, address: &str) {
        self.with_host(address, |h| h.reject_auth = true);
    }

    /// Make uploads to `address` store only half of the data.
    pub fn truncate_uploads(&self, address: &str) {
        self.with_host(address, |h| h.truncate_uploads = true);
    }

    /// Contents of a remote file, if present.
    #[must_use]
    pub fn remote_file(&self, address: &str, path: &str) -> Option<Vec<u8>> {
        self.recorded
            .lock()
            .files
            .get(&(address.to_string(), path.to_string()))
            .cloned()
    }

    /// Commands executed on `address`, in order.
    #[must_use]
    pub fn executed(&self, address: &str) -> Vec<String> {
        self.recorded
            .lock()
            .executed
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of sessions opened to `address`.
    #[must_use]
    pub fn open_count(&self, address: &str) -> usize {
        self.recorded.lock().opened.get(address).copied().unwrap_or(0)
    }

    /// Number of sessions to `address` that were closed.
    #[must_use]
    pub fn close_count(&self, address: &str) -> usize {
        self.recorded.lock().closed.get(address).copied().unwrap_or(0)
    }

    /// Number of sessions opened across all hosts.
    #[must_use]
    pub fn total_opens(&self) -> usize {
        self.recorded.lock().opened.values().sum()
    }

    /// Highest number of sessions that were open at the same time.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.recorded.lock().peak_active
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Session = MockSession;

    async fn connect(&self, host: &Host, _addr: SocketAddr) -> Result<MockSession> {
        let behaviour = self
            .hosts
            .lock()
            .get(&host.address)
            .cloned()
            .unwrap_or_default();

        if behaviour.refuse {
            return Err(RemoteError::Connect {
                address: host.address.clone(),
                message: "connection refused".to_string(),
            });
        }
        if behaviour.reject_auth {
            return Err(RemoteError::Auth {
                user: host.user.clone(),
                address: host.address.clone(),
            });
        }

        {
            let mut recorded = self.recorded.lock();
            *recorded.opened.entry(host.address.clone()).or_default() += 1;
            recorded.active += 1;
            recorded.peak_active = recorded.peak_active.max(recorded.active);
        }

        Ok(MockSession {
            address: host.address.clone(),
            behaviour,
            recorded: Arc::clone(&self.recorded),
            open: true,
        })
    }
}

/// A session produced by [`MockTransport`].
#[derive(Debug)]
pub struct MockSession {
    address: String,
    behaviour: MockHost,
    recorded: Arc<Mutex<Recorded>>,
    open: bool,
}

impl MockSession {
    fn key(&self, path: &str) -> (String, String) {
        (self.address.clone(), path.to_string())
    }

    fn no_such_file(path: &str) -> RemoteError {
        RemoteError::Sftp {
            path: path.to_string(),
            message: "no such file".to_string(),
        }
    }
}

#[async_trait]
impl Session for MockSession {
    async fn exec(&mut self, command: &str, output: &mut CommandOutput<'_>) -> Result<Option<u32>> {
        if !self.open {
            return Err(RemoteError::SessionClosed(self.address.clone()));
        }
        self.recorded
            .lock()
            .executed
            .entry(self.address.clone())
            .or_default()
            .push(command.to_string());

        let script = self
            .behaviour
            .commands
            .get(command)
            .cloned()
            .unwrap_or_default();

        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }
        if script.hang {
            std::future::pending::<()>().await;
        }
        assert!(!script.panic, "scripted panic in `{command}`");
        if script.channel_error {
            return Err(RemoteError::Channel {
                command: command.to_string(),
                message: "channel closed unexpectedly".to_string(),
            });
        }

        for line in &script.stdout {
            output.stdout(format!("{line}\n").as_bytes());
        }

        // Deliver stderr split mid-line to exercise line reassembly.
        let stderr: String = script.stderr.iter().map(|l| format!("{l}\n")).collect();
        let (head, tail) = stderr.as_bytes().split_at(stderr.len() / 2);
        output.stderr(head);
        output.stderr(tail);

        Ok(Some(script.exit_status))
    }

    async fn write_file(&mut self, path: &str, contents: &[u8]) -> Result<()> {
        let stored = if self.behaviour.truncate_uploads {
            contents[..contents.len() / 2].to_vec()
        } else {
            contents.to_vec()
        };
        let key = self.key(path);
        self.recorded.lock().files.insert(key, stored);
        Ok(())
    }

    async fn file_size(&mut self, path: &str) -> Result<u64> {
        let key = self.key(path);
        self.recorded
            .lock()
            .files
            .get(&key)
            .map(|data| data.len() as u64)
            .ok_or_else(|| Self::no_such_file(path))
    }

    async fn remove_file(&mut self, path: &str) -> Result<()> {
        let key = self.key(path);
        self.recorded
            .lock()
            .files
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| Self::no_such_file(path))
    }

    async fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        let mut recorded = self.recorded.lock();
        *recorded.closed.entry(self.address.clone()).or_default() += 1;
        recorded.active -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metalnode_core::Diagnostic;

    fn host() -> Host {
        Host::with_password("root", "10.0.0.9", 22, "pw")
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let transport = MockTransport::new();
        let h = host();
        let mut session = transport.connect(&h, h.validate().unwrap()).await.unwrap();
        session.close().await;
        session.close().await;

        assert_eq!(transport.open_count("10.0.0.9"), 1);
        assert_eq!(transport.close_count("10.0.0.9"), 1);
    }

    #[tokio::test]
    async fn scripted_output_reaches_diagnostic() {
        let transport = MockTransport::new();
        transport.script(
            "10.0.0.9",
            "kubectl version",
            MockCommand::exit(1).with_stderr(["refused"]),
        );
        let h = host();
        let mut session = transport.connect(&h, h.validate().unwrap()).await.unwrap();

        let mut diagnostic = Diagnostic::new();
        let mut output = CommandOutput::new("kubectl version", &mut diagnostic);
        let status = session.exec("kubectl version", &mut output).await.unwrap();
        output.finish();

        assert_eq!(status, Some(1));
        assert_eq!(diagnostic.lines(), ["refused"]);
    }

    #[tokio::test]
    async fn rejected_auth() {
        let transport = MockTransport::new();
        transport.reject_auth("10.0.0.9");
        let h = host();
        let err = transport
            .connect(&h, h.validate().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Auth { .. }));
    }
}
