//! Command batches: files to push followed by commands to run.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A local file to copy into a remote directory.
///
/// The remote file keeps the base name of the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransfer {
    /// Local source path.
    pub src: PathBuf,
    /// Remote destination directory.
    pub dst: String,
}

impl FileTransfer {
    /// Create a transfer of `src` into the remote directory `dst`.
    #[must_use]
    pub fn new(src: impl Into<PathBuf>, dst: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
        }
    }

    /// The base name of the source, or `None` if the path has no file name.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.src.file_name().and_then(|name| name.to_str())
    }

    /// Full remote path of the uploaded file.
    #[must_use]
    pub fn remote_path(&self) -> Option<String> {
        let name = self.file_name()?;
        let dir = self.dst.trim_end_matches('/');
        Some(format!("{dir}/{name}"))
    }

    /// The local source path.
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.src
    }
}

/// An ordered unit of work for one host.
///
/// Every file transfer completes before the first command runs, and commands
/// run strictly one after another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBatch {
    /// Shell commands, in execution order.
    #[serde(default, rename = "cmds")]
    pub commands: Vec<String>,
    /// Files uploaded before any command runs.
    #[serde(default, rename = "fileUp")]
    pub uploads: Vec<FileTransfer>,
}

impl CommandBatch {
    /// An empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command.
    #[must_use]
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.commands.push(command.into());
        self
    }

    /// Append a file transfer.
    #[must_use]
    pub fn upload(mut self, src: impl Into<PathBuf>, dst: impl Into<String>) -> Self {
        self.uploads.push(FileTransfer::new(src, dst));
        self
    }

    /// True when the batch neither uploads nor runs anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty() && self.commands.iter().all(String::is_empty)
    }
}

impl fmt::Display for CommandBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.commands.join(" && "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_path_uses_base_name() {
        let t = FileTransfer::new("script/init_k8s_env.sh", "/tmp/");
        assert_eq!(t.remote_path().as_deref(), Some("/tmp/init_k8s_env.sh"));

        let t = FileTransfer::new("/opt/setup.sh", "/tmp");
        assert_eq!(t.remote_path().as_deref(), Some("/tmp/setup.sh"));
    }

    #[test]
    fn remote_path_without_file_name() {
        let t = FileTransfer::new("/", "/tmp");
        assert!(t.remote_path().is_none());
    }

    #[test]
    fn display_joins_commands() {
        let batch = CommandBatch::new()
            .command("chmod +x /tmp/setup.sh")
            .command("/tmp/setup.sh");
        assert_eq!(batch.to_string(), "chmod +x /tmp/setup.sh && /tmp/setup.sh");
    }

    #[test]
    fn empty_batch() {
        assert!(CommandBatch::new().is_empty());
        assert!(CommandBatch::new().command("").is_empty());
        assert!(!CommandBatch::new().upload("a.sh", "/tmp").is_empty());
    }

    #[test]
    fn serde_field_names() {
        let batch: CommandBatch = serde_json::from_str(
            r#"{"cmds":["sudo /tmp/a.sh"],"fileUp":[{"src":"a.sh","dst":"/tmp"}]}"#,
        )
        .unwrap();
        assert_eq!(batch.commands, vec!["sudo /tmp/a.sh"]);
        assert_eq!(batch.uploads[0].dst, "/tmp");
    }
}
