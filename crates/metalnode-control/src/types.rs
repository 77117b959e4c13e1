//! Node records and lifecycle configuration.

use chrono::{DateTime, Utc};
use metalnode_core::{CommandBatch, Host};
use serde::{Deserialize, Serialize};

/// Path of the provisioning script uploaded by the default batch.
pub const DEFAULT_INIT_SCRIPT: &str = "script/init_k8s_env.sh";

/// Provisioning phase of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Never observed, or reset.
    #[default]
    Unknown,
    /// The provisioning batch is running.
    Initializing,
    /// The verification batch is running.
    Checking,
    /// Verified; the node can join a cluster.
    Ready,
    /// Verification found a problem. Terminal until reset.
    Failed,
}

/// Desired configuration of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// How to reach the node.
    pub host: Host,
    /// Replaces the default provisioning batch for this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialization_batch: Option<CommandBatch>,
}

/// Observed state of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Current lifecycle state.
    #[serde(default)]
    pub state: LifecycleState,
    /// Set when the node reaches `Ready`.
    #[serde(default)]
    pub ready: bool,
    /// Stderr captured while provisioning. Often benign; kept for diagnosis.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub initialization_failure_reasons: Vec<String>,
    /// Problems found by verification.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub check_failure_reasons: Vec<String>,
    /// Time of the last state change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A node tracked by the lifecycle machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Unique node name.
    pub name: String,
    /// Desired configuration.
    pub spec: NodeSpec,
    /// Observed state.
    #[serde(default)]
    pub status: NodeStatus,
}

impl NodeRecord {
    /// Create a record for a newly registered host.
    #[must_use]
    pub fn new(name: impl Into<String>, host: Host) -> Self {
        Self {
            name: name.into(),
            spec: NodeSpec {
                host,
                initialization_batch: None,
            },
            status: NodeStatus::default(),
        }
    }

    /// Replace the default provisioning batch for this node.
    #[must_use]
    pub fn with_initialization_batch(mut self, batch: CommandBatch) -> Self {
        self.spec.initialization_batch = Some(batch);
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.status.state
    }

    /// Return the node to `Unknown` so it is provisioned again.
    ///
    /// Failure histories are kept.
    pub fn reset(&mut self) {
        self.status.state = LifecycleState::Unknown;
        self.status.ready = false;
        self.status.updated_at = Some(Utc::now());
    }
}

/// Batches run by the lifecycle machine.
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// Batch run on entry to `Initializing`, unless the node overrides it.
    #[serde(default = "LifecycleConfig::default_provisioning_batch")]
    pub provisioning_batch: CommandBatch,

    /// Batch run on entry to `Checking`.
    #[serde(default = "LifecycleConfig::default_verification_batch")]
    pub verification_batch: CommandBatch,
}

impl LifecycleConfig {
    fn default_provisioning_batch() -> CommandBatch {
        CommandBatch::new()
            .upload(DEFAULT_INIT_SCRIPT, "/tmp")
            .command("sudo chmod +x /tmp/init_k8s_env.sh")
            .command("sudo /tmp/init_k8s_env.sh")
    }

    fn default_verification_batch() -> CommandBatch {
        CommandBatch::new()
            .command("sudo docker version")
            .command("kubelet --version")
            .command("kubectl version")
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            provisioning_batch: Self::default_provisioning_batch(),
            verification_batch: Self::default_verification_batch(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> NodeRecord {
        NodeRecord::new("node-1", Host::with_password("root", "10.0.0.5", 22, "pw"))
    }

    #[test]
    fn new_record_is_unknown() {
        let r = record();
        assert_eq!(r.state(), LifecycleState::Unknown);
        assert!(!r.status.ready);
        assert!(r.spec.initialization_batch.is_none());
    }

    #[test]
    fn reset_keeps_histories() {
        let mut r = record();
        r.status.state = LifecycleState::Failed;
        r.status.check_failure_reasons.push("docker: not found".into());
        r.reset();

        assert_eq!(r.state(), LifecycleState::Unknown);
        assert_eq!(r.status.check_failure_reasons, vec!["docker: not found"]);
    }

    #[test]
    fn state_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&LifecycleState::Initializing).unwrap(),
            r#""INITIALIZING""#
        );
    }

    #[test]
    fn record_deserializes_without_status() {
        let r: NodeRecord = serde_json::from_str(
            r#"{"name":"node-1","spec":{"host":{"user":"root","address":"10.0.0.5","password":"pw"}}}"#,
        )
        .unwrap();
        assert_eq!(r.state(), LifecycleState::Unknown);
        assert_eq!(r.spec.host.port, 22);
    }

    #[test]
    fn default_batches() {
        let config = LifecycleConfig::default();
        assert_eq!(config.provisioning_batch.uploads.len(), 1);
        assert_eq!(config.provisioning_batch.commands.len(), 2);
        assert_eq!(
            config.verification_batch.to_string(),
            "sudo docker version && kubelet --version && kubectl version"
        );
    }
}
