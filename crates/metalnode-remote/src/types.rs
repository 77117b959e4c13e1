//! Configuration and result types for remote execution.

use std::collections::BTreeMap;
use std::time::Duration;

use metalnode_core::Diagnostic;
use serde::Deserialize;

use crate::error::{ErrorKind, RemoteError};

/// Configuration for SSH sessions.
#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// TCP connect plus handshake timeout in seconds.
    #[serde(default = "SshConfig::default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Idle time after which the server connection is dropped.
    #[serde(default = "SshConfig::default_inactivity_timeout")]
    pub inactivity_timeout_seconds: u64,
}

impl SshConfig {
    const fn default_connect_timeout() -> u64 {
        30
    }

    const fn default_inactivity_timeout() -> u64 {
        600 // 10 minutes, provisioning scripts can be quiet for a while
    }

    /// Get the connect timeout as a `Duration`.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Get the inactivity timeout as a `Duration`.
    #[must_use]
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_seconds)
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: Self::default_connect_timeout(),
            inactivity_timeout_seconds: Self::default_inactivity_timeout(),
        }
    }
}

/// Bounds applied by the fleet executor.
///
/// Both bounds are off by default: every host gets its own worker at once and
/// a worker runs until its batch finishes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum number of hosts worked on at the same time.
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    /// Deadline for the upload and command phase of one host, in seconds.
    #[serde(default)]
    pub host_timeout_seconds: Option<u64>,
}

impl ExecutorConfig {
    /// Get the per-host deadline as a `Duration`.
    #[must_use]
    pub fn host_timeout(&self) -> Option<Duration> {
        self.host_timeout_seconds.map(Duration::from_secs)
    }
}

/// What happened when a batch ran against one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOutcome {
    /// Every upload and command succeeded without stderr output.
    Succeeded,
    /// The batch ran; stderr or failures were captured.
    Failed(Diagnostic),
    /// The job panicked or ran past its deadline.
    Faulted(Diagnostic),
    /// No session could be opened; nothing ran on the host.
    Unreachable {
        /// Why the session could not be opened.
        kind: ErrorKind,
        /// Rendered error.
        message: String,
    },
}

impl HostOutcome {
    /// Build the outcome for a host that could not be reached.
    #[must_use]
    pub fn unreachable(error: &RemoteError) -> Self {
        Self::Unreachable {
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    /// Build the outcome of a batch that ran to completion.
    #[must_use]
    pub fn completed(diagnostic: Diagnostic) -> Self {
        if diagnostic.is_empty() {
            Self::Succeeded
        } else {
            Self::Failed(diagnostic)
        }
    }

    /// The diagnostic view of this outcome.
    ///
    /// Empty only for [`HostOutcome::Succeeded`].
    #[must_use]
    pub fn diagnostic(&self) -> Diagnostic {
        match self {
            Self::Succeeded => Diagnostic::new(),
            Self::Failed(d) | Self::Faulted(d) => d.clone(),
            Self::Unreachable { message, .. } => Diagnostic::from(vec![message.clone()]),
        }
    }

    /// Returns true if the batch fully succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns true if the host could not be reached.
    #[must_use]
    pub const fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

/// Per-host outcomes of one fleet run, keyed by host address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetResult {
    outcomes: BTreeMap<String, HostOutcome>,
}

impl FleetResult {
    pub(crate) fn insert(&mut self, address: String, outcome: HostOutcome) {
        self.outcomes.insert(address, outcome);
    }

    pub(crate) fn contains(&self, address: &str) -> bool {
        self.outcomes.contains_key(address)
    }

    /// Number of hosts in the result.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// True if the result has no hosts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// The outcome for one host.
    #[must_use]
    pub fn get(&self, address: &str) -> Option<&HostOutcome> {
        self.outcomes.get(address)
    }

    /// The diagnostic for one host.
    #[must_use]
    pub fn diagnostic(&self, address: &str) -> Option<Diagnostic> {
        self.outcomes.get(address).map(HostOutcome::diagnostic)
    }

    /// Iterate over `(address, outcome)` pairs in address order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HostOutcome)> {
        self.outcomes.iter().map(|(a, o)| (a.as_str(), o))
    }

    /// Returns true if every host succeeded.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.values().all(HostOutcome::is_success)
    }

    /// Addresses of hosts that did not succeed.
    #[must_use]
    pub fn failed_hosts(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, o)| !o.is_success())
            .map(|(a, _)| a)
            .collect()
    }
}

impl FromIterator<(String, HostOutcome)> for FleetResult {
    fn from_iter<I: IntoIterator<Item = (String, HostOutcome)>>(iter: I) -> Self {
        Self {
            outcomes: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ssh_config() {
        let config = SshConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.inactivity_timeout_seconds, 600);
    }

    #[test]
    fn executor_config_unbounded_by_default() {
        let config = ExecutorConfig::default();
        assert!(config.max_concurrency.is_none());
        assert!(config.host_timeout().is_none());
    }

    #[test]
    fn outcome_diagnostics() {
        assert!(HostOutcome::completed(Diagnostic::new()).is_success());

        let failed = HostOutcome::completed(Diagnostic::from(vec!["boom".to_string()]));
        assert_eq!(failed.diagnostic().lines(), ["boom"]);

        let unreachable = HostOutcome::unreachable(&RemoteError::Connect {
            address: "10.0.0.5".into(),
            message: "connection refused".into(),
        });
        assert!(unreachable.is_unreachable());
        assert_eq!(unreachable.diagnostic().len(), 1);
    }

    #[test]
    fn fleet_result_accessors() {
        let mut result = FleetResult::default();
        result.insert("10.0.0.1".into(), HostOutcome::Succeeded);
        result.insert(
            "10.0.0.2".into(),
            HostOutcome::Failed(Diagnostic::from(vec!["err".to_string()])),
        );

        assert_eq!(result.len(), 2);
        assert!(!result.all_succeeded());
        assert_eq!(result.failed_hosts(), vec!["10.0.0.2"]);

        assert!(result.diagnostic("10.0.0.1").unwrap().is_empty());
        assert_eq!(result.diagnostic("10.0.0.2").unwrap().lines(), ["err"]);
    }
}
