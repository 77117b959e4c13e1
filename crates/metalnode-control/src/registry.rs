//! In-memory node registry.
//!
//! The registry owns the authoritative copy of every node record. Claiming a
//! node for provisioning happens under the registry lock, so concurrent
//! reconciles of the same node provision it once.

use std::collections::HashMap;

use async_trait::async_trait;
use metalnode_remote::BatchExecutor;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{ControlError, Result};
use crate::lifecycle;
use crate::service::{NodeLifecycle, TransitionObserver};
use crate::types::{LifecycleState, NodeRecord};

/// Node records keyed by name.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: Mutex<HashMap<String, NodeRecord>>,
}

impl NodeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node.
    ///
    /// # Errors
    ///
    /// Returns `NodeExists` if a node with the same name is registered.
    pub fn register(&self, record: NodeRecord) -> Result<()> {
        let mut nodes = self.nodes.lock();
        if nodes.contains_key(&record.name) {
            return Err(ControlError::NodeExists(record.name));
        }
        info!(node = %record.name, host = %record.spec.host, "node registered");
        nodes.insert(record.name.clone(), record);
        Ok(())
    }

    /// Get a snapshot of a node.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<NodeRecord> {
        self.nodes.lock().get(name).cloned()
    }

    /// Snapshots of every node, ordered by name.
    #[must_use]
    pub fn list(&self) -> Vec<NodeRecord> {
        let mut nodes: Vec<_> = self.nodes.lock().values().cloned().collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        nodes
    }

    /// Names of every node, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.nodes.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    /// True if no nodes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }

    /// Return a node to `Unknown` so the next reconcile provisions it again.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if the node is not registered, or
    /// `InvalidState` if a batch is currently running against it.
    pub fn reset(&self, name: &str) -> Result<NodeRecord> {
        let mut nodes = self.nodes.lock();
        let record = nodes
            .get_mut(name)
            .ok_or_else(|| ControlError::NodeNotFound(name.to_string()))?;
        if lifecycle::is_in_progress(record.state()) {
            return Err(ControlError::InvalidState {
                name: name.to_string(),
                from: record.state(),
                to: LifecycleState::Unknown,
            });
        }
        record.reset();
        info!(node = %name, "node reset");
        Ok(record.clone())
    }

    /// Claim a node for provisioning.
    ///
    /// Returns the claimed record, or `None` if the node is not in `Unknown`.
    fn claim(&self, name: &str) -> Result<Option<NodeRecord>> {
        let mut nodes = self.nodes.lock();
        let record = nodes
            .get_mut(name)
            .ok_or_else(|| ControlError::NodeNotFound(name.to_string()))?;
        Ok(lifecycle::claim(record).then(|| record.clone()))
    }

    fn store(&self, record: NodeRecord) {
        self.nodes.lock().insert(record.name.clone(), record);
    }

    /// Reconcile a registered node and return its resulting record.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if the node is not registered.
    pub async fn reconcile<E: BatchExecutor>(
        &self,
        name: &str,
        lifecycle: &NodeLifecycle<E>,
    ) -> Result<NodeRecord> {
        let Some(claimed) = self.claim(name)? else {
            debug!(node = %name, "node not in Unknown, nothing to reconcile");
            return self
                .get(name)
                .ok_or_else(|| ControlError::NodeNotFound(name.to_string()));
        };
        let record = lifecycle.provision(claimed, self).await;
        self.store(record.clone());
        Ok(record)
    }
}

#[async_trait]
impl TransitionObserver for NodeRegistry {
    async fn on_transition(&self, record: &NodeRecord, _from: LifecycleState) {
        self.store(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metalnode_core::Host;

    fn record(name: &str) -> NodeRecord {
        NodeRecord::new(name, Host::with_password("root", "10.0.0.5", 22, "pw"))
    }

    #[test]
    fn register_and_get() {
        let registry = NodeRegistry::new();
        registry.register(record("node-b")).unwrap();
        registry.register(record("node-a")).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("node-a").unwrap().name, "node-a");
        assert!(registry.get("node-c").is_none());
        assert_eq!(registry.names(), vec!["node-a", "node-b"]);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = NodeRegistry::new();
        registry.register(record("node-a")).unwrap();
        let err = registry.register(record("node-a")).unwrap_err();
        assert!(matches!(err, ControlError::NodeExists(ref n) if n == "node-a"));
    }

    #[test]
    fn claim_is_exclusive() {
        let registry = NodeRegistry::new();
        registry.register(record("node-a")).unwrap();

        assert!(registry.claim("node-a").unwrap().is_some());
        assert!(registry.claim("node-a").unwrap().is_none());
        assert_eq!(
            registry.get("node-a").unwrap().state(),
            LifecycleState::Initializing
        );
    }

    #[test]
    fn reset_rules() {
        let registry = NodeRegistry::new();
        registry.register(record("node-a")).unwrap();

        assert!(matches!(
            registry.reset("missing"),
            Err(ControlError::NodeNotFound(_))
        ));

        registry.claim("node-a").unwrap();
        assert!(matches!(
            registry.reset("node-a"),
            Err(ControlError::InvalidState { .. })
        ));

        let mut failed = registry.get("node-a").unwrap();
        failed.status.state = LifecycleState::Failed;
        failed.status.check_failure_reasons.push("no docker".into());
        registry.store(failed);

        let reset = registry.reset("node-a").unwrap();
        assert_eq!(reset.state(), LifecycleState::Unknown);
        assert_eq!(reset.status.check_failure_reasons, vec!["no docker"]);
    }
}
