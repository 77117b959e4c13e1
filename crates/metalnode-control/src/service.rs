//! The lifecycle driver: runs provisioning and verification batches against a
//! node and records the outcome on its status.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use metalnode_core::{CommandBatch, Host};
use metalnode_remote::{BatchExecutor, HostOutcome};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::lifecycle;
use crate::types::{LifecycleConfig, LifecycleState, NodeRecord};

/// Stderr line printed by `kubectl version` on a host with no cluster yet.
///
/// Verification ignores it. Matching is exact, so a kubectl that words this
/// differently will fail verification.
pub const BENIGN_CHECK_MESSAGE: &str =
    "The connection to the server localhost:8080 was refused - did you specify the right host or port?";

/// Receives every state change made while a node is being reconciled.
#[async_trait]
pub trait TransitionObserver: Send + Sync {
    /// Called after `record` moved out of `from`.
    async fn on_transition(&self, record: &NodeRecord, from: LifecycleState);
}

/// Observer that ignores transitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

#[async_trait]
impl TransitionObserver for NoopObserver {
    async fn on_transition(&self, _record: &NodeRecord, _from: LifecycleState) {}
}

/// Drives nodes from `Unknown` to `Ready` or `Failed`.
pub struct NodeLifecycle<E: BatchExecutor> {
    executor: Arc<E>,
    config: LifecycleConfig,
}

impl<E: BatchExecutor> NodeLifecycle<E> {
    /// Create a lifecycle driver.
    #[must_use]
    pub fn new(executor: Arc<E>, config: LifecycleConfig) -> Self {
        Self { executor, config }
    }

    /// Create a lifecycle driver with the default batches.
    #[must_use]
    pub fn with_defaults(executor: Arc<E>) -> Self {
        Self::new(executor, LifecycleConfig::default())
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Reconcile one node.
    ///
    /// A node in `Unknown` is provisioned and verified before this returns.
    /// Any other state is returned unchanged without touching the host.
    pub async fn reconcile(&self, record: NodeRecord) -> NodeRecord {
        self.reconcile_with(record, &NoopObserver).await
    }

    /// Like [`reconcile`](Self::reconcile), reporting each transition to
    /// `observer`.
    pub async fn reconcile_with(
        &self,
        mut record: NodeRecord,
        observer: &dyn TransitionObserver,
    ) -> NodeRecord {
        if !lifecycle::claim(&mut record) {
            debug!(node = %record.name, state = ?record.state(), "nothing to reconcile");
            return record;
        }
        observer
            .on_transition(&record, LifecycleState::Unknown)
            .await;
        self.provision(record, observer).await
    }

    /// Provision and verify a node that has already been claimed.
    ///
    /// `record` must be in `Initializing`; see [`lifecycle::claim`].
    pub async fn provision(
        &self,
        record: NodeRecord,
        observer: &dyn TransitionObserver,
    ) -> NodeRecord {
        let span = info_span!("reconcile", node = %record.name, host = %record.spec.host.address);
        self.provision_inner(record, observer).instrument(span).await
    }

    async fn provision_inner(
        &self,
        mut record: NodeRecord,
        observer: &dyn TransitionObserver,
    ) -> NodeRecord {
        if record.state() != LifecycleState::Initializing {
            warn!(state = ?record.state(), "node was not claimed, skipping");
            return record;
        }
        let host = record.spec.host.clone();

        info!("initializing node");
        let batch = record
            .spec
            .initialization_batch
            .as_ref()
            .unwrap_or(&self.config.provisioning_batch);
        let Some(outcome) = self.run_on(&host, batch).await else {
            return self.abandon(record, observer).await;
        };
        let diagnostic = outcome.diagnostic();
        if !diagnostic.is_empty() {
            // Provisioning scripts write progress to stderr; keep it, move on.
            warn!(lines = diagnostic.len(), "initialization reported errors");
            record
                .status
                .initialization_failure_reasons
                .extend(diagnostic.into_lines());
        }
        self.transition(&mut record, LifecycleState::Checking, observer)
            .await;

        info!("checking node");
        let Some(outcome) = self.run_on(&host, &self.config.verification_batch).await else {
            return self.abandon(record, observer).await;
        };
        let failures = outcome.diagnostic().without(BENIGN_CHECK_MESSAGE);
        if failures.is_empty() {
            self.transition(&mut record, LifecycleState::Ready, observer)
                .await;
            info!("node is ready");
        } else {
            warn!(lines = failures.len(), "node check failed");
            record
                .status
                .check_failure_reasons
                .extend(failures.into_lines());
            self.transition(&mut record, LifecycleState::Failed, observer)
                .await;
        }
        record
    }

    /// Run `batch` on a single host. `None` means nothing ran there.
    async fn run_on(&self, host: &Host, batch: &CommandBatch) -> Option<HostOutcome> {
        let result = match self.executor.run(std::slice::from_ref(host), batch).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "executor rejected the batch");
                return None;
            }
        };
        match result.get(&host.address) {
            Some(HostOutcome::Unreachable { message, .. }) => {
                warn!(%message, "host unreachable");
                None
            }
            Some(outcome) => Some(outcome.clone()),
            None => {
                error!("executor returned no outcome for host");
                None
            }
        }
    }

    /// Return an unreachable node to `Unknown` so a later reconcile retries.
    async fn abandon(
        &self,
        mut record: NodeRecord,
        observer: &dyn TransitionObserver,
    ) -> NodeRecord {
        warn!(state = ?record.state(), "releasing node for a later attempt");
        self.transition(&mut record, LifecycleState::Unknown, observer)
            .await;
        record
    }

    async fn transition(
        &self,
        record: &mut NodeRecord,
        to: LifecycleState,
        observer: &dyn TransitionObserver,
    ) {
        let from = record.state();
        if let Err(e) = lifecycle::validate_transition(&record.name, from, to) {
            error!(error = %e, "refusing transition");
            return;
        }
        record.status.state = to;
        record.status.ready = to == LifecycleState::Ready;
        record.status.updated_at = Some(Utc::now());
        debug!(?from, ?to, "node transitioned");
        observer.on_transition(record, from).await;
    }
}
