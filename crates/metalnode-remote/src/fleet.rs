//! Fleet executor: one command batch fanned out to many hosts.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use metalnode_core::{CommandBatch, Diagnostic, Host};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info};

use crate::error::{RemoteError, Result};
use crate::runner::HostJobRunner;
use crate::transport::Transport;
use crate::types::{ExecutorConfig, FleetResult, HostOutcome};

/// Runs a command batch against a set of hosts.
///
/// This trait abstracts the executor so callers can substitute their own
/// implementation in tests.
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    /// Run `batch` on every host and wait for all of them.
    ///
    /// # Errors
    ///
    /// Returns `EmptyFleet` or `DuplicateHost` when the host set is malformed.
    /// Failures on individual hosts never surface here; they are reported in
    /// the [`FleetResult`].
    async fn run(&self, hosts: &[Host], batch: &CommandBatch) -> Result<FleetResult>;
}

/// Fans a batch out to one concurrent task per host.
///
/// `run` returns only after every host has reported, so a host that never
/// finishes stalls the call unless a per-host deadline is configured.
pub struct FleetExecutor<T: Transport> {
    transport: Arc<T>,
    config: ExecutorConfig,
}

impl<T: Transport> FleetExecutor<T> {
    /// Create an executor over `transport`.
    #[must_use]
    pub fn new(transport: Arc<T>, config: ExecutorConfig) -> Self {
        Self { transport, config }
    }

    /// Create an unbounded executor.
    #[must_use]
    pub fn with_defaults(transport: Arc<T>) -> Self {
        Self::new(transport, ExecutorConfig::default())
    }
}

fn check_fleet(hosts: &[Host]) -> Result<()> {
    if hosts.is_empty() {
        return Err(RemoteError::EmptyFleet);
    }
    let mut seen = HashSet::with_capacity(hosts.len());
    for host in hosts {
        if !seen.insert(host.address.as_str()) {
            return Err(RemoteError::DuplicateHost(host.address.clone()));
        }
    }
    Ok(())
}

#[async_trait]
impl<T: Transport> BatchExecutor for FleetExecutor<T> {
    async fn run(&self, hosts: &[Host], batch: &CommandBatch) -> Result<FleetResult> {
        check_fleet(hosts)?;

        info!(hosts = hosts.len(), batch = %batch, "running batch on fleet");

        let runner = HostJobRunner::new(Arc::clone(&self.transport), self.config.host_timeout());
        let permits = self
            .config
            .max_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        let batch = Arc::new(batch.clone());
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, HostOutcome)>();

        for host in hosts.iter().cloned() {
            let runner = runner.clone();
            let permits = permits.clone();
            let batch = Arc::clone(&batch);
            let tx = tx.clone();

            tokio::spawn(async move {
                let _permit = match permits {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                let outcome = runner.run(&host, &batch).await;
                // The receiver only goes away if `run` itself was dropped.
                let _ = tx.send((host.address, outcome));
            });
        }
        drop(tx);

        let mut result = FleetResult::default();
        while result.len() < hosts.len() {
            let Some((address, outcome)) = rx.recv().await else {
                break;
            };
            debug!(host = %address, success = outcome.is_success(), "host reported");
            result.insert(address, outcome);
        }

        // A worker only disappears without reporting if its task was torn
        // down; keep the result complete anyway.
        for host in hosts {
            if !result.contains(&host.address) {
                error!(host = %host.address, "worker exited without reporting");
                let mut diagnostic = Diagnostic::new();
                diagnostic.push(
                    RemoteError::Internal("worker exited without reporting".to_string())
                        .to_string(),
                );
                result.insert(host.address.clone(), HostOutcome::Faulted(diagnostic));
            }
        }

        info!(
            hosts = result.len(),
            failed = result.failed_hosts().len(),
            "fleet batch finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCommand, MockTransport};
    use std::time::Duration;

    fn fleet(n: u8) -> Vec<Host> {
        (1..=n)
            .map(|i| Host::with_password("root", format!("10.0.0.{i}"), 22, "secret"))
            .collect()
    }

    #[tokio::test]
    async fn all_hosts_succeed() {
        let transport = Arc::new(MockTransport::new());
        let executor = FleetExecutor::with_defaults(Arc::clone(&transport));
        let batch = CommandBatch::new().command("uname -a");

        let result = executor.run(&fleet(5), &batch).await.unwrap();

        assert_eq!(result.len(), 5);
        assert!(result.all_succeeded());
        for (_, outcome) in result.iter() {
            assert!(outcome.diagnostic().is_empty());
        }
        assert_eq!(transport.total_opens(), 5);
    }

    #[tokio::test]
    async fn one_failing_host_is_isolated() {
        let transport = Arc::new(MockTransport::new());
        transport.script(
            "10.0.0.3",
            "/tmp/setup.sh",
            MockCommand::exit(2).with_stderr(["disk full"]),
        );
        let executor = FleetExecutor::with_defaults(Arc::clone(&transport));
        let batch = CommandBatch::new().command("/tmp/setup.sh");

        let result = executor.run(&fleet(4), &batch).await.unwrap();

        assert_eq!(result.len(), 4);
        assert_eq!(result.failed_hosts(), vec!["10.0.0.3"]);
        assert_eq!(
            result.diagnostic("10.0.0.3").unwrap().lines(),
            ["disk full"]
        );
        for address in ["10.0.0.1", "10.0.0.2", "10.0.0.4"] {
            assert!(result.diagnostic(address).unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn panicking_and_unreachable_hosts_do_not_affect_siblings() {
        let transport = Arc::new(MockTransport::new());
        transport.script("10.0.0.1", "install", MockCommand::panics());
        transport.refuse_connections("10.0.0.2");
        let executor = FleetExecutor::with_defaults(Arc::clone(&transport));

        let result = executor
            .run(&fleet(3), &CommandBatch::new().command("install"))
            .await
            .unwrap();

        assert_eq!(result.len(), 3);
        assert!(matches!(
            result.get("10.0.0.1"),
            Some(HostOutcome::Faulted(_))
        ));
        assert!(result.get("10.0.0.2").unwrap().is_unreachable());
        assert!(result.get("10.0.0.3").unwrap().is_success());
    }

    #[tokio::test]
    async fn slow_host_is_waited_for() {
        let transport = Arc::new(MockTransport::new());
        transport.script(
            "10.0.0.2",
            "install",
            MockCommand::ok().with_delay(Duration::from_millis(50)),
        );
        let executor = FleetExecutor::with_defaults(Arc::clone(&transport));

        let result = executor
            .run(&fleet(2), &CommandBatch::new().command("install"))
            .await
            .unwrap();

        assert_eq!(result.len(), 2);
        assert!(result.all_succeeded());
    }

    #[tokio::test]
    async fn empty_fleet_is_rejected() {
        let executor = FleetExecutor::with_defaults(Arc::new(MockTransport::new()));
        let err = executor.run(&[], &CommandBatch::new()).await.unwrap_err();
        assert!(matches!(err, RemoteError::EmptyFleet));
    }

    #[tokio::test]
    async fn duplicate_hosts_are_rejected() {
        let executor = FleetExecutor::with_defaults(Arc::new(MockTransport::new()));
        let mut hosts = fleet(2);
        hosts.push(hosts[0].clone());

        let err = executor.run(&hosts, &CommandBatch::new()).await.unwrap_err();
        assert!(matches!(err, RemoteError::DuplicateHost(ref a) if a == "10.0.0.1"));
    }

    #[tokio::test]
    async fn concurrency_limit_is_respected() {
        let transport = Arc::new(MockTransport::new());
        for i in 1..=6 {
            transport.script(
                &format!("10.0.0.{i}"),
                "install",
                MockCommand::ok().with_delay(Duration::from_millis(20)),
            );
        }
        let config = ExecutorConfig {
            max_concurrency: Some(2),
            host_timeout_seconds: None,
        };
        let executor = FleetExecutor::new(Arc::clone(&transport), config);

        let result = executor
            .run(&fleet(6), &CommandBatch::new().command("install"))
            .await
            .unwrap();

        assert_eq!(result.len(), 6);
        assert!(result.all_succeeded());
        assert!(transport.peak_concurrency() <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn host_deadline_bounds_a_hung_host() {
        let transport = Arc::new(MockTransport::new());
        transport.script("10.0.0.1", "install", MockCommand::hangs());
        let config = ExecutorConfig {
            max_concurrency: None,
            host_timeout_seconds: Some(60),
        };
        let executor = FleetExecutor::new(Arc::clone(&transport), config);

        let result = executor
            .run(&fleet(2), &CommandBatch::new().command("install"))
            .await
            .unwrap();

        assert!(matches!(
            result.get("10.0.0.1"),
            Some(HostOutcome::Faulted(_))
        ));
        assert!(result.get("10.0.0.2").unwrap().is_success());
    }
}
