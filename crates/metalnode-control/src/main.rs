//! metalnode control - bare-metal node initialization.
//!
//! Loads a node inventory, reconciles every node concurrently and prints the
//! resulting node statuses as JSON.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::join_all;
use metalnode_control::lifecycle::is_terminal;
use metalnode_control::{LifecycleConfig, NodeLifecycle, NodeRecord, NodeRegistry, NodeStatus};
use metalnode_remote::{ExecutorConfig, FleetExecutor, SshConfig, SshTransport};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,metalnode=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting metalnode control");

    // Load configuration from environment
    let nodes_file = std::env::var("NODES_FILE").unwrap_or_else(|_| "nodes.json".to_string());
    let mut ssh = SshConfig::default();
    if let Some(seconds) = env_parse("SSH_CONNECT_TIMEOUT_SECONDS") {
        ssh.connect_timeout_seconds = seconds;
    }
    let executor_config = ExecutorConfig {
        max_concurrency: env_parse("MAX_CONCURRENCY"),
        host_timeout_seconds: env_parse("HOST_TIMEOUT_SECONDS"),
    };
    let lifecycle_config = match std::env::var("LIFECYCLE_CONFIG") {
        Ok(path) => {
            let config: LifecycleConfig =
                serde_json::from_str(&tokio::fs::read_to_string(&path).await?)?;
            tracing::info!(path = %path, "Loaded lifecycle configuration");
            config
        }
        Err(_) => LifecycleConfig::default(),
    };

    let records: Vec<NodeRecord> =
        serde_json::from_str(&tokio::fs::read_to_string(&nodes_file).await?)?;
    let registry = NodeRegistry::new();
    for record in records {
        registry.register(record)?;
    }
    tracing::info!(nodes_file = %nodes_file, nodes = registry.len(), "Loaded node inventory");

    let transport = Arc::new(SshTransport::new(ssh));
    let executor = Arc::new(FleetExecutor::new(transport, executor_config));
    let lifecycle = NodeLifecycle::new(executor, lifecycle_config);
    tracing::debug!(
        provisioning = %lifecycle.config().provisioning_batch,
        verification = %lifecycle.config().verification_batch,
        "Lifecycle batches"
    );

    let names = registry.names();
    let results = join_all(names.iter().map(|name| registry.reconcile(name, &lifecycle))).await;
    for (name, result) in names.iter().zip(results) {
        match result {
            Ok(record) => tracing::info!(
                node = %name,
                state = ?record.status.state,
                ready = record.status.ready,
                "Node reconciled"
            ),
            Err(e) => tracing::error!(node = %name, error = %e, "Node reconcile failed"),
        }
    }

    // Specs carry credentials; only statuses go to stdout.
    let statuses: BTreeMap<String, NodeStatus> = registry
        .list()
        .into_iter()
        .map(|record| (record.name, record.status))
        .collect();
    let pending = statuses
        .values()
        .filter(|status| !is_terminal(status.state))
        .count();
    let ready = statuses.values().filter(|status| status.ready).count();
    tracing::info!(
        nodes = statuses.len(),
        ready,
        failed = statuses.len() - ready - pending,
        pending,
        "Reconcile pass finished"
    );
    println!("{}", serde_json::to_string_pretty(&statuses)?);
    Ok(())
}
