//! Host job runner: one command batch against one host.
//!
//! The runner never fails and never panics outward. Whatever happens on the
//! host ends up in the returned [`HostOutcome`], and a session that was opened
//! is closed exactly once on every path.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use metalnode_core::{CommandBatch, Diagnostic, Host};
use tracing::{error, info, info_span, warn, Instrument};

use crate::error::RemoteError;
use crate::transport::{self, Session, Transport};
use crate::types::HostOutcome;

/// Runs command batches against single hosts.
pub struct HostJobRunner<T: Transport> {
    transport: Arc<T>,
    host_timeout: Option<Duration>,
}

impl<T: Transport> Clone for HostJobRunner<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            host_timeout: self.host_timeout,
        }
    }
}

/// How the upload and command phase ended.
enum PhaseEnd {
    Completed,
    Panicked(String),
    TimedOut(Duration),
}

impl<T: Transport> HostJobRunner<T> {
    /// Create a runner over `transport`.
    ///
    /// `host_timeout` bounds the upload and command phase; connecting and
    /// closing are bounded by the transport itself.
    #[must_use]
    pub fn new(transport: Arc<T>, host_timeout: Option<Duration>) -> Self {
        Self {
            transport,
            host_timeout,
        }
    }

    /// Run `batch` on `host`.
    pub async fn run(&self, host: &Host, batch: &CommandBatch) -> HostOutcome {
        let span = info_span!("host_job", host = %host.address);
        self.run_inner(host, batch).instrument(span).await
    }

    async fn run_inner(&self, host: &Host, batch: &CommandBatch) -> HostOutcome {
        let mut session = match transport::open(&*self.transport, host).await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, retriable = e.is_retriable(), "could not open session");
                return HostOutcome::unreachable(&e);
            }
        };

        let mut diagnostic = Diagnostic::new();
        let end = {
            let phase =
                AssertUnwindSafe(run_phase(&mut session, batch, &mut diagnostic)).catch_unwind();
            match self.host_timeout {
                Some(limit) => match tokio::time::timeout(limit, phase).await {
                    Ok(result) => phase_end(result),
                    Err(_) => PhaseEnd::TimedOut(limit),
                },
                None => phase_end(phase.await),
            }
        };

        session.close().await;

        match end {
            PhaseEnd::Completed => {
                info!(stderr_lines = diagnostic.len(), "batch finished");
                HostOutcome::completed(diagnostic)
            }
            PhaseEnd::Panicked(message) => {
                error!(%message, "host job panicked");
                diagnostic.push(RemoteError::Internal(message).to_string());
                HostOutcome::Faulted(diagnostic)
            }
            PhaseEnd::TimedOut(limit) => {
                error!(?limit, "host job timed out");
                diagnostic.push(RemoteError::Timeout(limit).to_string());
                HostOutcome::Faulted(diagnostic)
            }
        }
    }
}

fn phase_end(result: std::thread::Result<()>) -> PhaseEnd {
    match result {
        Ok(()) => PhaseEnd::Completed,
        Err(payload) => PhaseEnd::Panicked(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Uploads then commands, recording every failure into `diagnostic`.
///
/// The first failed upload aborts the batch. A command that exits non-zero
/// does not stop the ones after it; a broken channel does.
async fn run_phase<S: Session + ?Sized>(
    session: &mut S,
    batch: &CommandBatch,
    diagnostic: &mut Diagnostic,
) {
    for transfer in &batch.uploads {
        if let Err(e) = transport::upload(session, transfer).await {
            error!(src = %transfer.src.display(), error = %e, "upload failed, aborting batch");
            diagnostic.push(e.to_string());
            return;
        }
    }

    for command in &batch.commands {
        match transport::execute(session, command, diagnostic).await {
            Ok(()) => {}
            Err(e @ RemoteError::NonZeroExit { .. }) => {
                warn!(error = %e, "command failed");
            }
            Err(e) => {
                error!(command = %command, error = %e, "command aborted, skipping the rest of the batch");
                diagnostic.push(e.to_string());
                return;
            }
        }
    }
}
