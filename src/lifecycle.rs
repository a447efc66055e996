//! Service lifecycle: `Running -> Draining -> Stopped`.
//!
//! Requests hold an [`Admission`] (a read guard) while they open a tenant
//! handle and enqueue their job. [`Lifecycle::begin_draining`] takes the
//! write guard, so once it returns no request is halfway through admission
//! and every later one is refused. Jobs already queued keep running.

use tokio::sync::{RwLock, RwLockReadGuard};

use crate::error::Error;

/// Lifecycle states, in the only order they are ever entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    /// Accepting new jobs.
    Running,
    /// Refusing new jobs; queued jobs are finishing.
    Draining,
    /// Every tenant database has been closed.
    Stopped,
}

impl LifecycleState {
    /// Lowercase string representation for JSON serialization.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Running => "running",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        }
    }
}

/// Proof that the service was running when a request was admitted.
/// Hold it until the job is enqueued, then drop it before awaiting the result.
pub struct Admission<'a> {
    _guard: RwLockReadGuard<'a, LifecycleState>,
}

/// Lifecycle state machine guarding admission of new jobs.
#[derive(Debug)]
pub struct Lifecycle {
    state: RwLock<LifecycleState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LifecycleState::Running),
        }
    }

    /// Admit a request, or refuse it once shutdown has begun.
    pub async fn admit(&self) -> Result<Admission<'_>, Error> {
        let guard = self.state.read().await;
        if *guard != LifecycleState::Running {
            return Err(Error::ShuttingDown);
        }
        Ok(Admission { _guard: guard })
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    /// Stop admitting jobs. Returns `true` if this call made the transition.
    ///
    /// Waits for requests that are mid-admission to finish enqueuing.
    pub async fn begin_draining(&self) -> bool {
        let mut state = self.state.write().await;
        if *state == LifecycleState::Running {
            *state = LifecycleState::Draining;
            tracing::info!("Draining: refusing new jobs, finishing queued ones");
            true
        } else {
            false
        }
    }

    pub async fn mark_stopped(&self) {
        let mut state = self.state.write().await;
        if *state != LifecycleState::Stopped {
            *state = LifecycleState::Stopped;
            tracing::info!("Stopped: all tenant databases closed");
        }
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
