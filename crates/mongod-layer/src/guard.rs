//! Scoped ownership of a running mongod.
//!
//! [`ServerGuard`] is the only place that decides when the server dies. Running
//! work through [`ServerGuard::run`] stops the server when the work finishes,
//! fails or is interrupted by SIGINT, SIGTERM, SIGHUP or SIGQUIT. Dropping the
//! guard (for example while unwinding from a panic) falls back to a
//! synchronous emergency stop.

use crate::LayerError;
use mongod_layer_core::{LifecycleManager, ProcessLauncher};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

pub struct ServerGuard<L: ProcessLauncher> {
    manager: Arc<LifecycleManager<L>>,
}

impl<L: ProcessLauncher> ServerGuard<L> {
    pub fn new(manager: Arc<LifecycleManager<L>>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<LifecycleManager<L>> {
        &self.manager
    }

    /// Run `body` until it completes or the process receives a shutdown signal,
    /// then stop the server
    pub async fn run<T, F>(&self, body: F) -> Result<T, LayerError>
    where
        F: Future<Output = Result<T, LayerError>>,
    {
        self.run_until(body, shutdown_signal()).await
    }

    /// Like [`ServerGuard::run`] with a caller-supplied shutdown trigger
    pub async fn run_until<T, F, S>(&self, body: F, shutdown: S) -> Result<T, LayerError>
    where
        F: Future<Output = Result<T, LayerError>>,
        S: Future<Output = Result<&'static str, LayerError>>,
    {
        // Polling the trigger first installs signal handlers before the body
        // launches anything
        let result = tokio::select! {
            biased;
            signal = shutdown => match signal {
                Ok(name) => {
                    warn!("Received {name}, mongod will be stopped by the shutdown guard");
                    Err(LayerError::Interrupted(name))
                }
                Err(e) => Err(e),
            },
            result = body => result,
        };

        self.manager.stop().await;
        info!("Server guard released");
        result
    }
}

impl<L: ProcessLauncher> Drop for ServerGuard<L> {
    fn drop(&mut self) {
        self.manager.emergency_stop();
    }
}

/// Resolves with the name of the first shutdown signal received
#[cfg(unix)]
pub async fn shutdown_signal() -> Result<&'static str, LayerError> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).map_err(LayerError::Signal)?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(LayerError::Signal)?;
    let mut sighup = signal(SignalKind::hangup()).map_err(LayerError::Signal)?;
    let mut sigquit = signal(SignalKind::quit()).map_err(LayerError::Signal)?;

    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
        _ = sighup.recv() => Ok("SIGHUP"),
        _ = sigquit.recv() => Ok("SIGQUIT"),
    }
}

#[cfg(not(unix))]
pub async fn shutdown_signal() -> Result<&'static str, LayerError> {
    tokio::signal::ctrl_c().await.map_err(LayerError::Signal)?;
    Ok("ctrl-c")
}
