use crate::guard::ServerGuard;
use crate::readiness::{ReadinessProbe, probe_for};
use crate::LayerError;
use mongod_layer_core::{LayerConfig, LifecycleManager, ProcessLauncher};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Drives one session: configure, start, wait for readiness, import,
/// run the caller's work and stop, all inside a [`ServerGuard`]
pub struct Orchestrator<L: ProcessLauncher> {
    manager: Arc<LifecycleManager<L>>,
    config: LayerConfig,
    probe: Box<dyn ReadinessProbe>,
}

impl<L: ProcessLauncher> Orchestrator<L> {
    pub fn new(manager: Arc<LifecycleManager<L>>, config: LayerConfig) -> Self {
        let probe = probe_for(&config);
        Self {
            manager,
            config,
            probe,
        }
    }

    pub fn with_probe(mut self, probe: Box<dyn ReadinessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn manager(&self) -> &Arc<LifecycleManager<L>> {
        &self.manager
    }

    /// Start the server and load the configured jobs; the import never
    /// begins before the server was started and probed
    pub async fn bring_up(&self) -> Result<(), LayerError> {
        let config = &self.config;
        let executable = config.executable_path.as_deref().unwrap_or(Path::new(""));

        self.manager
            .configure(executable, &config.data_dir_path)
            .await?;
        self.manager.start().await?;
        self.probe.wait_ready().await?;

        if !config.jobs.is_empty() {
            let importer = config.importer_path.as_deref().unwrap_or(Path::new(""));
            let database = config.database_name.as_deref().unwrap_or_default();
            self.manager
                .run_import(importer, database, &config.jobs)
                .await?;
        }

        Ok(())
    }

    /// Bring the server up, run `body` against it and stop it on every path
    pub async fn run<T, F, Fut>(self, body: F) -> Result<T, LayerError>
    where
        F: FnOnce(Arc<LifecycleManager<L>>) -> Fut,
        Fut: Future<Output = Result<T, LayerError>>,
    {
        let guard = ServerGuard::new(self.manager.clone());
        let manager = self.manager.clone();

        guard
            .run(async move {
                self.bring_up().await?;
                body(manager).await
            })
            .await
    }
}

/// Run `command` with inherited stdio and return its exit code
pub async fn run_command(command: &[String]) -> Result<i32, LayerError> {
    let Some((program, args)) = command.split_first() else {
        return Ok(0);
    };

    info!("Running {:?} against mongod", command);

    let mut child = tokio::process::Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| LayerError::Command {
            command: program.clone(),
            source,
        })?;

    let status = child.wait().await.map_err(|source| LayerError::Command {
        command: program.clone(),
        source,
    })?;

    let code = status.code().unwrap_or(1);
    info!("{} exited with code {}", program, code);
    Ok(code)
}
