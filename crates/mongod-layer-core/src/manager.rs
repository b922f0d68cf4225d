use crate::config::{ImportJobs, ServerConfig};
use crate::error::{ImportError, MongodLayerError};
use crate::process::{LaunchSpec, ProcessHandle, ProcessId, ProcessLauncher};
use crate::stdio::{LayerStdOut, RelayTask};
use crate::validation::require_non_empty;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// How long an exited importer's output may stay open before the relay is dropped
const RELAY_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Observable lifecycle of a [`LifecycleManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unconfigured,
    Configured,
    Running,
    Stopped,
}

/// A live child together with the task relaying its output
struct ManagedProcess<H> {
    handle: H,
    relay: Option<RelayTask>,
}

impl<H: ProcessHandle> ManagedProcess<H> {
    fn launch(mut handle: H, out: &LayerStdOut) -> Self {
        let relay = handle
            .take_output()
            .map(|output| RelayTask::spawn(handle.get_command().to_string(), output, out.clone()));
        Self { handle, relay }
    }

    /// Kill request plus relay cancellation; never waits for the exit
    fn terminate(mut self) {
        if let Err(e) = self.handle.kill() {
            warn!("Failed to terminate {}: {}", self.handle.get_command(), e);
        }
        if let Some(relay) = self.relay.take() {
            relay.cancel();
        }
    }
}

struct ManagerState<H> {
    config: Option<ServerConfig>,
    server: Option<ManagedProcess<H>>,
    launches: u64,
}

/// Coordinates one mongod child and the imports that run against it.
///
/// Exactly one manager is meant to exist per parent process. The owner
/// constructs it, shares it behind an `Arc` and is responsible for stopping
/// it on every exit path (see `ServerGuard` in the `mongod-layer` crate).
/// Every state-changing operation holds the same lock for its whole duration,
/// so `start`, `stop` and `run_import` never interleave. Relay tasks run
/// outside the lock.
pub struct LifecycleManager<L: ProcessLauncher> {
    launcher: Arc<L>,
    out: LayerStdOut,
    state: Mutex<ManagerState<L::Handle>>,
    /// Pid of the running server, readable without the async lock
    tracked: std::sync::Mutex<Option<ProcessId>>,
    /// Set when `emergency_stop` killed the server by pid while the lock was
    /// held; the next lock holder drops the stale record
    killed_by_pid: AtomicBool,
}

impl<L: ProcessLauncher> LifecycleManager<L> {
    /// Create a manager relaying child output to the parent's stdout
    pub fn new(launcher: L) -> Self {
        Self::with_output(launcher, LayerStdOut::stdout())
    }

    pub fn with_output(launcher: L, out: LayerStdOut) -> Self {
        info!(
            "Created LifecycleManager with platform: {}",
            launcher.platform_name()
        );
        Self {
            launcher: Arc::new(launcher),
            out,
            state: Mutex::new(ManagerState {
                config: None,
                server: None,
                launches: 0,
            }),
            tracked: std::sync::Mutex::new(None),
            killed_by_pid: AtomicBool::new(false),
        }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Store the launch parameters; replaces any previous configuration
    pub async fn configure(
        &self,
        executable_path: impl AsRef<Path>,
        data_dir_path: impl AsRef<Path>,
    ) -> Result<(), MongodLayerError> {
        let executable_path = executable_path.as_ref();
        let data_dir_path = data_dir_path.as_ref();
        require_non_empty(executable_path, "executablePath")?;
        require_non_empty(data_dir_path, "dataDirPath")?;

        let mut state = self.lock_state().await;
        state.config = Some(ServerConfig::new(executable_path, data_dir_path));
        Ok(())
    }

    /// Launch mongod unless it is already running
    pub async fn start(&self) -> Result<(), MongodLayerError> {
        let mut state = self.lock_state().await;

        if state.server.is_some() {
            return Ok(());
        }

        let config = state.config.as_ref().ok_or(MongodLayerError::NotConfigured)?;
        let spec = LaunchSpec::server(config);

        info!("Starting mongod");
        let handle = self
            .launcher
            .spawn(&spec)
            .await
            .map_err(|source| MongodLayerError::Launch {
                executable: spec.program_name(),
                source,
            })?;

        if let Some(pid) = handle.get_pid() {
            info!("mongod running with PID {}", pid);
        }
        self.set_tracked(handle.get_pid());
        state.server = Some(ManagedProcess::launch(handle, &self.out));
        state.launches += 1;
        Ok(())
    }

    /// Terminate mongod if it is running. Best effort, never fails.
    pub async fn stop(&self) {
        let mut state = self.lock_state().await;

        if let Some(server) = state.server.take() {
            info!("Stopping mongod");
            server.terminate();
            self.set_tracked(None);
        }
    }

    /// Import every job in order; the first failure aborts the batch.
    ///
    /// Without a running server this logs and returns `Ok`.
    pub async fn run_import(
        &self,
        importer_path: impl AsRef<Path>,
        database_name: &str,
        jobs: &ImportJobs,
    ) -> Result<(), MongodLayerError> {
        let importer_path = importer_path.as_ref();
        require_non_empty(importer_path, "importerPath")?;
        require_non_empty(database_name, "databaseName")?;
        require_non_empty(jobs, "jobs")?;

        let state = self.lock_state().await;

        if state.server.is_none() {
            info!("mongod must be running in order to import a file");
            return Ok(());
        }

        info!("Beginning import of db init files into database [{database_name}]");

        for entry in jobs {
            let collection = entry.collection.as_str();
            let file = entry.file.as_path();
            info!(
                "Importing [{}] into collection [{}]",
                file.display(),
                collection
            );

            let spec = LaunchSpec::import(importer_path, database_name, collection, file);
            let mut handle = self.launcher.spawn(&spec).await.map_err(|source| ImportError::Spawn {
                importer: spec.program_name(),
                collection: collection.to_string(),
                source,
            })?;

            let relay = handle
                .take_output()
                .map(|output| RelayTask::spawn(spec.program_name(), output, self.out.clone()));

            let status = handle.wait().await.map_err(|source| ImportError::Wait {
                collection: collection.to_string(),
                source,
            })?;

            if let Some(relay) = relay {
                relay.join_within(RELAY_DRAIN_TIMEOUT).await;
            }

            if status.success() {
                info!("File [{}] loaded OK", file.display());
            } else {
                error!(
                    "Failed to import file [{}], mongoimport exit code [{:?}]",
                    file.display(),
                    status.code()
                );
                return Err(ImportError::ExitStatus {
                    collection: collection.to_string(),
                    file: file.to_path_buf(),
                    code: status.code(),
                }
                .into());
            }
        }

        Ok(())
    }

    /// Synchronous termination for paths that cannot await `stop`, such as
    /// a guard dropped during unwinding.
    pub fn emergency_stop(&self) {
        match self.state.try_lock() {
            Ok(mut state) => {
                self.killed_by_pid.store(false, Ordering::SeqCst);
                if let Some(server) = state.server.take() {
                    warn!("mongod will be stopped by emergency cleanup, not by an explicit stop");
                    server.terminate();
                }
                self.set_tracked(None);
            }
            Err(_) => {
                let pid = self
                    .tracked
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .take();
                if let Some(pid) = pid {
                    self.killed_by_pid.store(true, Ordering::SeqCst);
                    warn!("mongod (PID {pid}) will be killed by emergency cleanup while the manager is busy");
                    self.launcher.emergency_kill(pid);
                }
            }
        }
    }

    pub async fn state(&self) -> LifecycleState {
        let state = self.lock_state().await;
        match (&state.config, &state.server) {
            (_, Some(_)) => LifecycleState::Running,
            (None, None) => LifecycleState::Unconfigured,
            (Some(_), None) if state.launches > 0 => LifecycleState::Stopped,
            (Some(_), None) => LifecycleState::Configured,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.lock_state().await.server.is_some()
    }

    /// Pid of the running server as last recorded by `start`
    pub fn server_pid(&self) -> Option<ProcessId> {
        *self.tracked.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take the lock, first discarding a server record whose process was
    /// already killed by `emergency_stop`
    async fn lock_state(&self) -> tokio::sync::MutexGuard<'_, ManagerState<L::Handle>> {
        let mut state = self.state.lock().await;
        if self.killed_by_pid.swap(false, Ordering::SeqCst) {
            if let Some(server) = state.server.take() {
                info!("Discarding mongod record after emergency cleanup");
                server.terminate();
            }
        }
        state
    }

    fn set_tracked(&self, pid: Option<ProcessId>) {
        *self.tracked.lock().unwrap_or_else(|e| e.into_inner()) = pid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeLauncher;
    use std::ffi::OsString;
    use std::path::PathBuf;

    fn manager(launcher: &FakeLauncher) -> LifecycleManager<FakeLauncher> {
        LifecycleManager::with_output(launcher.clone(), LayerStdOut::sink())
    }

    async fn running(launcher: &FakeLauncher) -> LifecycleManager<FakeLauncher> {
        let manager = manager(launcher);
        manager.configure("/opt/mongo/bin/mongod", "/data/db").await.unwrap();
        manager.start().await.unwrap();
        manager
    }

    fn jobs() -> ImportJobs {
        [("users", "users.json"), ("orders", "orders.json")]
            .into_iter()
            .collect()
    }

    #[tokio::test]
    async fn test_configure_rejects_empty_parameters() {
        let launcher = FakeLauncher::new();
        let manager = manager(&launcher);

        let err = manager.configure("", "/data/db").await.unwrap_err();
        assert_eq!(err.parameter(), Some("executablePath"));

        let err = manager.configure("/opt/mongo/bin/mongod", "").await.unwrap_err();
        assert_eq!(err.parameter(), Some("dataDirPath"));

        assert_eq!(manager.state().await, LifecycleState::Unconfigured);
    }

    #[tokio::test]
    async fn test_start_before_configure_fails() {
        let launcher = FakeLauncher::new();
        let manager = manager(&launcher);

        let err = manager.start().await.unwrap_err();
        assert!(matches!(err, MongodLayerError::NotConfigured));
        assert_eq!(launcher.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let launcher = FakeLauncher::new();
        let manager = running(&launcher).await;
        let pid = manager.server_pid();

        manager.start().await.unwrap();
        manager.start().await.unwrap();

        assert_eq!(launcher.spawn_count(), 1);
        assert_eq!(manager.server_pid(), pid);
        assert_eq!(manager.state().await, LifecycleState::Running);
        assert_eq!(
            launcher.spawns()[0].args,
            vec![OsString::from("--dbpath"), OsString::from("/data/db")]
        );
    }

    #[tokio::test]
    async fn test_stop_without_server_is_noop() {
        let launcher = FakeLauncher::new();
        let manager = manager(&launcher);

        manager.stop().await;
        manager.stop().await;

        assert_eq!(launcher.kill_count(), 0);
        assert!(!manager.is_running().await);
    }

    #[tokio::test]
    async fn test_stop_then_start_launches_new_process() {
        let launcher = FakeLauncher::new();
        let manager = running(&launcher).await;
        let first = manager.server_pid().unwrap();

        manager.stop().await;
        assert_eq!(manager.state().await, LifecycleState::Stopped);
        assert_eq!(manager.server_pid(), None);
        assert_eq!(launcher.kill_count(), 1);
        assert_eq!(launcher.live_servers(), 0);

        manager.start().await.unwrap();
        let second = manager.server_pid().unwrap();
        assert_ne!(first, second);
        assert_eq!(launcher.spawn_count(), 2);
        assert_eq!(launcher.live_servers(), 1);
    }

    #[tokio::test]
    async fn test_reconfigure_keeps_running_server() {
        let launcher = FakeLauncher::new();
        let manager = running(&launcher).await;

        manager.configure("/opt/mongo/bin/mongod", "/tmp/other").await.unwrap();
        assert_eq!(manager.state().await, LifecycleState::Running);

        manager.stop().await;
        manager.start().await.unwrap();
        assert_eq!(
            launcher.spawns()[1].args,
            vec![OsString::from("--dbpath"), OsString::from("/tmp/other")]
        );
    }

    #[tokio::test]
    async fn test_launch_failure() {
        let launcher = FakeLauncher::new();
        launcher.fail_spawns(true);
        let manager = manager(&launcher);
        manager.configure("/missing/mongod", "/data/db").await.unwrap();

        let err = manager.start().await.unwrap_err();
        assert!(matches!(err, MongodLayerError::Launch { ref executable, .. } if executable == "/missing/mongod"));
        assert!(!manager.is_running().await);

        // The lock was released on the error path
        launcher.fail_spawns(false);
        manager.start().await.unwrap();
        assert!(manager.is_running().await);
    }

    #[tokio::test]
    async fn test_import_runs_in_order() {
        let launcher = FakeLauncher::new();
        let manager = running(&launcher).await;

        manager
            .run_import("/opt/mongo/bin/mongoimport", "shop", &jobs())
            .await
            .unwrap();

        let imports = launcher.import_spawns();
        assert_eq!(imports.len(), 2);
        assert_eq!(
            imports[0].args,
            ["--db", "shop", "--collection", "users", "users.json"]
                .map(OsString::from)
                .to_vec()
        );
        assert_eq!(
            imports[1].args,
            ["--db", "shop", "--collection", "orders", "orders.json"]
                .map(OsString::from)
                .to_vec()
        );
        assert_eq!(imports[0].program, PathBuf::from("/opt/mongo/bin/mongoimport"));
    }

    #[tokio::test]
    async fn test_import_aborts_on_first_failure() {
        let launcher = FakeLauncher::new();
        launcher.fail_collection("users", 1);
        let manager = running(&launcher).await;

        let err = manager
            .run_import("/opt/mongo/bin/mongoimport", "shop", &jobs())
            .await
            .unwrap_err();

        match err {
            MongodLayerError::Import(ImportError::ExitStatus { collection, file, code }) => {
                assert_eq!(collection, "users");
                assert_eq!(file, PathBuf::from("users.json"));
                assert_eq!(code, Some(1));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(launcher.import_spawns().len(), 1);
        assert!(manager.is_running().await);
    }

    #[tokio::test]
    async fn test_import_failure_midway_keeps_earlier_entries() {
        let launcher = FakeLauncher::new();
        launcher.fail_collection("orders", 7);
        let manager = running(&launcher).await;

        let jobs: ImportJobs = [("users", "u.json"), ("orders", "o.json"), ("audit", "a.json")]
            .into_iter()
            .collect();
        let err = manager
            .run_import("/opt/mongo/bin/mongoimport", "shop", &jobs)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            MongodLayerError::Import(ImportError::ExitStatus { code: Some(7), .. })
        ));
        let collections: Vec<_> = launcher
            .import_spawns()
            .iter()
            .map(|spec| spec.args[3].clone())
            .collect();
        assert_eq!(collections, [OsString::from("users"), OsString::from("orders")]);
    }

    #[tokio::test]
    async fn test_import_without_server_is_soft_noop() {
        let launcher = FakeLauncher::new();
        let manager = manager(&launcher);
        manager.configure("/opt/mongo/bin/mongod", "/data/db").await.unwrap();

        manager
            .run_import("/opt/mongo/bin/mongoimport", "shop", &jobs())
            .await
            .unwrap();

        assert_eq!(launcher.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_import_validates_parameters_first() {
        let launcher = FakeLauncher::new();
        let manager = running(&launcher).await;

        let err = manager
            .run_import("/opt/mongo/bin/mongoimport", "shop", &ImportJobs::new())
            .await
            .unwrap_err();
        assert_eq!(err.parameter(), Some("jobs"));

        let err = manager.run_import("", "shop", &jobs()).await.unwrap_err();
        assert_eq!(err.parameter(), Some("importerPath"));

        let err = manager
            .run_import("/opt/mongo/bin/mongoimport", "", &jobs())
            .await
            .unwrap_err();
        assert_eq!(err.parameter(), Some("databaseName"));

        assert!(launcher.import_spawns().is_empty());
    }

    #[tokio::test]
    async fn test_import_spawn_failure() {
        let launcher = FakeLauncher::new();
        let manager = running(&launcher).await;
        launcher.fail_spawns(true);

        let err = manager
            .run_import("/opt/mongo/bin/mongoimport", "shop", &jobs())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MongodLayerError::Import(ImportError::Spawn { ref collection, .. }) if collection == "users"
        ));
    }

    #[tokio::test]
    async fn test_emergency_stop() {
        let launcher = FakeLauncher::new();
        let manager = running(&launcher).await;

        manager.emergency_stop();

        assert_eq!(launcher.live_servers(), 0);
        assert!(!manager.is_running().await);
        assert_eq!(manager.server_pid(), None);

        // A second call has nothing left to do
        manager.emergency_stop();
        assert_eq!(launcher.kill_count(), 1);
        assert!(launcher.emergency_kills().is_empty());
    }

    #[tokio::test]
    async fn test_emergency_stop_while_locked_kills_by_pid() {
        let launcher = FakeLauncher::new();
        let manager = running(&launcher).await;
        let pid = manager.server_pid().unwrap();

        let guard = manager.state.lock().await;
        manager.emergency_stop();
        drop(guard);

        assert_eq!(launcher.emergency_kills(), vec![pid]);
        assert_eq!(manager.server_pid(), None);
        assert!(!manager.is_running().await);
        assert_eq!(manager.state().await, LifecycleState::Stopped);

        // The next start launches a fresh server
        manager.start().await.unwrap();
        assert_eq!(launcher.spawn_count(), 2);
        assert_ne!(manager.server_pid(), Some(pid));
        assert!(manager.is_running().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_start_stop_never_leaks_a_server() {
        let launcher = FakeLauncher::new();
        let manager = Arc::new(manager(&launcher));
        manager.configure("/opt/mongo/bin/mongod", "/data/db").await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..64 {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move {
                if i % 3 == 0 {
                    manager.stop().await;
                } else {
                    manager.start().await.unwrap();
                }
                tokio::task::yield_now().await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(launcher.max_live_servers() <= 1);
        let running = manager.is_running().await;
        assert_eq!(launcher.live_servers(), usize::from(running));
        assert_eq!(manager.server_pid().is_some(), running);
    }
}
