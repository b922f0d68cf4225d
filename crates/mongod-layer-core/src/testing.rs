//! In-memory [`ProcessLauncher`] that records every spawn instead of
//! starting real processes.

use crate::process::{
    LaunchSpec, ProcessError, ProcessHandle, ProcessId, ProcessLauncher, ProcessOutput,
    ProcessStatus,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct FakeState {
    spawns: Mutex<Vec<LaunchSpec>>,
    exit_codes: Mutex<HashMap<String, i32>>,
    emergency_kills: Mutex<Vec<ProcessId>>,
    fail_spawns: AtomicBool,
    next_pid: AtomicU32,
    live_servers: AtomicUsize,
    max_live_servers: AtomicUsize,
    kills: AtomicUsize,
}

/// Servers (spawned with `--dbpath`) run until killed; importers exit at once
/// with the code registered for their collection, 0 by default.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    state: Arc<FakeState>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following spawn fail until called again with `false`
    pub fn fail_spawns(&self, fail: bool) {
        self.state.fail_spawns.store(fail, Ordering::SeqCst);
    }

    /// Importing `collection` exits with `code`
    pub fn fail_collection(&self, collection: &str, code: i32) {
        lock(&self.state.exit_codes).insert(collection.to_string(), code);
    }

    pub fn spawns(&self) -> Vec<LaunchSpec> {
        lock(&self.state.spawns).clone()
    }

    pub fn spawn_count(&self) -> usize {
        lock(&self.state.spawns).len()
    }

    pub fn import_spawns(&self) -> Vec<LaunchSpec> {
        self.spawns()
            .into_iter()
            .filter(|spec| !is_server(spec))
            .collect()
    }

    pub fn live_servers(&self) -> usize {
        self.state.live_servers.load(Ordering::SeqCst)
    }

    pub fn max_live_servers(&self) -> usize {
        self.state.max_live_servers.load(Ordering::SeqCst)
    }

    pub fn kill_count(&self) -> usize {
        self.state.kills.load(Ordering::SeqCst)
    }

    pub fn emergency_kills(&self) -> Vec<ProcessId> {
        lock(&self.state.emergency_kills).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn is_server(spec: &LaunchSpec) -> bool {
    spec.args.first().is_some_and(|arg| arg == "--dbpath")
}

pub struct FakeHandle {
    pid: ProcessId,
    command: String,
    server: bool,
    exit_code: i32,
    killed: bool,
    output: Option<ProcessOutput>,
    state: Arc<FakeState>,
}

#[async_trait]
impl ProcessHandle for FakeHandle {
    fn get_pid(&self) -> Option<ProcessId> {
        Some(self.pid)
    }

    fn get_command(&self) -> &str {
        &self.command
    }

    fn take_output(&mut self) -> Option<ProcessOutput> {
        self.output.take()
    }

    async fn wait(&mut self) -> Result<ProcessStatus, ProcessError> {
        if self.killed {
            Ok(ProcessStatus::Terminated)
        } else if self.server {
            std::future::pending().await
        } else {
            Ok(ProcessStatus::Exited {
                code: Some(self.exit_code),
            })
        }
    }

    fn kill(&mut self) -> Result<(), ProcessError> {
        if !self.killed {
            self.killed = true;
            self.state.kills.fetch_add(1, Ordering::SeqCst);
            if self.server {
                self.state.live_servers.fetch_sub(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    type Handle = FakeHandle;

    async fn spawn(&self, spec: &LaunchSpec) -> Result<Self::Handle, ProcessError> {
        if self.state.fail_spawns.load(Ordering::SeqCst) {
            return Err(ProcessError::SpawnFailed(format!(
                "{}: No such file or directory",
                spec.program_name()
            )));
        }

        lock(&self.state.spawns).push(spec.clone());
        let pid = ProcessId(1000 + self.state.next_pid.fetch_add(1, Ordering::SeqCst));
        let server = is_server(spec);

        if server {
            let live = self.state.live_servers.fetch_add(1, Ordering::SeqCst) + 1;
            self.state.max_live_servers.fetch_max(live, Ordering::SeqCst);
        }

        let collection = spec
            .args
            .get(3)
            .map(|arg| arg.to_string_lossy().into_owned())
            .unwrap_or_default();
        let exit_code = lock(&self.state.exit_codes)
            .get(&collection)
            .copied()
            .unwrap_or(0);

        let banner = format!("{} started\n", spec.program_name());
        let output = ProcessOutput::new(
            Some(Box::new(Cursor::new(banner.into_bytes()))),
            Some(Box::new(tokio::io::empty())),
        );

        Ok(FakeHandle {
            pid,
            command: spec.program_name(),
            server,
            exit_code,
            killed: false,
            output: Some(output),
            state: self.state.clone(),
        })
    }

    fn emergency_kill(&self, pid: ProcessId) {
        lock(&self.state.emergency_kills).push(pid);
    }

    fn platform_name(&self) -> &'static str {
        "fake"
    }
}
