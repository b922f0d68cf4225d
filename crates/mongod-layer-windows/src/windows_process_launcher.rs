use async_trait::async_trait;
use mongod_layer_core::{
    LaunchSpec, OutputStream, ProcessError, ProcessHandle, ProcessId, ProcessLauncher,
    ProcessOutput, ProcessStatus,
};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Windows-specific process handle implementation; dropping it before the
/// child was reaped or killed takes down the child's tree
pub struct WindowsProcessHandle {
    child: Child,
    command: String,
    killed: bool,
}

impl WindowsProcessHandle {
    pub fn new(child: Child, command: String) -> Self {
        Self {
            child,
            command,
            killed: false,
        }
    }
}

impl Drop for WindowsProcessHandle {
    fn drop(&mut self) {
        if self.killed {
            return;
        }
        if let Some(pid) = self.get_pid() {
            debug!(pid=%pid, command=%self.command, "Killing abandoned process");
            let _ = spawn_taskkill(pid);
            let _ = self.child.start_kill();
        }
    }
}

#[async_trait]
impl ProcessHandle for WindowsProcessHandle {
    fn get_pid(&self) -> Option<ProcessId> {
        self.child.id().map(ProcessId::from)
    }

    fn get_command(&self) -> &str {
        &self.command
    }

    fn take_output(&mut self) -> Option<ProcessOutput> {
        let stdout = self.child.stdout.take().map(|s| Box::new(s) as OutputStream);
        let stderr = self.child.stderr.take().map(|s| Box::new(s) as OutputStream);
        if stdout.is_none() && stderr.is_none() {
            return None;
        }
        Some(ProcessOutput::new(stdout, stderr))
    }

    async fn wait(&mut self) -> Result<ProcessStatus, ProcessError> {
        let status = self.child.wait().await?;
        Ok(ProcessStatus::from(status))
    }

    fn kill(&mut self) -> Result<(), ProcessError> {
        let Some(pid) = self.get_pid() else {
            return Ok(());
        };
        self.killed = true;

        // taskkill /T takes the whole tree; the direct kill is the fallback
        if let Err(e) = spawn_taskkill(pid) {
            warn!(pid=%pid, error=%e, "taskkill failed, terminating process only");
        }
        self.child.start_kill().map_err(ProcessError::from)
    }
}

/// Fire-and-forget `taskkill /F /T /PID <pid>`
fn spawn_taskkill(pid: ProcessId) -> std::io::Result<()> {
    std::process::Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.0.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
}

/// Windows process launcher; children get their own console process group
#[derive(Debug, Default, Clone)]
pub struct WindowsProcessLauncher;

impl WindowsProcessLauncher {
    pub fn new() -> Self {
        info!("Initializing Windows process launcher");
        Self
    }
}

#[async_trait]
impl ProcessLauncher for WindowsProcessLauncher {
    type Handle = WindowsProcessHandle;

    async fn spawn(&self, spec: &LaunchSpec) -> Result<Self::Handle, ProcessError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(windows)]
        cmd.creation_flags(windows::Win32::System::Threading::CREATE_NEW_PROCESS_GROUP.0);

        let child = cmd.spawn().map_err(|e| {
            ProcessError::SpawnFailed(format!("{}: {}", spec.program.display(), e))
        })?;

        if let Some(pid) = child.id() {
            info!(pid=%pid, command=%spec.program.display(), "Spawned Windows process");
        }

        Ok(WindowsProcessHandle::new(child, spec.program_name()))
    }

    fn emergency_kill(&self, pid: ProcessId) {
        if let Err(e) = std::process::Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.0.to_string()])
            .output()
        {
            warn!(pid=%pid, error=%e, "Emergency cleanup failed for process");
        }
    }

    fn platform_name(&self) -> &'static str {
        "windows"
    }
}
