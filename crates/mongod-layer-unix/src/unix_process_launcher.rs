#[cfg(unix)]
mod unix_impl {
    use async_trait::async_trait;
    use mongod_layer_core::{
        LaunchSpec, OutputStream, ProcessError, ProcessHandle, ProcessId, ProcessLauncher,
        ProcessOutput, ProcessStatus,
    };
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use std::process::Stdio;
    use tokio::process::{Child, Command};
    use tracing::{debug, info, warn};

    /// Unix-specific process handle implementation
    ///
    /// Dropping a handle whose child was neither reaped nor killed kills its
    /// process group, so an importer abandoned mid-batch does not outlive us.
    pub struct UnixProcessHandle {
        child: Child,
        command: String,
        killed: bool,
    }

    impl UnixProcessHandle {
        pub fn new(child: Child, command: String) -> Self {
            Self {
                child,
                command,
                killed: false,
            }
        }
    }

    impl Drop for UnixProcessHandle {
        fn drop(&mut self) {
            if self.killed {
                return;
            }
            if let Some(pid) = self.child.id() {
                debug!("Killing abandoned {} (PID: {})", self.command, pid);
                let _ = signal::killpg(NixPid::from_raw(pid as i32), Signal::SIGKILL);
            }
        }
    }

    #[async_trait]
    impl ProcessHandle for UnixProcessHandle {
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
            // None once the child has been reaped
            let Some(pid) = self.child.id() else {
                return Ok(());
            };
            let pgid = NixPid::from_raw(pid as i32);
            self.killed = true;

            match signal::killpg(pgid, Signal::SIGKILL) {
                Ok(()) => {
                    info!("Sent SIGKILL to process group {}", pid);
                    Ok(())
                }
                Err(Errno::ESRCH) => {
                    info!("Process group {} not found (already terminated)", pid);
                    Ok(())
                }
                Err(e) => {
                    warn!(
                        "Failed to send SIGKILL to process group {}: {}, killing process only",
                        pid, e
                    );
                    self.child.start_kill().map_err(ProcessError::from)
                }
            }
        }
    }

    /// Spawns children in their own process group so a kill reaches
    /// everything they started
    #[derive(Debug, Default, Clone)]
    pub struct UnixProcessLauncher;

    impl UnixProcessLauncher {
        pub fn new() -> Self {
            info!("Initializing Unix process launcher");
            Self
        }
    }

    #[async_trait]
    impl ProcessLauncher for UnixProcessLauncher {
        type Handle = UnixProcessHandle;

        async fn spawn(&self, spec: &LaunchSpec) -> Result<Self::Handle, ProcessError> {
            let mut cmd = Command::new(&spec.program);
            cmd.args(&spec.args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .process_group(0);

            let child = cmd.spawn().map_err(|e| {
                ProcessError::SpawnFailed(format!("{}: {}", spec.program.display(), e))
            })?;

            if let Some(pid) = child.id() {
                info!(
                    "Spawned Unix process: {} (PID: {}) with args: {:?}",
                    spec.program.display(),
                    pid,
                    spec.args
                );
            }

            Ok(UnixProcessHandle::new(child, spec.program_name()))
        }

        fn emergency_kill(&self, pid: ProcessId) {
            let nix_pid = NixPid::from_raw(pid.0 as i32);

            if let Err(e) = signal::killpg(nix_pid, Signal::SIGKILL) {
                if e == Errno::ESRCH {
                    info!("Process group {} not found (already terminated)", pid);
                    return;
                }
                warn!("Failed to send SIGKILL to process group {}: {}", pid, e);

                if let Err(e) = signal::kill(nix_pid, Signal::SIGKILL) {
                    tracing::error!("Failed to send SIGKILL to process {}: {}", pid, e);
                }
            }
        }

        fn platform_name(&self) -> &'static str {
            "unix"
        }
    }
}

// Re-export the Unix implementation when on Unix systems
#[cfg(unix)]
pub use unix_impl::{UnixProcessHandle, UnixProcessLauncher};

// Provide stub implementations for non-Unix systems
#[cfg(not(unix))]
pub struct UnixProcessHandle;

#[cfg(not(unix))]
#[derive(Debug, Default, Clone)]
pub struct UnixProcessLauncher;

#[cfg(not(unix))]
impl UnixProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}
