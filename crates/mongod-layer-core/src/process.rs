use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;

use crate::config::ServerConfig;

/// Unique identifier for a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        ProcessId(pid)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a process after it stopped running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Process exited on its own; `code` is None when the platform reports no code
    Exited { code: Option<i32> },
    /// Process was terminated by a signal (Unix) or forcibly terminated (Windows)
    Terminated,
}

impl ProcessStatus {
    pub fn code(&self) -> Option<i32> {
        match self {
            ProcessStatus::Exited { code } => *code,
            ProcessStatus::Terminated => None,
        }
    }

    /// Only a clean exit with code 0 counts as success
    pub fn success(&self) -> bool {
        self.code() == Some(0)
    }
}

impl From<std::process::ExitStatus> for ProcessStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        match status.code() {
            Some(code) => ProcessStatus::Exited { code: Some(code) },
            None => ProcessStatus::Terminated,
        }
    }
}

/// Error types for process operations
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),
    #[error("Process not found: {0}")]
    ProcessNotFound(ProcessId),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Other error: {0}")]
    Other(String),
}

/// Program and argument vector for one child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// `<executable> --dbpath <dataDir>`
    pub fn server(config: &ServerConfig) -> Self {
        Self::new(&config.executable_path)
            .arg("--dbpath")
            .arg(&config.data_dir_path)
    }

    /// `<importer> --db <database> --collection <collection> <file>`
    pub fn import(importer: &Path, database: &str, collection: &str, file: &Path) -> Self {
        Self::new(importer)
            .arg("--db")
            .arg(database)
            .arg("--collection")
            .arg(collection)
            .arg(file)
    }

    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// The two output streams of a child, relayed into the same sink
pub struct ProcessOutput {
    pub stdout: Option<OutputStream>,
    pub stderr: Option<OutputStream>,
}

impl ProcessOutput {
    pub fn new(stdout: Option<OutputStream>, stderr: Option<OutputStream>) -> Self {
        Self { stdout, stderr }
    }
}

/// Trait representing a handle to a running process
#[async_trait]
pub trait ProcessHandle: Send {
    /// Get the process ID (None if process has exited)
    fn get_pid(&self) -> Option<ProcessId>;

    /// Get the program that started this process
    fn get_command(&self) -> &str;

    /// Take the output streams; subsequent calls return None
    fn take_output(&mut self) -> Option<ProcessOutput>;

    /// Wait for the process to exit
    async fn wait(&mut self) -> Result<ProcessStatus, ProcessError>;

    /// Request forcible termination without waiting for the exit
    fn kill(&mut self) -> Result<(), ProcessError>;
}

/// Platform seam for spawning child processes
#[async_trait]
pub trait ProcessLauncher: Send + Sync + 'static {
    /// The type of process handle this launcher produces
    type Handle: ProcessHandle + 'static;

    /// Spawn `spec` with stdin detached and both output streams piped
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Self::Handle, ProcessError>;

    /// Synchronous best-effort kill by pid, usable where no async runtime is available
    fn emergency_kill(&self, pid: ProcessId);

    /// Get the platform name for logging and debugging
    fn platform_name(&self) -> &'static str;
}
