mod unix_process_launcher;

pub use unix_process_launcher::{UnixProcessHandle, UnixProcessLauncher};

pub struct UnixProcessLauncherFactory;

impl UnixProcessLauncherFactory {
    pub fn create_process_launcher() -> UnixProcessLauncher {
        UnixProcessLauncher::new()
    }

    pub fn platform_name() -> &'static str {
        "Unix"
    }
}
