use mongod_layer_core::LifecycleManager;

/// Launcher for the platform this binary was compiled for
#[cfg(unix)]
pub type PlatformLauncher = mongod_layer_unix::UnixProcessLauncher;

#[cfg(windows)]
pub type PlatformLauncher = mongod_layer_windows::WindowsProcessLauncher;

pub type PlatformLifecycleManager = LifecycleManager<PlatformLauncher>;

/// Platform-independent factory that selects the appropriate implementation at compile time
pub struct PlatformLauncherFactory;

impl PlatformLauncherFactory {
    pub fn create_process_launcher() -> PlatformLauncher {
        #[cfg(unix)]
        return mongod_layer_unix::UnixProcessLauncherFactory::create_process_launcher();

        #[cfg(windows)]
        return mongod_layer_windows::WindowsProcessLauncherFactory::create_process_launcher();
    }

    pub fn platform_name() -> &'static str {
        #[cfg(unix)]
        return mongod_layer_unix::UnixProcessLauncherFactory::platform_name();

        #[cfg(windows)]
        return mongod_layer_windows::WindowsProcessLauncherFactory::platform_name();
    }
}

/// A lifecycle manager relaying to stdout, using the platform launcher
pub fn create_lifecycle_manager() -> PlatformLifecycleManager {
    LifecycleManager::new(PlatformLauncherFactory::create_process_launcher())
}
