pub mod cli;
pub mod error;
pub mod factory;
pub mod guard;
pub mod orchestrator;
pub mod readiness;

pub use error::LayerError;
pub use factory::{
    PlatformLauncher, PlatformLauncherFactory, PlatformLifecycleManager, create_lifecycle_manager,
};
pub use guard::{ServerGuard, shutdown_signal};
pub use orchestrator::{Orchestrator, run_command};
pub use readiness::{FixedDelay, PortProbe, ReadinessProbe, probe_for};

// Re-export core functionality
pub use mongod_layer_core::*;
