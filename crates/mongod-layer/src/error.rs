use mongod_layer_core::MongodLayerError;
use thiserror::Error;

/// Errors of the orchestration layer around the lifecycle manager
#[derive(Error, Debug)]
pub enum LayerError {
    #[error(transparent)]
    Mongod(#[from] MongodLayerError),

    #[error("Interrupted by {0}")]
    Interrupted(&'static str),

    #[error("mongod did not accept connections on {address} after {attempts} attempts")]
    NotReady { address: String, attempts: usize },

    #[error("Failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),

    #[error("Failed to run {command}: {source}")]
    Command {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl LayerError {
    /// Exit code the binary reports for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            LayerError::Interrupted(_) => 130,
            _ => 1,
        }
    }
}
