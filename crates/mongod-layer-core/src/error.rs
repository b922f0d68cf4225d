use crate::process::ProcessError;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Core error types for mongod lifecycle operations
#[derive(Error, Debug)]
pub enum MongodLayerError {
    #[error("Configuration parameter <{0}> must be specified")]
    Configuration(String),

    #[error("mongod has not been configured")]
    NotConfigured,

    #[error("Failed to execute {executable}: {source}")]
    Launch {
        executable: String,
        #[source]
        source: ProcessError,
    },

    #[error(transparent)]
    Import(#[from] ImportError),
}

/// Failures of a single entry of an import batch
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Failed to execute {importer} for collection [{collection}]: {source}")]
    Spawn {
        importer: String,
        collection: String,
        #[source]
        source: ProcessError,
    },

    #[error("Interrupted while waiting for import of collection [{collection}]: {source}")]
    Wait {
        collection: String,
        #[source]
        source: ProcessError,
    },

    #[error(
        "Failed to load db init file [{}] into collection [{collection}], exit code {}",
        display_path(.file),
        display_code(.code)
    )]
    ExitStatus {
        collection: String,
        file: PathBuf,
        code: Option<i32>,
    },
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

impl MongodLayerError {
    pub fn configuration(parameter: impl Into<String>) -> Self {
        MongodLayerError::Configuration(parameter.into())
    }

    /// Name of the missing parameter for configuration errors
    pub fn parameter(&self) -> Option<&str> {
        match self {
            MongodLayerError::Configuration(name) => Some(name),
            _ => None,
        }
    }

    /// Caller bugs that will fail the same way on every attempt
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            MongodLayerError::Configuration(_) | MongodLayerError::NotConfigured
        )
    }
}
