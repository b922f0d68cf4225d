//! Command line of the `mongod-layer` binary.
//!
//! Kept out of `main.rs` so the parsing and the merge with a config file can
//! be tested without spawning anything.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use mongod_layer_core::LayerConfig;
use std::path::PathBuf;

/// Runs mongod for the duration of a command, loading seed data first.
#[derive(Parser, Debug)]
#[command(name = "mongod-layer", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start mongod, import the configured files, then run a command or
    /// hold the server until interrupted.
    Run(RunArgs),
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// JSON config file; flags given here override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Absolute path to the mongod executable.
    #[arg(long)]
    pub executable_path: Option<PathBuf>,

    /// Database directory handed to `--dbpath`.
    #[arg(long)]
    pub data_dir_path: Option<PathBuf>,

    /// Absolute path to the mongoimport executable.
    #[arg(long)]
    pub importer_path: Option<PathBuf>,

    /// Database the files are imported into.
    #[arg(long)]
    pub database_name: Option<String>,

    /// `COLLECTION=FILE`, repeatable; imported in the order given.
    #[arg(long = "import", value_name = "COLLECTION=FILE", value_parser = parse_import)]
    pub imports: Vec<(String, PathBuf)>,

    /// Seconds to wait after start when no ready port is set.
    #[arg(long)]
    pub startup_wait_secs: Option<u64>,

    /// Wait until mongod accepts TCP connections on this local port.
    #[arg(long)]
    pub ready_port: Option<u16>,

    /// Enable debug logging.
    #[arg(long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,

    /// Command and arguments (after `--`) to run while mongod is up.
    #[arg(trailing_var_arg = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    /// Load the config file, if any, and apply the flags on top of it
    pub fn to_config(&self) -> Result<LayerConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                LayerConfig::from_json(&json)
                    .with_context(|| format!("Invalid config file {}", path.display()))?
            }
            None => LayerConfig::default(),
        };

        if let Some(path) = &self.executable_path {
            config.executable_path = Some(path.clone());
        }
        if let Some(path) = &self.data_dir_path {
            config.data_dir_path = path.clone();
        }
        if let Some(path) = &self.importer_path {
            config.importer_path = Some(path.clone());
        }
        if let Some(name) = &self.database_name {
            config.database_name = Some(name.clone());
        }
        if let Some(secs) = self.startup_wait_secs {
            config.startup_wait_secs = secs;
        }
        if let Some(port) = self.ready_port {
            config.ready_port = Some(port);
        }
        config.jobs.extend(self.imports.iter().cloned());

        Ok(config)
    }
}

/// Parse `COLLECTION=FILE`
pub fn parse_import(value: &str) -> Result<(String, PathBuf)> {
    let Some((collection, file)) = value.split_once('=') else {
        bail!("expected COLLECTION=FILE, got `{value}`");
    };
    if collection.is_empty() || file.is_empty() {
        bail!("expected COLLECTION=FILE, got `{value}`");
    }
    Ok((collection.to_string(), PathBuf::from(file)))
}
