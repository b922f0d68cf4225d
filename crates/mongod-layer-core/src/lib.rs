//! mongod layer core - platform-independent lifecycle management
//!
//! This crate provides the process traits, launch specifications, errors,
//! configuration and the [`LifecycleManager`] shared by the platform crates.

pub mod config;
pub mod error;
pub mod manager;
pub mod process;
pub mod stdio;
pub mod validation;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::*;
pub use error::*;
pub use manager::*;
pub use process::*;
pub use stdio::*;
pub use validation::*;
