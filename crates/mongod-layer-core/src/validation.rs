//! Presence checks for required parameters.

use crate::MongodLayerError;
use crate::config::ImportJobs;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Values that can be absent or empty
pub trait Presence {
    fn is_present(&self) -> bool;
}

impl Presence for str {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

impl Presence for String {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

impl Presence for Path {
    fn is_present(&self) -> bool {
        !self.as_os_str().is_empty()
    }
}

impl Presence for PathBuf {
    fn is_present(&self) -> bool {
        self.as_path().is_present()
    }
}

impl Presence for ImportJobs {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

impl<K, V, S> Presence for HashMap<K, V, S> {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

impl<T> Presence for Vec<T> {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

impl<T: Presence + ?Sized> Presence for &T {
    fn is_present(&self) -> bool {
        (**self).is_present()
    }
}

impl<T: Presence> Presence for Option<T> {
    fn is_present(&self) -> bool {
        self.as_ref().is_some_and(Presence::is_present)
    }
}

/// Fails with a configuration error naming `name` when `value` is absent or empty
pub fn require_non_empty<T: Presence + ?Sized>(value: &T, name: &str) -> Result<(), MongodLayerError> {
    if value.is_present() {
        Ok(())
    } else {
        Err(MongodLayerError::configuration(name))
    }
}
