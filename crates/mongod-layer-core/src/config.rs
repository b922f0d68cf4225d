use derive_builder::Builder;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};

/// Launch parameters for the database server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub executable_path: PathBuf,
    pub data_dir_path: PathBuf,
}

impl ServerConfig {
    pub fn new(executable_path: impl Into<PathBuf>, data_dir_path: impl Into<PathBuf>) -> Self {
        Self {
            executable_path: executable_path.into(),
            data_dir_path: data_dir_path.into(),
        }
    }
}

/// One collection and the file imported into it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportEntry {
    pub collection: String,
    pub file: PathBuf,
}

/// Ordered mapping of collection name to data file.
///
/// Keys are unique. Re-inserting a collection replaces its file but keeps
/// its position, so the batch order is always the order of first insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportJobs {
    entries: Vec<ImportEntry>,
}

impl ImportJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; returns the previous file for the collection
    pub fn insert(
        &mut self,
        collection: impl Into<String>,
        file: impl Into<PathBuf>,
    ) -> Option<PathBuf> {
        let collection = collection.into();
        let file = file.into();
        match self.entries.iter_mut().find(|e| e.collection == collection) {
            Some(entry) => Some(std::mem::replace(&mut entry.file, file)),
            None => {
                self.entries.push(ImportEntry { collection, file });
                None
            }
        }
    }

    pub fn get(&self, collection: &str) -> Option<&Path> {
        self.entries
            .iter()
            .find(|e| e.collection == collection)
            .map(|e| e.file.as_path())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ImportEntry> {
        self.entries.iter()
    }

    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.collection.as_str())
    }
}

impl<K: Into<String>, V: Into<PathBuf>> FromIterator<(K, V)> for ImportJobs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut jobs = ImportJobs::new();
        jobs.extend(iter);
        jobs
    }
}

impl<K: Into<String>, V: Into<PathBuf>> Extend<(K, V)> for ImportJobs {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (collection, file) in iter {
            self.insert(collection, file);
        }
    }
}

impl<'a> IntoIterator for &'a ImportJobs {
    type Item = &'a ImportEntry;
    type IntoIter = std::slice::Iter<'a, ImportEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl Serialize for ImportJobs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.collection, &entry.file)?;
        }
        map.end()
    }
}

// Visits the map entry by entry so document order survives deserialization.
struct ImportJobsVisitor;

impl<'de> Visitor<'de> for ImportJobsVisitor {
    type Value = ImportJobs;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map of collection names to data files")
    }

    fn visit_map<M: MapAccess<'de>>(self, mut access: M) -> Result<Self::Value, M::Error> {
        let mut jobs = ImportJobs::new();
        while let Some((collection, file)) = access.next_entry::<String, PathBuf>()? {
            jobs.insert(collection, file);
        }
        Ok(jobs)
    }
}

impl<'de> Deserialize<'de> for ImportJobs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(ImportJobsVisitor)
    }
}

/// Orchestrator configuration: what to launch, what to import, how long to wait
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
#[builder(setter(into, strip_option))]
pub struct LayerConfig {
    /// Absolute path to the mongod executable
    #[builder(default)]
    pub executable_path: Option<PathBuf>,

    /// Database directory handed to `--dbpath`
    #[serde(default = "default_data_dir_path")]
    #[builder(default = "default_data_dir_path()")]
    pub data_dir_path: PathBuf,

    /// Absolute path to the mongoimport executable
    #[serde(default)]
    #[builder(default)]
    pub importer_path: Option<PathBuf>,

    /// Database the files are imported into
    #[serde(default)]
    #[builder(default)]
    pub database_name: Option<String>,

    /// Collection name to data file, imported in this order
    #[serde(default)]
    #[builder(default)]
    #[builder(setter(custom))]
    pub jobs: ImportJobs,

    /// Fixed delay between start and import when no ready port is set
    #[serde(default = "default_startup_wait_secs")]
    #[builder(default = "default_startup_wait_secs()")]
    pub startup_wait_secs: u64,

    /// Local port polled for readiness instead of the fixed delay
    #[serde(default)]
    #[builder(default)]
    pub ready_port: Option<u16>,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            executable_path: None,
            data_dir_path: default_data_dir_path(),
            importer_path: None,
            database_name: None,
            jobs: ImportJobs::default(),
            startup_wait_secs: default_startup_wait_secs(),
            ready_port: None,
        }
    }
}

impl LayerConfig {
    pub fn builder() -> LayerConfigBuilder {
        LayerConfigBuilder::default()
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn startup_wait(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.startup_wait_secs)
    }
}

impl LayerConfigBuilder {
    pub fn job<K: Into<String>, V: Into<PathBuf>>(&mut self, collection: K, file: V) -> &mut Self {
        let jobs = self.jobs.get_or_insert_with(ImportJobs::new);
        jobs.insert(collection, file);
        self
    }

    pub fn jobs<K: Into<String>, V: Into<PathBuf>, I: IntoIterator<Item = (K, V)>>(
        &mut self,
        iter: I,
    ) -> &mut Self {
        let jobs = self.jobs.get_or_insert_with(ImportJobs::new);
        jobs.extend(iter);
        self
    }
}

// Default value functions for serde
fn default_data_dir_path() -> PathBuf {
    PathBuf::from("/data/db")
}
fn default_startup_wait_secs() -> u64 {
    2
}
