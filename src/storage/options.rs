use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::metadata::{MemMetadataStore, MetadataStore};
use super::metrics::{default_metrics, CommitMetrics};

/// Default entry capacity allocated per partition.
pub const DEFAULT_INITIAL_RESERVE: usize = 1024;
/// Default staging slots per index for a mutator.
pub const DEFAULT_NUM_SLOTS: usize = 5;

/// Configuration options supplied when creating a [`super::SparseStore`].
#[derive(Clone)]
pub struct StoreOptions {
    /// Entry capacity each partition starts with.
    pub initial_reserve: usize,
    /// Staging slots per index used by [`super::SparseStore::mutator`].
    pub num_slots: usize,
    /// Largest reserve a partition may grow to. Growth past it fails with
    /// `OutOfMemory`.
    pub max_reserve: Option<usize>,
    /// Where partition metadata is persisted between commits.
    pub metadata_store: Arc<dyn MetadataStore>,
    /// Commit metrics sink.
    pub metrics: Arc<dyn CommitMetrics>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreOptions {
    /// Creates options with default settings and an in-memory metadata store.
    pub fn new() -> Self {
        Self {
            initial_reserve: DEFAULT_INITIAL_RESERVE,
            num_slots: DEFAULT_NUM_SLOTS,
            max_reserve: None,
            metadata_store: Arc::new(MemMetadataStore::new()),
            metrics: default_metrics(),
        }
    }

    /// Builds options from a parsed configuration file.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            initial_reserve: config.initial_reserve,
            num_slots: config.num_slots,
            max_reserve: config.max_reserve,
            ..Self::new()
        }
    }

    /// Sets the entry capacity each partition starts with.
    pub fn initial_reserve(mut self, entries: usize) -> Self {
        self.initial_reserve = entries;
        self
    }

    /// Sets the default number of staging slots per index.
    pub fn num_slots(mut self, slots: usize) -> Self {
        self.num_slots = slots;
        self
    }

    /// Caps the reserve a partition may grow to.
    pub fn max_reserve(mut self, entries: usize) -> Self {
        self.max_reserve = Some(entries);
        self
    }

    /// Sets the metadata persistence backend.
    pub fn metadata_store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.metadata_store = store;
        self
    }

    /// Sets the metrics collection implementation.
    pub fn metrics(mut self, metrics: Arc<dyn CommitMetrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

/// Plain-data store settings as they appear in a TOML file.
///
/// ```toml
/// initial_reserve = 2048
/// num_slots = 8
/// max_reserve = 1048576
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Entry capacity each partition starts with.
    pub initial_reserve: usize,
    /// Staging slots per index for default mutators.
    pub num_slots: usize,
    /// Optional growth ceiling, in entries.
    pub max_reserve: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            initial_reserve: DEFAULT_INITIAL_RESERVE,
            num_slots: DEFAULT_NUM_SLOTS,
            max_reserve: None,
        }
    }
}

impl StoreConfig {
    /// Parses settings from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse { path: None, source })
    }

    /// Reads and parses a TOML settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })
    }
}

/// Errors raised while loading a [`StoreConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File that was requested.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The contents are not a valid settings document.
    #[error("failed to parse config{}: {source}", display_path(.path))]
    Parse {
        /// File the text came from; `None` for in-memory text.
        path: Option<PathBuf>,
        /// Parser diagnostics.
        #[source]
        source: toml::de::Error,
    },
}

fn display_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" {}", p.display()))
        .unwrap_or_default()
}
