use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{FingerdbError, Result};

/// Default maximum body size of a posting-list block (bytes)
pub const DEFAULT_BLOCK_CAPACITY: usize = 16 * 1024;

/// Default amount of pending block bytes the cache holds before flushing
pub const DEFAULT_CACHE_LIMIT: usize = 32 * 1024 * 1024;

/// How a collection is opened
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Read-only; the store must already exist
    Read,
    /// Writable; existing records are discarded on open
    Write,
    /// Writable; existing records are kept
    ReadWrite,
}

impl OpenMode {
    pub fn is_writable(&self) -> bool {
        !matches!(self, OpenMode::Read)
    }
}

/// Operation mode of a datastore connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpMode {
    /// Search only
    Get,
    /// Index directly into the main index
    Build,
    /// Index into the delta index, then fold it into main
    BuildMerge,
}

impl OpMode {
    /// Open mode used for every collection of a connection in this op mode
    pub fn open_mode(&self) -> OpenMode {
        match self {
            OpMode::Get => OpenMode::Read,
            OpMode::Build | OpMode::BuildMerge => OpenMode::ReadWrite,
        }
    }

    pub fn is_build(&self) -> bool {
        !matches!(self, OpMode::Get)
    }
}

impl std::str::FromStr for OpMode {
    type Err = FingerdbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "get" => Ok(OpMode::Get),
            "build" => Ok(OpMode::Build),
            "build-merge" | "build_merge" => Ok(OpMode::BuildMerge),
            other => Err(FingerdbError::InvalidRequest(format!(
                "unknown operation mode '{}'",
                other
            ))),
        }
    }
}

/// File names of the collections under the datastore URL
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionNames {
    pub main_index: String,
    pub delta_index: String,
    pub fingerprints: String,
    pub metadata: String,
    pub info: String,
}

impl Default for CollectionNames {
    fn default() -> Self {
        Self {
            main_index: "data_idx".to_string(),
            delta_index: "data_idx_delta".to_string(),
            fingerprints: "data_qfp".to_string(),
            metadata: "data_met".to_string(),
            info: "data_info".to_string(),
        }
    }
}

/// Datastore configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreConfig {
    /// Directory holding all collections
    pub url: PathBuf,
    /// Maximum body size of a posting-list block
    pub block_capacity: usize,
    /// Pending bytes in the block cache that trigger a flush
    pub cache_limit_bytes: usize,
    pub names: CollectionNames,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            url: PathBuf::from("./data"),
            block_capacity: DEFAULT_BLOCK_CAPACITY,
            cache_limit_bytes: DEFAULT_CACHE_LIMIT,
            names: CollectionNames::default(),
        }
    }
}

impl DatastoreConfig {
    /// Create a configuration rooted at the given URL
    pub fn new<P: AsRef<Path>>(url: P) -> Self {
        Self {
            url: url.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Set the per-block body capacity
    pub fn with_block_capacity(mut self, capacity: usize) -> Self {
        self.block_capacity = capacity;
        self
    }

    /// Set the cache flush threshold
    pub fn with_cache_limit(mut self, bytes: usize) -> Self {
        self.cache_limit_bytes = bytes;
        self
    }

    /// Override the collection names
    pub fn with_names(mut self, names: CollectionNames) -> Self {
        self.names = names;
        self
    }

    /// Reject configurations the index cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.block_capacity == 0 || self.block_capacity > u32::MAX as usize {
            return Err(FingerdbError::InvalidRequest(format!(
                "block capacity must be in 1..={}, got {}",
                u32::MAX,
                self.block_capacity
            )));
        }
        let names = [
            &self.names.main_index,
            &self.names.delta_index,
            &self.names.fingerprints,
            &self.names.metadata,
            &self.names.info,
        ];
        for (i, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(FingerdbError::InvalidRequest(
                    "collection names must not be empty".to_string(),
                ));
            }
            if names[..i].contains(name) {
                return Err(FingerdbError::InvalidRequest(format!(
                    "collection name '{}' used twice",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&data)
            .map_err(|e| FingerdbError::InvalidRequest(format!("bad config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}
