//! Metadata and datastore info side tables.

use serde::{Deserialize, Serialize};

use crate::collection::Collection;
use crate::error::{FingerdbError, Result};
use crate::fingerprints::{fid_key, Fid};

const INFO_KEY: &[u8] = b"datastore_info";

/// Current version of the info record
pub const INFO_VERSION: u32 = 1;

/// Matching algorithm the stored fingerprints were indexed for
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchType {
    #[default]
    Mscale,
    Xscale,
}

/// Datastore info record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatastoreInfo {
    pub version: u32,
    pub match_type: MatchType,
}

impl Default for DatastoreInfo {
    fn default() -> Self {
        Self {
            version: INFO_VERSION,
            match_type: MatchType::default(),
        }
    }
}

impl DatastoreInfo {
    pub fn new(match_type: MatchType) -> Self {
        Self {
            match_type,
            ..Default::default()
        }
    }
}

/// Metadata database: one string per FID
pub struct MetadataStore {
    collection: Collection,
}

impl MetadataStore {
    pub fn new(collection: Collection) -> Self {
        Self { collection }
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn collection_mut(&mut self) -> &mut Collection {
        &mut self.collection
    }

    /// Metadata of `fid`, empty if none was written
    pub fn read(&self, fid: Fid) -> Result<String> {
        let Some(raw) = self.collection.get(&fid_key(fid))? else {
            return Ok(String::new());
        };
        String::from_utf8(raw).map_err(|e| {
            FingerdbError::Corruption(format!("metadata of fingerprint {} is not UTF-8: {}", fid, e))
        })
    }

    pub fn write(&self, fid: Fid, meta: &str) -> Result<()> {
        self.collection.put(&fid_key(fid), meta.as_bytes())
    }
}

/// Datastore info database: a single record under a fixed key
pub struct InfoStore {
    collection: Collection,
}

impl InfoStore {
    pub fn new(collection: Collection) -> Self {
        Self { collection }
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn collection_mut(&mut self) -> &mut Collection {
        &mut self.collection
    }

    /// Stored info, or the default record if none was written
    pub fn read(&self) -> Result<DatastoreInfo> {
        let Some(raw) = self.collection.get(INFO_KEY)? else {
            return Ok(DatastoreInfo::default());
        };
        let info: DatastoreInfo = bincode::deserialize(&raw)?;
        if info.version != INFO_VERSION {
            return Err(FingerdbError::Corruption(format!(
                "datastore info version {}, expected {}",
                info.version, INFO_VERSION
            )));
        }
        Ok(info)
    }

    pub fn write(&self, info: &DatastoreInfo) -> Result<()> {
        let raw = bincode::serialize(info)?;
        self.collection.put(INFO_KEY, &raw)
    }
}
