//! Fingerprint blob store keyed by FID.

use crate::collection::Collection;
use crate::error::{FingerdbError, Result};
use crate::metrics::StoreMetrics;

/// Fingerprint identifier
pub type Fid = u32;

pub(crate) fn fid_key(fid: Fid) -> [u8; 4] {
    fid.to_be_bytes()
}

/// The fingerprints database
pub struct FingerprintStore {
    collection: Collection,
    metrics: Option<StoreMetrics>,
}

impl FingerprintStore {
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: StoreMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn collection_mut(&mut self) -> &mut Collection {
        &mut self.collection
    }

    /// Size of a stored fingerprint in bytes, 0 if absent
    pub fn read_fingerprint_size(&self, fid: Fid) -> Result<usize> {
        Ok(self.collection.value_len(&fid_key(fid))?.unwrap_or(0))
    }

    /// Read a fingerprint. `size == 0` reads the whole blob, otherwise exactly
    /// `size` bytes starting at `byte_offset`.
    pub fn read_fingerprint(&self, fid: Fid, size: usize, byte_offset: usize) -> Result<Vec<u8>> {
        let key = fid_key(fid);
        let data = if size == 0 {
            self.collection.get(&key)?
        } else {
            self.collection.get_partial(&key, byte_offset, size)?
        };
        data.ok_or_else(|| FingerdbError::NotFound(format!("fingerprint {}", fid)))
    }

    /// Overwrite the fingerprint stored under `fid`
    pub fn write_fingerprint(&self, fid: Fid, data: &[u8]) -> Result<()> {
        self.collection.put(&fid_key(fid), data)?;
        if let Some(metrics) = &self.metrics {
            metrics.record_fingerprint(data.len());
        }
        Ok(())
    }

    /// Number of stored fingerprints
    pub fn count(&self) -> Result<u64> {
        self.collection.record_count()
    }
}
