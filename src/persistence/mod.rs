//! Byte Store contract and its backends.
//!
//! Every collection in the datastore is a flat byte-key → byte-blob map. The
//! contract assumes nothing beyond lookup, insert/overwrite, clear and count;
//! key enumeration is only used by index merge and tooling.

mod fjall_store;
mod memory;

use std::ops::Range;
use std::path::Path;

pub use fjall_store::{FjallBackend, FjallStore};
pub use memory::{MemoryBackend, MemoryStore};

use crate::config::OpenMode;
use crate::error::{FingerdbError, Result};

/// An open handle over one named byte-keyed collection.
pub trait ByteStore: Send {
    /// Fetch a whole value. `None` when the key is absent.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Fetch `len` bytes of a value starting at `offset`.
    ///
    /// Fails with `Range` when the requested range is outside the value.
    /// Backends able to read a prefix without loading the whole value should
    /// override this.
    fn get_partial(&self, key: &[u8], offset: usize, len: usize) -> Result<Option<Vec<u8>>> {
        let Some(value) = self.get(key)? else {
            return Ok(None);
        };
        let range = checked_range(value.len(), offset, len)?;
        Ok(Some(value[range].to_vec()))
    }

    /// Size of a stored value in bytes.
    fn value_len(&self, key: &[u8]) -> Result<Option<usize>> {
        Ok(self.get(key)?.map(|v| v.len()))
    }

    /// Insert or overwrite a whole value.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove every record.
    fn drop_all(&self) -> Result<()>;

    /// Number of stored keys.
    fn count(&self) -> Result<u64>;

    /// All stored keys, in backend order.
    fn keys(&self) -> Result<Vec<Vec<u8>>>;

    /// Release the handle, persisting whatever the backend buffers.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Factory for byte stores. Selected at connection construction.
pub trait StoreBackend: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &'static str;

    /// Open (creating when writable) the store located at `path`.
    fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn ByteStore>>;
}

/// Validate `offset..offset+len` against a value of `total` bytes.
pub(crate) fn checked_range(total: usize, offset: usize, len: usize) -> Result<Range<usize>> {
    let end = offset.checked_add(len).ok_or_else(|| {
        FingerdbError::Range(format!("offset {} + length {} overflows", offset, len))
    })?;
    if end > total {
        return Err(FingerdbError::Range(format!(
            "range {}..{} exceeds value of {} bytes",
            offset, end, total
        )));
    }
    Ok(offset..end)
}
