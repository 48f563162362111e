use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::{checked_range, ByteStore, StoreBackend};
use crate::config::OpenMode;
use crate::error::{FingerdbError, Result};

type Records = Arc<RwLock<HashMap<Vec<u8>, Vec<u8>>>>;

/// Process-local backend. Stores outlive their handles, so a collection can
/// be closed and reopened through the same backend instance.
#[derive(Default)]
pub struct MemoryBackend {
    stores: Mutex<HashMap<PathBuf, Records>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a store has ever been created at `path`
    pub fn contains(&self, path: &Path) -> bool {
        self.stores.lock().contains_key(path)
    }
}

impl StoreBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn ByteStore>> {
        let mut stores = self.stores.lock();
        let records = match stores.get(path) {
            Some(records) => records.clone(),
            None if mode.is_writable() => {
                let records = Records::default();
                stores.insert(path.to_path_buf(), records.clone());
                records
            }
            None => {
                return Err(FingerdbError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no datastore collection at {}", path.display()),
                )))
            }
        };
        if mode == OpenMode::Write {
            records.write().clear();
        }
        Ok(Box::new(MemoryStore { records }))
    }
}

/// Handle over an in-memory store.
pub struct MemoryStore {
    records: Records,
}

impl ByteStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.records.read().get(key).cloned())
    }

    fn get_partial(&self, key: &[u8], offset: usize, len: usize) -> Result<Option<Vec<u8>>> {
        let records = self.records.read();
        let Some(value) = records.get(key) else {
            return Ok(None);
        };
        let range = checked_range(value.len(), offset, len)?;
        Ok(Some(value[range].to_vec()))
    }

    fn value_len(&self, key: &[u8]) -> Result<Option<usize>> {
        Ok(self.records.read().get(key).map(Vec::len))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.records.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn drop_all(&self) -> Result<()> {
        self.records.write().clear();
        Ok(())
    }

    fn count(&self) -> Result<u64> {
        Ok(self.records.read().len() as u64)
    }

    fn keys(&self) -> Result<Vec<Vec<u8>>> {
        let mut keys: Vec<Vec<u8>> = self.records.read().keys().cloned().collect();
        keys.sort_unstable();
        Ok(keys)
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reopen_keeps_records() {
        let backend = MemoryBackend::new();
        let path = Path::new("/mem/idx");

        let store = backend.open(path, OpenMode::ReadWrite).unwrap();
        store.put(b"k", b"value").unwrap();
        store.close().unwrap();

        let store = backend.open(path, OpenMode::Read).unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"value".to_vec()));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_write_mode_truncates() {
        let backend = MemoryBackend::new();
        let path = Path::new("/mem/idx");
        backend
            .open(path, OpenMode::ReadWrite)
            .unwrap()
            .put(b"k", b"v")
            .unwrap();

        let store = backend.open(path, OpenMode::Write).unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_read_mode_on_missing_store_fails() {
        let backend = MemoryBackend::new();
        let err = backend.open(Path::new("/mem/none"), OpenMode::Read).err().unwrap();
        assert!(err.is_io());
        assert!(!backend.contains(Path::new("/mem/none")));
    }

    #[test]
    fn test_partial_reads() {
        let backend = MemoryBackend::new();
        let store = backend.open(Path::new("/mem/fp"), OpenMode::ReadWrite).unwrap();
        store.put(b"k", &[1, 2, 3, 4, 5]).unwrap();

        assert_eq!(store.get_partial(b"k", 1, 3).unwrap(), Some(vec![2, 3, 4]));
        assert_eq!(store.get_partial(b"missing", 0, 1).unwrap(), None);
        assert!(matches!(
            store.get_partial(b"k", 3, 3),
            Err(FingerdbError::Range(_))
        ));
    }
}
