//! Named handle over one byte store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::OpenMode;
use crate::error::{FingerdbError, Result};
use crate::persistence::{ByteStore, StoreBackend};

/// A key-value collection of the datastore, stored as `<url>/<name>`.
pub struct Collection {
    name: String,
    url: PathBuf,
    backend: Arc<dyn StoreBackend>,
    handle: Option<Box<dyn ByteStore>>,
    mode: Option<OpenMode>,
}

impl Collection {
    /// Create a closed collection
    pub fn new(name: impl Into<String>, url: impl Into<PathBuf>, backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            backend,
            handle: None,
            mode: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &Path {
        &self.url
    }

    pub fn set_url(&mut self, url: impl Into<PathBuf>) -> Result<()> {
        self.ensure_closed("relocate")?;
        self.url = url.into();
        Ok(())
    }

    /// Location of the backing store
    pub fn path(&self) -> PathBuf {
        self.url.join(&self.name)
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn mode(&self) -> Option<OpenMode> {
        self.mode
    }

    /// Open the backing store. Reopening with the same mode is a no-op.
    pub fn open(&mut self, mode: OpenMode) -> Result<()> {
        if let Some(current) = self.mode {
            if current == mode {
                return Ok(());
            }
            return Err(FingerdbError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!(
                    "collection '{}' already open as {:?}, cannot open as {:?}",
                    self.name, current, mode
                ),
            )));
        }

        let handle = self.backend.open(&self.path(), mode)?;
        self.handle = Some(handle);
        self.mode = Some(mode);
        debug!(
            collection = %self.name,
            backend = self.backend.name(),
            ?mode,
            "collection opened"
        );
        Ok(())
    }

    /// Release the backing store. Closing a closed collection does nothing.
    pub fn close(&mut self) -> Result<()> {
        self.mode = None;
        if let Some(handle) = self.handle.take() {
            handle.close()?;
            debug!(collection = %self.name, "collection closed");
        }
        Ok(())
    }

    /// Remove every record. Requires an open, writable collection.
    pub fn drop_all(&mut self) -> Result<()> {
        self.writer("drop")?.drop_all()?;
        info!(collection = %self.name, "collection dropped");
        Ok(())
    }

    /// Number of records stored
    pub fn record_count(&self) -> Result<u64> {
        self.reader("count records of")?.count()
    }

    pub(crate) fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.reader("read")?.get(key)
    }

    pub(crate) fn get_partial(&self, key: &[u8], offset: usize, len: usize) -> Result<Option<Vec<u8>>> {
        self.reader("read")?.get_partial(key, offset, len)
    }

    pub(crate) fn value_len(&self, key: &[u8]) -> Result<Option<usize>> {
        self.reader("read")?.value_len(key)
    }

    pub(crate) fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.writer("write")?.put(key, value)
    }

    pub(crate) fn keys(&self) -> Result<Vec<Vec<u8>>> {
        self.reader("list keys of")?.keys()
    }

    fn reader(&self, op: &str) -> Result<&dyn ByteStore> {
        self.handle.as_deref().ok_or_else(|| {
            FingerdbError::State(format!("cannot {} closed collection '{}'", op, self.name))
        })
    }

    fn writer(&self, op: &str) -> Result<&dyn ByteStore> {
        let handle = self.reader(op)?;
        match self.mode {
            Some(mode) if mode.is_writable() => Ok(handle),
            _ => Err(FingerdbError::State(format!(
                "cannot {} collection '{}': opened read-only",
                op, self.name
            ))),
        }
    }

    fn ensure_closed(&self, op: &str) -> Result<()> {
        if self.is_open() {
            return Err(FingerdbError::State(format!(
                "cannot {} open collection '{}'",
                op, self.name
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("backend", &self.backend.name())
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryBackend;

    fn collection(backend: &Arc<MemoryBackend>) -> Collection {
        Collection::new("data_qfp", "/mem", backend.clone() as Arc<dyn StoreBackend>)
    }

    #[test]
    fn test_lifecycle() {
        let backend = Arc::new(MemoryBackend::new());
        let mut col = collection(&backend);
        assert!(!col.is_open());

        col.open(OpenMode::ReadWrite).unwrap();
        assert!(col.is_open());
        col.put(b"k", b"v").unwrap();
        assert_eq!(col.record_count().unwrap(), 1);

        col.close().unwrap();
        col.close().unwrap();
        assert!(!col.is_open());
        assert!(col.mode().is_none());
    }

    #[test]
    fn test_incompatible_reopen() {
        let backend = Arc::new(MemoryBackend::new());
        let mut col = collection(&backend);
        col.open(OpenMode::ReadWrite).unwrap();
        col.open(OpenMode::ReadWrite).unwrap();
        let err = col.open(OpenMode::Read).unwrap_err();
        assert!(err.is_io());
    }

    #[test]
    fn test_drop_then_count_is_zero() {
        let backend = Arc::new(MemoryBackend::new());
        let mut col = collection(&backend);
        col.open(OpenMode::ReadWrite).unwrap();
        for i in 0u32..5 {
            col.put(&i.to_be_bytes(), b"payload").unwrap();
        }
        col.drop_all().unwrap();
        assert_eq!(col.record_count().unwrap(), 0);
    }

    #[test]
    fn test_drop_requires_open_writer() {
        let backend = Arc::new(MemoryBackend::new());
        let mut col = collection(&backend);
        assert!(matches!(col.drop_all(), Err(FingerdbError::State(_))));

        col.open(OpenMode::ReadWrite).unwrap();
        col.close().unwrap();
        col.open(OpenMode::Read).unwrap();
        assert!(matches!(col.drop_all(), Err(FingerdbError::State(_))));
        assert!(matches!(col.put(b"k", b"v"), Err(FingerdbError::State(_))));
    }

    #[test]
    fn test_closed_collection_rejects_reads() {
        let backend = Arc::new(MemoryBackend::new());
        let col = collection(&backend);
        assert!(matches!(col.record_count(), Err(FingerdbError::State(_))));
        assert!(matches!(col.get(b"k"), Err(FingerdbError::State(_))));
    }

    #[test]
    fn test_relocate_only_when_closed() {
        let backend = Arc::new(MemoryBackend::new());
        let mut col = collection(&backend);
        col.set_url("/mem/other").unwrap();
        assert_eq!(col.path(), PathBuf::from("/mem/other/data_qfp"));
        col.open(OpenMode::ReadWrite).unwrap();
        assert!(col.set_url("/mem").is_err());
    }
}
