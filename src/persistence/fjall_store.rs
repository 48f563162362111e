use std::path::{Path, PathBuf};

use fjall::{Database, Keyspace, KeyspaceCreateOptions, PersistMode};
use tracing::debug;

use super::{ByteStore, StoreBackend};
use crate::config::OpenMode;
use crate::error::{FingerdbError, Result};

const RECORDS_KS: &str = "records";

fn backend_err(e: impl std::fmt::Display) -> FingerdbError {
    FingerdbError::Backend(e.to_string())
}

/// Opens one fjall database per collection directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct FjallBackend;

impl FjallBackend {
    pub fn new() -> Self {
        Self
    }
}

impl StoreBackend for FjallBackend {
    fn name(&self) -> &'static str {
        "fjall"
    }

    fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn ByteStore>> {
        let store = FjallStore::open(path.to_path_buf(), mode)?;
        Ok(Box::new(store))
    }
}

/// Fjall-backed byte store: a single keyspace inside its own database.
pub struct FjallStore {
    path: PathBuf,
    db: Database,
    records: Keyspace,
}

impl FjallStore {
    pub fn open(path: PathBuf, mode: OpenMode) -> Result<Self> {
        if !mode.is_writable() && !path.exists() {
            return Err(FingerdbError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no datastore collection at {}", path.display()),
            )));
        }
        std::fs::create_dir_all(&path)?;

        let db = Database::builder(&path).open().map_err(|e| {
            FingerdbError::Backend(format!(
                "failed to open fjall store at {}: {}",
                path.display(),
                e
            ))
        })?;
        let records = db
            .keyspace(RECORDS_KS, || KeyspaceCreateOptions::default())
            .map_err(|e| FingerdbError::Backend(format!("failed to open records ks: {}", e)))?;

        let store = Self { path, db, records };
        if mode == OpenMode::Write {
            store.drop_all()?;
        }
        debug!(path = %store.path.display(), ?mode, "opened fjall store");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteStore for FjallStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .records
            .get(key)
            .map_err(backend_err)?
            .map(|val| val.as_ref().to_vec()))
    }

    fn value_len(&self, key: &[u8]) -> Result<Option<usize>> {
        Ok(self
            .records
            .get(key)
            .map_err(backend_err)?
            .map(|val| val.as_ref().len()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.records.insert(key, value).map_err(backend_err)?;
        Ok(())
    }

    fn drop_all(&self) -> Result<()> {
        for key in self.keys()? {
            self.records.remove(key).map_err(backend_err)?;
        }
        Ok(())
    }

    fn count(&self) -> Result<u64> {
        // Full keyspace walk; fjall keeps no exact count.
        let mut n = 0u64;
        for kv in self.records.iter() {
            kv.key().map_err(backend_err)?;
            n += 1;
        }
        Ok(n)
    }

    fn keys(&self) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        for kv in self.records.iter() {
            let key = kv.key().map_err(backend_err)?;
            out.push(key.as_ref().to_vec());
        }
        Ok(out)
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.db
            .persist(PersistMode::SyncAll)
            .map_err(|e| FingerdbError::Backend(format!("failed to persist: {}", e)))?;
        debug!(path = %self.path.display(), "closed fjall store");
        Ok(())
    }
}
