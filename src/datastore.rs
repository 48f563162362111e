//! Datastore connection: main and delta indices plus the fingerprint,
//! metadata and info stores behind one open/close unit.
//!
//! The identification engine drives a build through the [`DataStore`]
//! callbacks; search reads go through the same trait.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::collection::Collection;
use crate::config::{DatastoreConfig, OpMode};
use crate::error::{FingerdbError, Result};
use crate::fingerprints::{Fid, FingerprintStore};
use crate::index::{BlockHeader, BlockId, ListHeader, ListId, MergeStats, PostingIndex};
use crate::metadata::{DatastoreInfo, InfoStore, MetadataStore};
use crate::metrics::StoreMetrics;
use crate::persistence::{FjallBackend, StoreBackend};

/// Callback and read surface consumed by the identification engine
pub trait DataStore {
    /// A build session starts
    fn on_indexer_start(&mut self) -> Result<()>;
    /// A build session ends
    fn on_indexer_end(&mut self) -> Result<()>;
    fn on_indexer_flush_start(&mut self) -> Result<()>;
    fn on_indexer_flush_end(&mut self) -> Result<()>;
    fn on_indexer_list_header(&self, list_id: ListId) -> Result<ListHeader>;
    fn on_indexer_block_header(&self, list_id: ListId, block_id: BlockId) -> Result<BlockHeader>;

    /// Append to the current last block of a list, spilling into a new one
    /// when it is full. Returns the updated headers.
    fn on_indexer_chunk(
        &mut self,
        list_id: ListId,
        list_header: &ListHeader,
        block_header: &BlockHeader,
        data: &[u8],
    ) -> Result<(ListHeader, BlockHeader)>;

    /// Append into a fresh block of a list
    fn on_indexer_new_block(
        &mut self,
        list_id: ListId,
        list_header: &ListHeader,
        block_header: &BlockHeader,
        data: &[u8],
    ) -> Result<(ListHeader, BlockHeader)>;

    fn on_indexer_fingerprint(&mut self, fid: Fid, data: &[u8]) -> Result<()>;

    /// Block of the main index; empty if it does not exist
    fn get_plist_block(&self, list_id: ListId, block_id: BlockId, headers: bool) -> Result<Vec<u8>>;
    fn get_fingerprint_size(&self, fid: Fid) -> Result<usize>;
    /// Fingerprint bytes; empty if the fingerprint does not exist
    fn get_fingerprint(&self, fid: Fid, nbytes: usize, byte_offset: usize) -> Result<Vec<u8>>;
    fn get_fingerprints_count(&self) -> Result<u64>;
}

/// Side stores opened along with the main index
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenFlags {
    pub fingerprints: bool,
    pub metadata: bool,
    pub info: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            fingerprints: true,
            metadata: true,
            info: true,
        }
    }
}

/// A connection to a datastore directory
pub struct Connection {
    config: DatastoreConfig,
    main: PostingIndex,
    delta: PostingIndex,
    fingerprints: FingerprintStore,
    metadata: MetadataStore,
    info: InfoStore,
    op_mode: OpMode,
    flags: OpenFlags,
    open: bool,
    flush_runs: u64,
    last_merge: Option<MergeStats>,
    backend: Arc<dyn StoreBackend>,
}

impl Connection {
    /// Create a closed connection over the given backend
    pub fn new(config: DatastoreConfig, backend: Arc<dyn StoreBackend>) -> Result<Self> {
        Self::build(config, backend, None)
    }

    /// Create a closed connection over on-disk fjall stores
    pub fn with_fjall(config: DatastoreConfig) -> Result<Self> {
        Self::new(config, Arc::new(FjallBackend::new()))
    }

    /// Create a closed connection that reports into `metrics`
    pub fn with_metrics(
        config: DatastoreConfig,
        backend: Arc<dyn StoreBackend>,
        metrics: StoreMetrics,
    ) -> Result<Self> {
        Self::build(config, backend, Some(metrics))
    }

    fn build(
        config: DatastoreConfig,
        backend: Arc<dyn StoreBackend>,
        metrics: Option<StoreMetrics>,
    ) -> Result<Self> {
        config.validate()?;
        let names = &config.names;
        let url = &config.url;
        let collection = |name: &str| Collection::new(name, url.clone(), backend.clone());

        let mut main = PostingIndex::new(
            collection(&names.main_index),
            config.block_capacity,
            config.cache_limit_bytes,
        );
        let mut delta = PostingIndex::new(
            collection(&names.delta_index),
            config.block_capacity,
            config.cache_limit_bytes,
        );
        let mut fingerprints = FingerprintStore::new(collection(&names.fingerprints));
        if let Some(metrics) = metrics {
            main = main.with_metrics(metrics.clone());
            delta = delta.with_metrics(metrics.clone());
            fingerprints = fingerprints.with_metrics(metrics);
        }

        Ok(Self {
            metadata: MetadataStore::new(collection(&names.metadata)),
            info: InfoStore::new(collection(&names.info)),
            main,
            delta,
            fingerprints,
            config,
            op_mode: OpMode::Get,
            flags: OpenFlags::default(),
            open: false,
            flush_runs: 0,
            last_merge: None,
            backend,
        })
    }

    /// Open the connection. The main index is always opened, the delta index
    /// only in [`OpMode::BuildMerge`], the other stores per flag. An open
    /// connection is closed and reopened.
    pub fn open(
        &mut self,
        op_mode: OpMode,
        use_fingerprints: bool,
        use_metadata: bool,
        use_info: bool,
    ) -> Result<()> {
        if self.open {
            self.close()?;
        }
        let flags = OpenFlags {
            fingerprints: use_fingerprints,
            metadata: use_metadata,
            info: use_info,
        };
        if let Err(e) = self.open_collections(op_mode, flags) {
            self.close_collections();
            return Err(e);
        }

        self.op_mode = op_mode;
        self.flags = flags;
        self.open = true;
        self.flush_runs = 0;
        info!(
            url = %self.config.url.display(),
            ?op_mode,
            fingerprints = use_fingerprints,
            metadata = use_metadata,
            info = use_info,
            "datastore opened"
        );
        Ok(())
    }

    fn open_collections(&mut self, op_mode: OpMode, flags: OpenFlags) -> Result<()> {
        let mode = op_mode.open_mode();
        self.main.open(mode)?;
        if op_mode == OpMode::BuildMerge {
            self.delta.open(mode)?;
        }
        if flags.fingerprints {
            self.fingerprints.collection_mut().open(mode)?;
        }
        if flags.metadata {
            self.metadata.collection_mut().open(mode)?;
        }
        if flags.info {
            self.info.collection_mut().open(mode)?;
        }
        Ok(())
    }

    /// Flush both index caches, then close every open collection.
    /// Closing a closed connection does nothing.
    ///
    /// If any collection fails to close (an index whose pending blocks
    /// cannot be flushed stays open with them), the connection stays open
    /// and a later `close` retries.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }

        let mut first_err = None;
        for result in [self.main.close(), self.delta.close()] {
            if let Err(e) = result {
                first_err.get_or_insert(e);
            }
        }
        for collection in [
            self.fingerprints.collection_mut(),
            self.metadata.collection_mut(),
            self.info.collection_mut(),
        ] {
            if let Err(e) = collection.close() {
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => {
                warn!(url = %self.config.url.display(), error = %e, "datastore closed with errors");
                Err(e)
            }
            None => {
                self.open = false;
                info!(url = %self.config.url.display(), "datastore closed");
                Ok(())
            }
        }
    }

    /// Best-effort close after a failed open. Nothing was written since the
    /// open began, so the index caches are empty.
    fn close_collections(&mut self) {
        let results = [
            self.main.close(),
            self.delta.close(),
            self.fingerprints.collection_mut().close(),
            self.metadata.collection_mut().close(),
            self.info.collection_mut().close(),
        ];
        for e in results.into_iter().filter_map(|r| r.err()) {
            debug!(error = %e, "close after failed open");
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Whether the main index and the fingerprint store hold no records
    pub fn is_empty(&self) -> Result<bool> {
        self.ensure_open("inspect")?;
        if self.main.record_count()? > 0 {
            return Ok(false);
        }
        if self.fingerprints.collection().is_open() {
            return Ok(self.fingerprints.count()? == 0);
        }
        Ok(true)
    }

    /// Drop the contents of every open collection
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_open("clear")?;
        self.main.drop_all()?;
        if self.delta.is_open() {
            self.delta.drop_all()?;
        }
        for collection in [
            self.fingerprints.collection_mut(),
            self.metadata.collection_mut(),
            self.info.collection_mut(),
        ] {
            if collection.is_open() {
                collection.drop_all()?;
            }
        }
        info!(url = %self.config.url.display(), "datastore cleared");
        Ok(())
    }

    pub fn op_mode(&self) -> OpMode {
        self.op_mode
    }

    /// Change the operation mode, reopening with the previous flags if open
    pub fn set_op_mode(&mut self, op_mode: OpMode) -> Result<()> {
        if !self.open {
            self.op_mode = op_mode;
            return Ok(());
        }
        if op_mode == self.op_mode {
            return Ok(());
        }
        let flags = self.flags;
        self.close()?;
        self.open(op_mode, flags.fingerprints, flags.metadata, flags.info)
    }

    pub fn url(&self) -> &std::path::Path {
        &self.config.url
    }

    /// Move the connection to another directory; only while closed
    pub fn set_url(&mut self, url: impl Into<std::path::PathBuf>) -> Result<()> {
        if self.open {
            return Err(FingerdbError::State(
                "cannot change the url of an open datastore".to_string(),
            ));
        }
        let url = url.into();
        self.main.collection_mut().set_url(url.clone())?;
        self.delta.collection_mut().set_url(url.clone())?;
        self.fingerprints.collection_mut().set_url(url.clone())?;
        self.metadata.collection_mut().set_url(url.clone())?;
        self.info.collection_mut().set_url(url.clone())?;
        self.config.url = url;
        Ok(())
    }

    pub fn config(&self) -> &DatastoreConfig {
        &self.config
    }

    pub fn main_index(&self) -> &PostingIndex {
        &self.main
    }

    pub fn main_index_mut(&mut self) -> &mut PostingIndex {
        &mut self.main
    }

    pub fn delta_index(&self) -> &PostingIndex {
        &self.delta
    }

    pub fn delta_index_mut(&mut self) -> &mut PostingIndex {
        &mut self.delta
    }

    pub fn fingerprints(&self) -> &FingerprintStore {
        &self.fingerprints
    }

    /// Number of mid-session flushes of the current build session
    pub fn flush_runs(&self) -> u64 {
        self.flush_runs
    }

    /// Result of the merge run by the last build-merge session
    pub fn last_merge(&self) -> Option<&MergeStats> {
        self.last_merge.as_ref()
    }

    /// Fold the main index of the datastore at `url` into this main index.
    ///
    /// The other datastore is opened read-only with this connection's
    /// collection names, so it must already exist. This connection must be
    /// open in a build mode.
    pub fn merge_from(&mut self, url: impl Into<std::path::PathBuf>) -> Result<MergeStats> {
        self.ensure_building()?;
        let mut config = self.config.clone();
        config.url = url.into();
        let mut other = Connection::new(config, self.backend.clone())?;
        other.open(OpMode::Get, false, false, false)?;

        let stats = self.main.merge(&mut other.main)?;
        other.close()?;
        Ok(stats)
    }

    pub fn put_fingerprint(&mut self, fid: Fid, data: &[u8]) -> Result<()> {
        self.fingerprints.write_fingerprint(fid, data)
    }

    pub fn put_metadata(&mut self, fid: Fid, meta: &str) -> Result<()> {
        self.metadata.write(fid, meta)
    }

    pub fn get_metadata(&self, fid: Fid) -> Result<String> {
        self.metadata.read(fid)
    }

    pub fn get_info(&self) -> Result<DatastoreInfo> {
        self.info.read()
    }

    pub fn put_info(&mut self, info: &DatastoreInfo) -> Result<()> {
        self.info.write(info)
    }

    fn ensure_open(&self, op: &str) -> Result<()> {
        if !self.open {
            return Err(FingerdbError::State(format!(
                "cannot {} a closed datastore",
                op
            )));
        }
        Ok(())
    }

    fn ensure_building(&self) -> Result<()> {
        self.ensure_open("index into")?;
        if !self.op_mode.is_build() {
            return Err(FingerdbError::State(format!(
                "indexer callback in {:?} mode",
                self.op_mode
            )));
        }
        Ok(())
    }

    /// Index written by the indexer callbacks
    fn target(&self) -> Result<&PostingIndex> {
        self.ensure_building()?;
        Ok(match self.op_mode {
            OpMode::BuildMerge => &self.delta,
            _ => &self.main,
        })
    }

    fn target_mut(&mut self) -> Result<&mut PostingIndex> {
        self.ensure_building()?;
        Ok(match self.op_mode {
            OpMode::BuildMerge => &mut self.delta,
            _ => &mut self.main,
        })
    }

    fn append(
        &mut self,
        list_id: ListId,
        list_header: &ListHeader,
        block_header: &BlockHeader,
        data: &[u8],
        force_new_block: bool,
    ) -> Result<(ListHeader, BlockHeader)> {
        let index = self.target_mut()?;
        let (lh, bh) = index.append_chunk(list_id, list_header, block_header, data, force_new_block)?;
        index.update_list_header(list_id, &lh)?;
        Ok((lh, bh))
    }
}

impl DataStore for Connection {
    fn on_indexer_start(&mut self) -> Result<()> {
        self.ensure_building()?;
        self.flush_runs = 0;
        if self.op_mode == OpMode::BuildMerge {
            self.delta.drop_all()?;
        }
        info!(op_mode = ?self.op_mode, "indexing session started");
        Ok(())
    }

    fn on_indexer_end(&mut self) -> Result<()> {
        self.ensure_building()?;
        match self.op_mode {
            OpMode::BuildMerge => {
                self.delta.flush_block_cache()?;
                let stats = self.main.merge(&mut self.delta)?;
                self.delta.drop_all()?;
                self.last_merge = Some(stats);
            }
            _ => self.main.flush_block_cache()?,
        }
        info!(op_mode = ?self.op_mode, flushes = self.flush_runs, "indexing session ended");
        Ok(())
    }

    fn on_indexer_flush_start(&mut self) -> Result<()> {
        self.ensure_building()?;
        self.flush_runs += 1;
        debug!(run = self.flush_runs, "indexer flush started");
        Ok(())
    }

    fn on_indexer_flush_end(&mut self) -> Result<()> {
        let run = self.flush_runs;
        self.target_mut()?.flush_block_cache()?;
        debug!(run, "indexer flush ended");
        Ok(())
    }

    fn on_indexer_list_header(&self, list_id: ListId) -> Result<ListHeader> {
        self.target()?.get_list_header(list_id)
    }

    fn on_indexer_block_header(&self, list_id: ListId, block_id: BlockId) -> Result<BlockHeader> {
        self.target()?.get_block_header(list_id, block_id)
    }

    fn on_indexer_chunk(
        &mut self,
        list_id: ListId,
        list_header: &ListHeader,
        block_header: &BlockHeader,
        data: &[u8],
    ) -> Result<(ListHeader, BlockHeader)> {
        self.append(list_id, list_header, block_header, data, false)
    }

    fn on_indexer_new_block(
        &mut self,
        list_id: ListId,
        list_header: &ListHeader,
        block_header: &BlockHeader,
        data: &[u8],
    ) -> Result<(ListHeader, BlockHeader)> {
        self.append(list_id, list_header, block_header, data, true)
    }

    fn on_indexer_fingerprint(&mut self, fid: Fid, data: &[u8]) -> Result<()> {
        self.ensure_building()?;
        self.fingerprints.write_fingerprint(fid, data)
    }

    fn get_plist_block(&self, list_id: ListId, block_id: BlockId, headers: bool) -> Result<Vec<u8>> {
        match self.main.read_block(list_id, block_id, headers) {
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            other => other,
        }
    }

    fn get_fingerprint_size(&self, fid: Fid) -> Result<usize> {
        self.fingerprints.read_fingerprint_size(fid)
    }

    fn get_fingerprint(&self, fid: Fid, nbytes: usize, byte_offset: usize) -> Result<Vec<u8>> {
        match self.fingerprints.read_fingerprint(fid, nbytes, byte_offset) {
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            other => other,
        }
    }

    fn get_fingerprints_count(&self) -> Result<u64> {
        self.fingerprints.count()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.close() {
                warn!(error = %e, "failed to close datastore on drop");
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.config.url)
            .field("op_mode", &self.op_mode)
            .field("open", &self.open)
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OpenMode;
    use crate::metadata::MatchType;
    use crate::persistence::{ByteStore, MemoryBackend};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory backend whose writes fail while `full` is set
    struct FullDiskBackend {
        inner: MemoryBackend,
        full: Arc<AtomicBool>,
    }

    struct FullDiskStore {
        inner: Box<dyn ByteStore>,
        full: Arc<AtomicBool>,
    }

    impl StoreBackend for FullDiskBackend {
        fn name(&self) -> &'static str {
            "full-disk"
        }

        fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn ByteStore>> {
            Ok(Box::new(FullDiskStore {
                inner: self.inner.open(path, mode)?,
                full: self.full.clone(),
            }))
        }
    }

    impl ByteStore for FullDiskStore {
        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
            if self.full.load(Ordering::SeqCst) {
                return Err(FingerdbError::Backend("disk full".to_string()));
            }
            self.inner.put(key, value)
        }

        fn drop_all(&self) -> Result<()> {
            self.inner.drop_all()
        }

        fn count(&self) -> Result<u64> {
            self.inner.count()
        }

        fn keys(&self) -> Result<Vec<Vec<u8>>> {
            self.inner.keys()
        }

        fn close(self: Box<Self>) -> Result<()> {
            self.inner.close()
        }
    }

    fn connection(backend: &Arc<MemoryBackend>) -> Connection {
        let config = DatastoreConfig::new("/mem/db").with_block_capacity(100);
        Connection::new(config, backend.clone() as Arc<dyn StoreBackend>).unwrap()
    }

    fn index_chunk(conn: &mut Connection, list_id: ListId, data: &[u8]) -> BlockHeader {
        let lh = conn.on_indexer_list_header(list_id).unwrap();
        let bh = match lh.last_block() {
            Some(last) => conn.on_indexer_block_header(list_id, last).unwrap(),
            None => BlockHeader::default(),
        };
        conn.on_indexer_chunk(list_id, &lh, &bh, data).unwrap().1
    }

    #[test]
    fn test_open_modes() {
        let backend = Arc::new(MemoryBackend::new());
        let mut conn = connection(&backend);

        conn.open(OpMode::Build, true, false, false).unwrap();
        assert!(conn.is_open());
        assert_eq!(conn.main_index().collection().mode(), Some(OpenMode::ReadWrite));
        assert!(!conn.delta_index().is_open());
        assert!(conn.fingerprints().collection().is_open());
        assert!(conn.get_metadata(1).is_err());

        conn.set_op_mode(OpMode::BuildMerge).unwrap();
        assert!(conn.delta_index().is_open());
        assert!(conn.fingerprints().collection().is_open());

        conn.set_op_mode(OpMode::Get).unwrap();
        assert_eq!(conn.main_index().collection().mode(), Some(OpenMode::Read));
        assert!(!conn.delta_index().is_open());

        conn.close().unwrap();
        conn.close().unwrap();
        assert!(!conn.is_open());
    }

    #[test]
    fn test_get_mode_on_missing_store_fails() {
        let backend = Arc::new(MemoryBackend::new());
        let mut conn = connection(&backend);
        let err = conn.open(OpMode::Get, true, true, true).unwrap_err();
        assert!(err.is_io());
        assert!(!conn.is_open());
        assert!(!conn.main_index().is_open());
    }

    #[test]
    fn test_build_session() {
        let backend = Arc::new(MemoryBackend::new());
        let mut conn = connection(&backend);
        conn.open(OpMode::Build, true, true, true).unwrap();
        assert!(conn.is_empty().unwrap());

        conn.on_indexer_start().unwrap();
        for chunk in [[1u8; 40], [2; 40], [3; 40]] {
            index_chunk(&mut conn, 1, &chunk);
        }
        conn.on_indexer_fingerprint(1, &[9; 100]).unwrap();
        conn.on_indexer_end().unwrap();

        assert!(!conn.is_empty().unwrap());
        assert_eq!(conn.get_plist_block(1, 0, false).unwrap().len(), 80);
        assert_eq!(conn.get_plist_block(1, 1, false).unwrap().len(), 40);
        assert!(conn.get_plist_block(1, 2, false).unwrap().is_empty());
        assert_eq!(conn.get_fingerprint_size(1).unwrap(), 100);
        assert_eq!(conn.get_fingerprint(1, 10, 90).unwrap(), vec![9; 10]);
        assert!(conn.get_fingerprint(2, 0, 0).unwrap().is_empty());
        assert_eq!(conn.get_fingerprints_count().unwrap(), 1);
    }

    #[test]
    fn test_new_block_callback() {
        let backend = Arc::new(MemoryBackend::new());
        let mut conn = connection(&backend);
        conn.open(OpMode::Build, false, false, false).unwrap();

        index_chunk(&mut conn, 5, b"a");
        let lh = conn.on_indexer_list_header(5).unwrap();
        let bh = conn.on_indexer_block_header(5, 0).unwrap();
        let (lh, bh) = conn.on_indexer_new_block(5, &lh, &bh, b"b").unwrap();
        assert_eq!(bh.block_id, 1);
        assert_eq!(lh.block_count, 2);
        assert_eq!(conn.on_indexer_list_header(5).unwrap(), lh);
    }

    #[test]
    fn test_build_merge_session() {
        let backend = Arc::new(MemoryBackend::new());
        let mut conn = connection(&backend);

        conn.open(OpMode::Build, false, false, false).unwrap();
        index_chunk(&mut conn, 1, b"main");
        conn.on_indexer_end().unwrap();
        conn.close().unwrap();

        conn.open(OpMode::BuildMerge, false, false, false).unwrap();
        conn.on_indexer_start().unwrap();
        index_chunk(&mut conn, 1, b"delta");
        index_chunk(&mut conn, 2, b"fresh");
        assert!(conn.main_index().get_list_header(2).unwrap().is_empty());

        conn.on_indexer_flush_start().unwrap();
        conn.on_indexer_flush_end().unwrap();
        assert_eq!(conn.flush_runs(), 1);

        conn.on_indexer_end().unwrap();
        let stats = conn.last_merge().unwrap();
        assert_eq!((stats.lists_appended, stats.lists_copied), (1, 1));
        assert_eq!(conn.delta_index().record_count().unwrap(), 0);
        assert_eq!(conn.get_plist_block(1, 0, false).unwrap(), b"maindelta");
        assert_eq!(conn.get_plist_block(2, 0, false).unwrap(), b"fresh");
    }

    #[test]
    fn test_indexer_callbacks_rejected_in_get_mode() {
        let backend = Arc::new(MemoryBackend::new());
        let mut conn = connection(&backend);
        conn.open(OpMode::Build, true, true, true).unwrap();
        conn.close().unwrap();

        conn.open(OpMode::Get, true, true, true).unwrap();
        assert!(matches!(conn.on_indexer_start(), Err(FingerdbError::State(_))));
        assert!(matches!(conn.on_indexer_list_header(1), Err(FingerdbError::State(_))));
        assert!(matches!(
            conn.on_indexer_fingerprint(1, b"x"),
            Err(FingerdbError::State(_))
        ));
        assert!(matches!(conn.put_metadata(1, "x"), Err(FingerdbError::State(_))));
    }

    #[test]
    fn test_side_stores() {
        let backend = Arc::new(MemoryBackend::new());
        let mut conn = connection(&backend);
        conn.open(OpMode::Build, true, true, true).unwrap();

        conn.put_metadata(7, "Some Track").unwrap();
        conn.put_info(&DatastoreInfo::new(MatchType::Xscale)).unwrap();
        conn.put_fingerprint(7, b"fp").unwrap();

        assert_eq!(conn.get_metadata(7).unwrap(), "Some Track");
        assert_eq!(conn.get_info().unwrap().match_type, MatchType::Xscale);

        conn.clear().unwrap();
        assert!(conn.is_empty().unwrap());
        assert_eq!(conn.get_metadata(7).unwrap(), "");
        assert_eq!(conn.get_info().unwrap(), DatastoreInfo::default());
    }

    #[test]
    fn test_closed_connection() {
        let backend = Arc::new(MemoryBackend::new());
        let mut conn = connection(&backend);
        assert!(matches!(conn.clear(), Err(FingerdbError::State(_))));
        assert!(matches!(conn.is_empty(), Err(FingerdbError::State(_))));

        conn.set_url("/mem/other").unwrap();
        assert_eq!(conn.url(), std::path::Path::new("/mem/other"));
        conn.open(OpMode::Build, false, false, false).unwrap();
        assert!(conn.set_url("/mem/db").is_err());
        assert!(backend.contains(std::path::Path::new("/mem/other/data_idx")));
    }

    #[test]
    fn test_drop_flushes_pending_blocks() {
        let backend = Arc::new(MemoryBackend::new());
        {
            let mut conn = connection(&backend);
            conn.open(OpMode::Build, false, false, false).unwrap();
            index_chunk(&mut conn, 3, b"kept");
        }
        let mut conn = connection(&backend);
        conn.open(OpMode::Get, false, false, false).unwrap();
        assert_eq!(conn.get_plist_block(3, 0, false).unwrap(), b"kept");
    }

    #[test]
    fn test_oversized_chunks_start_blocks() {
        let backend = Arc::new(MemoryBackend::new());
        let mut conn = connection(&backend);
        conn.open(OpMode::Build, false, false, false).unwrap();

        let first = index_chunk(&mut conn, 1, &[1u8; 150]);
        assert_eq!((first.block_id, first.body_size), (0, 150));

        let lh = conn.on_indexer_list_header(1).unwrap();
        let (lh, bh) = conn.on_indexer_new_block(1, &lh, &first, &[7u8; 101]).unwrap();
        assert_eq!((bh.block_id, bh.body_size), (1, 101));
        assert_eq!(lh.body_bytes, 251);

        conn.on_indexer_end().unwrap();
        assert_eq!(conn.get_plist_block(1, 1, false).unwrap(), vec![7u8; 101]);
    }

    #[test]
    fn test_failed_close_keeps_connection_open() {
        let full = Arc::new(AtomicBool::new(false));
        let backend: Arc<dyn StoreBackend> = Arc::new(FullDiskBackend {
            inner: MemoryBackend::new(),
            full: full.clone(),
        });
        let config = DatastoreConfig::new("/mem/db");
        let mut conn = Connection::new(config, backend).unwrap();
        conn.open(OpMode::Build, true, false, false).unwrap();
        index_chunk(&mut conn, 1, b"pending postings");

        full.store(true, Ordering::SeqCst);
        assert!(conn.close().unwrap_err().is_io());
        assert!(conn.is_open());
        assert!(conn.main_index().is_open());
        assert!(conn.main_index().pending_bytes() > 0);
        assert!(conn.open(OpMode::Get, false, false, false).is_err());
        assert!(conn.is_open());

        full.store(false, Ordering::SeqCst);
        conn.close().unwrap();
        assert!(!conn.is_open());
        assert!(!conn.main_index().is_open());

        conn.open(OpMode::Get, false, false, false).unwrap();
        assert_eq!(conn.get_plist_block(1, 0, false).unwrap(), b"pending postings");
    }

    #[test]
    fn test_merge_from_other_datastore() {
        let backend = Arc::new(MemoryBackend::new());
        let mut other = connection(&backend);
        other.set_url("/mem/delta").unwrap();
        other.open(OpMode::Build, false, false, false).unwrap();
        index_chunk(&mut other, 2, b"delta");
        other.close().unwrap();

        let mut conn = connection(&backend);
        conn.open(OpMode::Build, false, false, false).unwrap();
        index_chunk(&mut conn, 2, b"main");

        let stats = conn.merge_from("/mem/delta").unwrap();
        assert_eq!(stats.lists_appended, 1);
        assert_eq!(conn.get_plist_block(2, 0, false).unwrap(), b"maindelta");
    }

    #[test]
    fn test_merge_from_missing_datastore_fails() {
        let backend = Arc::new(MemoryBackend::new());
        let mut conn = connection(&backend);
        conn.open(OpMode::Build, false, false, false).unwrap();

        assert!(conn.merge_from("/mem/typo").unwrap_err().is_io());
        assert!(!backend.contains(Path::new("/mem/typo/data_idx")));

        conn.close().unwrap();
        conn.open(OpMode::Get, false, false, false).unwrap();
        assert!(matches!(conn.merge_from("/mem/db"), Err(FingerdbError::State(_))));
    }
}
