//! Block-structured posting-list index over a collection
//!
//! Lists are stored as a header record plus contiguous blocks `0..N`. Writes
//! are buffered per list in a [`BlockCache`]; only the last block of a list
//! grows, everything before it is immutable until the next merge.

use tracing::{debug, warn};

use super::cache::{BlockCache, CacheState};
use super::types::{
    block_key, encode_block, list_key, parse_list_key, Block, BlockHeader, BlockId, ListHeader,
    ListId, BLOCK_HEADER_LEN,
};
use crate::collection::Collection;
use crate::config::OpenMode;
use crate::error::{FingerdbError, Result};
use crate::metrics::StoreMetrics;

/// A posting-list index (main or delta)
pub struct PostingIndex {
    collection: Collection,
    cache: BlockCache,
    block_capacity: usize,
    cache_limit: usize,
    pub(super) metrics: Option<StoreMetrics>,
}

impl PostingIndex {
    pub fn new(collection: Collection, block_capacity: usize, cache_limit: usize) -> Self {
        Self {
            collection,
            cache: BlockCache::new(),
            block_capacity,
            cache_limit,
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

    pub fn name(&self) -> &str {
        self.collection.name()
    }

    /// Maximum body size of a block
    pub fn block_capacity(&self) -> usize {
        self.block_capacity
    }

    pub fn cache_state(&self) -> CacheState {
        self.cache.state()
    }

    pub fn pending_bytes(&self) -> usize {
        self.cache.pending_bytes()
    }

    pub fn open(&mut self, mode: OpenMode) -> Result<()> {
        self.collection.open(mode)
    }

    pub fn is_open(&self) -> bool {
        self.collection.is_open()
    }

    /// Flush pending blocks, then close the collection. If the flush fails
    /// the collection stays open with the unwritten blocks still cached.
    pub fn close(&mut self) -> Result<()> {
        if self.collection.is_open() {
            self.flush_block_cache()?;
        } else if !self.cache.is_empty() {
            warn!(index = %self.name(), blocks = self.cache.len(), "discarding cache of closed index");
            self.cache.clear();
        }
        self.collection.close()
    }

    /// Discard pending blocks and every stored record
    pub fn drop_all(&mut self) -> Result<()> {
        self.collection.drop_all()?;
        self.cache.clear();
        Ok(())
    }

    pub fn record_count(&self) -> Result<u64> {
        self.collection.record_count()
    }

    /// Header of a list; zero-valued if the list does not exist
    pub fn get_list_header(&self, list_id: ListId) -> Result<ListHeader> {
        let Some(raw) = self.collection.get(&list_key(list_id))? else {
            return Ok(ListHeader::empty(list_id));
        };
        let header = ListHeader::decode(&raw)?;
        if header.list_id != list_id {
            return Err(FingerdbError::Corruption(format!(
                "list header under key {} names list {}",
                list_id, header.list_id
            )));
        }
        Ok(header)
    }

    /// Persist a list header
    pub fn update_list_header(&mut self, list_id: ListId, header: &ListHeader) -> Result<()> {
        let mut header = *header;
        header.list_id = list_id;
        self.collection.put(&list_key(list_id), &header.encode())
    }

    /// Header of a block, read without loading its body.
    /// Missing blocks yield the default (null) header.
    pub fn get_block_header(&self, list_id: ListId, block_id: BlockId) -> Result<BlockHeader> {
        if let Some(raw) = self.cache.get(list_id, block_id) {
            return BlockHeader::decode(raw);
        }
        let prefix = match self
            .collection
            .get_partial(&block_key(list_id, block_id), 0, BLOCK_HEADER_LEN)
        {
            Ok(Some(prefix)) => prefix,
            Ok(None) => return Ok(BlockHeader::default()),
            Err(FingerdbError::Range(_)) => {
                return Err(FingerdbError::Corruption(format!(
                    "block {} of list {} is shorter than its header",
                    block_id, list_id
                )))
            }
            Err(e) => return Err(e),
        };
        BlockHeader::decode(&prefix)
    }

    /// Raw record of a block (header + body) or its body only.
    ///
    /// The list header lives in its own record and is never inline, not even
    /// in block 0; use [`read_block_full`](Self::read_block_full) to get it
    /// alongside the first block.
    pub fn read_block(
        &self,
        list_id: ListId,
        block_id: BlockId,
        include_headers: bool,
    ) -> Result<Vec<u8>> {
        let raw = self
            .raw_block(list_id, block_id)?
            .ok_or_else(|| not_found(list_id, block_id))?;
        let block = Block::from_raw(&raw, None)?;
        if include_headers {
            Ok(raw)
        } else {
            Ok(block.body)
        }
    }

    /// Decoded block; the first block carries the list header.
    /// Missing blocks yield [`Block::null`].
    pub fn read_block_full(&self, list_id: ListId, block_id: BlockId) -> Result<Block> {
        let Some(raw) = self.raw_block(list_id, block_id)? else {
            return Ok(Block::null());
        };
        let list_header = if block_id == 0 {
            Some(self.get_list_header(list_id)?)
        } else {
            None
        };
        self.raw_block_to_block(&raw, list_header)
    }

    /// Turn a raw block record into a block structure
    pub fn raw_block_to_block(&self, raw: &[u8], list_header: Option<ListHeader>) -> Result<Block> {
        let block = Block::from_raw(raw, list_header)?;
        if block.body.len() > self.block_capacity {
            debug!(
                index = %self.name(),
                block = block.header.block_id,
                size = block.body.len(),
                "block exceeds configured capacity"
            );
        }
        Ok(block)
    }

    /// Replace the whole contents of a block, bypassing the cache.
    ///
    /// `raw` is a full block record. Writing block `N` of a list with `N`
    /// blocks creates it; any higher id would leave a gap and is rejected.
    pub fn write_block(&mut self, list_id: ListId, block_id: BlockId, raw: &[u8]) -> Result<()> {
        self.cache.evict(list_id, block_id);
        self.store_block(list_id, block_id, raw)
    }

    /// Append one record to the last block of a list, or start a new block.
    ///
    /// Only growing an existing block is bound by the block capacity; a new
    /// block takes the chunk as its whole body whatever its size.
    ///
    /// Returns the updated list header and the header of the block that
    /// received the chunk. The caller persists the list header with
    /// [`update_list_header`](Self::update_list_header).
    pub fn append_chunk(
        &mut self,
        list_id: ListId,
        list_header: &ListHeader,
        block_header: &BlockHeader,
        chunk: &[u8],
        force_new_block: bool,
    ) -> Result<(ListHeader, BlockHeader)> {
        self.append_records(list_id, list_header, block_header, chunk, 1, force_new_block)
    }

    /// [`append_chunk`](Self::append_chunk) for a chunk holding `records` records
    pub fn append_records(
        &mut self,
        list_id: ListId,
        list_header: &ListHeader,
        block_header: &BlockHeader,
        chunk: &[u8],
        records: u32,
        force_new_block: bool,
    ) -> Result<(ListHeader, BlockHeader)> {
        if chunk.len() > u32::MAX as usize {
            return Err(FingerdbError::Range(format!(
                "chunk of {} bytes does not fit a block",
                chunk.len()
            )));
        }

        let mut lh = *list_header;
        lh.list_id = list_id;

        let (block_id, raw) = match lh.last_block() {
            None => (0, encode_block(&BlockHeader::for_body(0, records, chunk), chunk)),
            Some(last) => {
                if block_header.block_id != last {
                    return Err(FingerdbError::Corruption(format!(
                        "append to list {} names block {}, last block is {}",
                        list_id, block_header.block_id, last
                    )));
                }
                match self.grow_block(list_id, last, chunk, records, force_new_block)? {
                    Some(raw) => (last, raw),
                    None => {
                        let next = last.checked_add(1).ok_or_else(|| {
                            FingerdbError::Range(format!("list {} is out of block ids", list_id))
                        })?;
                        (next, encode_block(&BlockHeader::for_body(next, records, chunk), chunk))
                    }
                }
            }
        };

        let header = BlockHeader::decode(&raw)?;
        lh.block_count = lh.block_count.max(block_id.saturating_add(1));
        lh.record_count += records as u64;
        lh.body_bytes += chunk.len() as u64;

        self.cache_block(list_id, block_id, raw)?;
        if let Some(metrics) = &self.metrics {
            metrics.record_append(self.collection.name(), self.cache.pending_bytes());
        }
        Ok((lh, header))
    }

    /// Write every pending block to the store and empty the cache
    pub fn flush_block_cache(&mut self) -> Result<()> {
        let Some((list_id, blocks)) = self.cache.take() else {
            return Ok(());
        };
        let count = blocks.len();
        let mut pending = blocks.into_iter();
        while let Some((block_id, raw)) = pending.next() {
            if let Err(e) = self.store_block(list_id, block_id, &raw) {
                self.cache
                    .restore(list_id, std::iter::once((block_id, raw)).chain(pending));
                return Err(e);
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_flush(self.collection.name());
        }
        debug!(index = %self.name(), list = list_id, blocks = count, "block cache flushed");
        Ok(())
    }

    /// Discard pending blocks without writing them
    pub fn clear_cache(&mut self) {
        if !self.cache.is_empty() {
            warn!(
                index = %self.name(),
                blocks = self.cache.len(),
                bytes = self.cache.pending_bytes(),
                "discarding pending blocks"
            );
        }
        self.cache.clear();
        if let Some(metrics) = &self.metrics {
            metrics.set_pending(self.collection.name(), 0);
        }
    }

    /// Ids of every list with a stored header, ascending
    pub fn list_ids(&self) -> Result<Vec<ListId>> {
        let mut ids: Vec<ListId> = self
            .collection
            .keys()?
            .iter()
            .filter_map(|k| parse_list_key(k))
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Walk every block of a list and check it against the list header.
    pub fn verify_list(&self, list_id: ListId) -> Result<ListHeader> {
        let lh = self.get_list_header(list_id)?;
        let mut records = 0u64;
        let mut bytes = 0u64;
        for block_id in 0..lh.block_count {
            let block = self.read_block_full(list_id, block_id)?;
            if block.is_null() {
                return Err(FingerdbError::Corruption(format!(
                    "list {} declares {} blocks, block {} is missing",
                    list_id, lh.block_count, block_id
                )));
            }
            if block.header.block_id != block_id {
                return Err(FingerdbError::Corruption(format!(
                    "list {} block {} is labelled {}",
                    list_id, block_id, block.header.block_id
                )));
            }
            records += block.header.record_count as u64;
            bytes += block.body.len() as u64;
        }
        if self.raw_block(list_id, lh.block_count)?.is_some() {
            return Err(FingerdbError::Corruption(format!(
                "list {} has a block past its declared count {}",
                list_id, lh.block_count
            )));
        }
        if records != lh.record_count || bytes != lh.body_bytes {
            return Err(FingerdbError::Corruption(format!(
                "list {} header counts {} records/{} bytes, blocks hold {}/{}",
                list_id, lh.record_count, lh.body_bytes, records, bytes
            )));
        }
        Ok(lh)
    }

    /// Block record from the cache, falling back to the store
    fn raw_block(&self, list_id: ListId, block_id: BlockId) -> Result<Option<Vec<u8>>> {
        if let Some(raw) = self.cache.get(list_id, block_id) {
            return Ok(Some(raw.to_vec()));
        }
        self.collection.get(&block_key(list_id, block_id))
    }

    /// Current record of `block_id` with `chunk` appended, or `None` when the
    /// chunk must go to a new block
    fn grow_block(
        &self,
        list_id: ListId,
        block_id: BlockId,
        chunk: &[u8],
        records: u32,
        force_new_block: bool,
    ) -> Result<Option<Vec<u8>>> {
        if force_new_block {
            return Ok(None);
        }
        let mut raw = self
            .raw_block(list_id, block_id)?
            .ok_or_else(|| not_found(list_id, block_id))?;
        let mut header = BlockHeader::decode(&raw)?;
        if header.body_size as usize + chunk.len() > self.block_capacity {
            return Ok(None);
        }
        header.extend(chunk, records);
        raw[..BLOCK_HEADER_LEN].copy_from_slice(&header.encode());
        raw.extend_from_slice(chunk);
        Ok(Some(raw))
    }

    fn cache_block(&mut self, list_id: ListId, block_id: BlockId, raw: Vec<u8>) -> Result<()> {
        if self.cache.holds_other(list_id) {
            self.flush_block_cache()?;
        }
        self.cache.insert(list_id, block_id, raw);
        if self.cache.pending_bytes() > self.cache_limit {
            self.flush_block_cache()?;
        }
        Ok(())
    }

    fn store_block(&mut self, list_id: ListId, block_id: BlockId, raw: &[u8]) -> Result<()> {
        let block = Block::from_raw(raw, None)?;
        if block.header.block_id != block_id {
            return Err(FingerdbError::Corruption(format!(
                "record for block {} of list {} is labelled block {}",
                block_id, list_id, block.header.block_id
            )));
        }

        let mut lh = self.get_list_header(list_id)?;
        if block_id > lh.block_count {
            return Err(FingerdbError::Corruption(format!(
                "block id discontinuity: list {} has {} blocks, cannot write block {}",
                list_id, lh.block_count, block_id
            )));
        }

        self.collection.put(&block_key(list_id, block_id), raw)?;
        if block_id == lh.block_count {
            lh.block_count += 1;
            self.update_list_header(list_id, &lh)?;
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_block_write(self.collection.name());
        }
        Ok(())
    }
}

fn not_found(list_id: ListId, block_id: BlockId) -> FingerdbError {
    FingerdbError::NotFound(format!("block {} of list {}", block_id, list_id))
}
