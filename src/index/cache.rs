//! Write-back cache for posting-list blocks
//!
//! Holds pending raw block records for a single list at a time. Writing to
//! another list requires flushing first; the owning index does that before
//! calling [`BlockCache::insert`].

use std::collections::BTreeMap;

use super::types::{BlockId, ListId};

/// Observable state of the cache
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Buffering(ListId),
}

/// Pending blocks of one list, keyed by block id
#[derive(Debug, Default)]
pub struct BlockCache {
    list_id: Option<ListId>,
    /// Raw bytes held across all pending blocks
    pending_bytes: usize,
    blocks: BTreeMap<BlockId, Vec<u8>>,
}

impl BlockCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CacheState {
        match self.list_id {
            Some(id) if !self.blocks.is_empty() => CacheState::Buffering(id),
            _ => CacheState::Empty,
        }
    }

    /// List currently buffered
    pub fn list_id(&self) -> Option<ListId> {
        match self.state() {
            CacheState::Buffering(id) => Some(id),
            CacheState::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Number of pending blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    /// True when a write for `list_id` must flush the cache first
    pub fn holds_other(&self, list_id: ListId) -> bool {
        matches!(self.state(), CacheState::Buffering(id) if id != list_id)
    }

    /// Pending record of a block, if cached
    pub fn get(&self, list_id: ListId, block_id: BlockId) -> Option<&[u8]> {
        if self.list_id != Some(list_id) {
            return None;
        }
        self.blocks.get(&block_id).map(Vec::as_slice)
    }

    /// Buffer a whole raw block record, replacing any pending version.
    ///
    /// # Panics
    ///
    /// Panics if the cache is buffering another list.
    pub fn insert(&mut self, list_id: ListId, block_id: BlockId, raw: Vec<u8>) {
        assert!(
            !self.holds_other(list_id),
            "block cache holds list {:?}, cannot buffer list {}",
            self.list_id,
            list_id
        );
        self.list_id = Some(list_id);
        self.pending_bytes += raw.len();
        if let Some(old) = self.blocks.insert(block_id, raw) {
            self.pending_bytes -= old.len();
        }
    }

    /// Forget a pending block
    pub fn evict(&mut self, list_id: ListId, block_id: BlockId) -> Option<Vec<u8>> {
        if self.list_id != Some(list_id) {
            return None;
        }
        let raw = self.blocks.remove(&block_id)?;
        self.pending_bytes -= raw.len();
        Some(raw)
    }

    /// Drain every pending block in block id order
    pub fn take(&mut self) -> Option<(ListId, BTreeMap<BlockId, Vec<u8>>)> {
        let list_id = self.list_id()?;
        let blocks = std::mem::take(&mut self.blocks);
        self.clear();
        Some((list_id, blocks))
    }

    /// Put back blocks that could not be written
    pub fn restore(&mut self, list_id: ListId, blocks: impl IntoIterator<Item = (BlockId, Vec<u8>)>) {
        for (block_id, raw) in blocks {
            self.insert(list_id, block_id, raw);
        }
    }

    /// Discard every pending block
    pub fn clear(&mut self) {
        self.list_id = None;
        self.pending_bytes = 0;
        self.blocks.clear();
    }
}
