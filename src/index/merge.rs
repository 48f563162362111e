//! Folding a delta index into a main index
//!
//! Lists only present in the delta are copied block for block. Lists present
//! in both are extended: each delta block body is appended to the main list as
//! one indivisible unit, packed into main's last block while it fits and into
//! new contiguously numbered blocks otherwise. A delta body larger than the
//! capacity (a forced oversized chunk) lands in a block of its own.

use std::time::Instant;

use tracing::{debug, info};

use super::plist::PostingIndex;
use super::types::{BlockHeader, ListHeader, ListId};
use crate::error::{FingerdbError, Result};

/// Summary of a merge run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Lists copied verbatim (absent from the main index)
    pub lists_copied: usize,
    /// Lists appended to an existing main list
    pub lists_appended: usize,
    /// Delta blocks read
    pub blocks_read: u64,
    /// Records added to the main index
    pub records_merged: u64,
}

impl MergeStats {
    pub fn lists_total(&self) -> usize {
        self.lists_copied + self.lists_appended
    }
}

impl PostingIndex {
    /// Merge every list of `delta` into this index.
    ///
    /// There is no rollback: a failure leaves this index partially merged.
    pub fn merge(&mut self, delta: &mut PostingIndex) -> Result<MergeStats> {
        let started = Instant::now();
        self.flush_block_cache()?;
        delta.flush_block_cache()?;

        let mut stats = MergeStats::default();
        for list_id in delta.list_ids()? {
            let delta_header = delta.get_list_header(list_id)?;
            if delta_header.is_empty() {
                continue;
            }
            let main_header = self.get_list_header(list_id)?;
            if main_header.is_empty() {
                self.copy_list(delta, list_id, &delta_header)?;
                stats.lists_copied += 1;
            } else {
                self.append_list(delta, list_id, &main_header, &delta_header)?;
                stats.lists_appended += 1;
            }
            stats.blocks_read += delta_header.block_count as u64;
            stats.records_merged += delta_header.record_count;
        }

        self.flush_block_cache()?;
        delta.flush_block_cache()?;

        let elapsed = started.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.record_merge(elapsed.as_secs_f64());
        }
        info!(
            into = %self.name(),
            from = %delta.name(),
            copied = stats.lists_copied,
            appended = stats.lists_appended,
            blocks = stats.blocks_read,
            elapsed_ms = elapsed.as_millis() as u64,
            "delta index merged"
        );
        Ok(stats)
    }

    fn copy_list(&mut self, delta: &PostingIndex, list_id: ListId, header: &ListHeader) -> Result<()> {
        for block_id in 0..header.block_count {
            let raw = delta.read_block(list_id, block_id, true)?;
            self.write_block(list_id, block_id, &raw)?;
        }
        self.update_list_header(list_id, header)?;
        debug!(list = list_id, blocks = header.block_count, "list copied");
        Ok(())
    }

    fn append_list(
        &mut self,
        delta: &PostingIndex,
        list_id: ListId,
        main_header: &ListHeader,
        delta_header: &ListHeader,
    ) -> Result<()> {
        let mut lh = *main_header;
        let mut bh = match lh.last_block() {
            Some(last) => self.get_block_header(list_id, last)?,
            None => BlockHeader::default(),
        };
        if bh == BlockHeader::default() && !lh.is_empty() {
            return Err(FingerdbError::Corruption(format!(
                "list {} declares {} blocks but its last block is missing",
                list_id, lh.block_count
            )));
        }

        for block_id in 0..delta_header.block_count {
            let block = delta.read_block_full(list_id, block_id)?;
            if block.is_null() {
                return Err(FingerdbError::NotFound(format!(
                    "delta block {} of list {}",
                    block_id, list_id
                )));
            }
            if block.body.is_empty() {
                continue;
            }
            let (next_lh, next_bh) = self.append_records(
                list_id,
                &lh,
                &bh,
                &block.body,
                block.header.record_count,
                false,
            )?;
            lh = next_lh;
            bh = next_bh;
        }

        lh.record_count = main_header.record_count + delta_header.record_count;
        self.update_list_header(list_id, &lh)?;
        debug!(
            list = list_id,
            from_blocks = main_header.block_count,
            to_blocks = lh.block_count,
            "list appended"
        );
        Ok(())
    }
}
