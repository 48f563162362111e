//! Invariant checking framework for posting-list indices
//!
//! Each invariant walks every list of an index and reports the first list
//! that breaks it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::index::{ListHeader, ListId, PostingIndex};

/// A violation of an invariant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub invariant: String,
    pub description: String,
    pub list_id: Option<ListId>,
    pub context: HashMap<String, String>,
}

impl Violation {
    fn new(invariant: &dyn Invariant, list_id: Option<ListId>, description: String) -> Self {
        Self {
            invariant: invariant.name().to_string(),
            description,
            list_id,
            context: HashMap::new(),
        }
    }

    fn with_context(mut self, key: &str, value: impl ToString) -> Self {
        self.context.insert(key.to_string(), value.to_string());
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "INVARIANT VIOLATION: {}", self.invariant)?;
        writeln!(f, "  Description: {}", self.description)?;
        if let Some(list_id) = self.list_id {
            writeln!(f, "  List: {}", list_id)?;
        }
        if !self.context.is_empty() {
            writeln!(f, "  Context:")?;
            for (key, value) in &self.context {
                writeln!(f, "    {}: {}", key, value)?;
            }
        }
        Ok(())
    }
}

/// Trait for invariant checkers
pub trait Invariant: Send + Sync {
    /// Name of the invariant
    fn name(&self) -> &str;

    /// Check the invariant against one list of an index
    fn check_list(&self, index: &PostingIndex, header: &ListHeader) -> Result<(), Violation>;

    /// Human-readable description
    fn description(&self) -> &str {
        "No description provided"
    }

    /// Check every stored list
    fn check(&self, index: &PostingIndex) -> Result<(), Violation>
    where
        Self: Sized,
    {
        check_lists(self, index)
    }
}

fn check_lists(invariant: &dyn Invariant, index: &PostingIndex) -> Result<(), Violation> {
    let ids = index.list_ids().map_err(|e| {
        Violation::new(invariant, None, format!("cannot enumerate lists: {}", e))
    })?;
    for list_id in ids {
        let header = index.get_list_header(list_id).map_err(|e| {
            Violation::new(invariant, Some(list_id), format!("unreadable list header: {}", e))
        })?;
        invariant.check_list(index, &header)?;
    }
    Ok(())
}

/// Check all invariants and return violations
pub fn check_all_invariants(index: &PostingIndex, invariants: &[Box<dyn Invariant>]) -> Vec<Violation> {
    let mut violations = Vec::new();

    for invariant in invariants {
        if let Err(violation) = check_lists(invariant.as_ref(), index) {
            violations.push(violation);
        }
    }

    violations
}

/// Invariant: blocks of a list are numbered `0..block_count` without gaps,
/// and nothing is stored past the declared count.
pub struct ContiguousBlocks;

impl Invariant for ContiguousBlocks {
    fn name(&self) -> &str {
        "ContiguousBlocks"
    }

    fn description(&self) -> &str {
        "Block ids of every list run from 0 to block_count - 1 without gaps"
    }

    fn check_list(&self, index: &PostingIndex, header: &ListHeader) -> Result<(), Violation> {
        let list_id = header.list_id;
        for block_id in 0..=header.block_count {
            let block = index.read_block_full(list_id, block_id).map_err(|e| {
                Violation::new(self, Some(list_id), format!("unreadable block: {}", e))
                    .with_context("block_id", block_id)
            })?;
            let expected = block_id < header.block_count;
            if block.is_null() == expected {
                let what = if expected { "missing" } else { "stored past the block count" };
                return Err(Violation::new(self, Some(list_id), format!("block {} is {}", block_id, what))
                    .with_context("block_count", header.block_count));
            }
            if expected && block.header.block_id != block_id {
                return Err(Violation::new(
                    self,
                    Some(list_id),
                    format!("block {} is labelled {}", block_id, block.header.block_id),
                ));
            }
        }
        Ok(())
    }
}

/// Invariant: no block body exceeds the index block capacity, except a block
/// holding a single oversized record (only a new block can take one)
pub struct CapacityRespected;

impl Invariant for CapacityRespected {
    fn name(&self) -> &str {
        "CapacityRespected"
    }

    fn description(&self) -> &str {
        "Every block body fits the configured block capacity unless it holds one record"
    }

    fn check_list(&self, index: &PostingIndex, header: &ListHeader) -> Result<(), Violation> {
        for block_id in 0..header.block_count {
            let bh = index.get_block_header(header.list_id, block_id).map_err(|e| {
                Violation::new(self, Some(header.list_id), format!("unreadable block header: {}", e))
            })?;
            if bh.body_size as usize > index.block_capacity() && bh.record_count > 1 {
                return Err(Violation::new(
                    self,
                    Some(header.list_id),
                    format!(
                        "block {} holds {} bytes in {} records",
                        block_id, bh.body_size, bh.record_count
                    ),
                )
                .with_context("capacity", index.block_capacity()));
            }
        }
        Ok(())
    }
}

/// Invariant: list header counts equal the sums over its blocks
pub struct HeaderCountsConsistent;

impl Invariant for HeaderCountsConsistent {
    fn name(&self) -> &str {
        "HeaderCountsConsistent"
    }

    fn description(&self) -> &str {
        "List record and byte counts match the sum of its block headers"
    }

    fn check_list(&self, index: &PostingIndex, header: &ListHeader) -> Result<(), Violation> {
        let mut records = 0u64;
        let mut bytes = 0u64;
        for block_id in 0..header.block_count {
            let bh = index.get_block_header(header.list_id, block_id).map_err(|e| {
                Violation::new(self, Some(header.list_id), format!("unreadable block header: {}", e))
            })?;
            records += bh.record_count as u64;
            bytes += bh.body_size as u64;
        }
        if records != header.record_count || bytes != header.body_bytes {
            return Err(Violation::new(
                self,
                Some(header.list_id),
                "list header disagrees with its blocks".to_string(),
            )
            .with_context("header_records", header.record_count)
            .with_context("block_records", records)
            .with_context("header_bytes", header.body_bytes)
            .with_context("block_bytes", bytes));
        }
        Ok(())
    }
}

/// Invariant: every block body matches its checksum
pub struct ChecksumsValid;

impl Invariant for ChecksumsValid {
    fn name(&self) -> &str {
        "ChecksumsValid"
    }

    fn check_list(&self, index: &PostingIndex, header: &ListHeader) -> Result<(), Violation> {
        for block_id in 0..header.block_count {
            if let Err(e) = index.read_block(header.list_id, block_id, false) {
                return Err(Violation::new(
                    self,
                    Some(header.list_id),
                    format!("block {} failed to verify: {}", block_id, e),
                ));
            }
        }
        Ok(())
    }
}

/// Get all default invariants
pub fn default_invariants() -> Vec<Box<dyn Invariant>> {
    vec![
        Box::new(ContiguousBlocks),
        Box::new(CapacityRespected),
        Box::new(HeaderCountsConsistent),
        Box::new(ChecksumsValid),
    ]
}
