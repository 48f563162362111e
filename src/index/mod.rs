//! Block-structured inverted index for fingerprint postings
//!
//! # Architecture
//!
//! - `types`: list/block headers, block records and their binary layout
//! - `BlockCache`: write-back buffer for the blocks of one list
//! - `PostingIndex`: headers, block reads/writes, chunk append, flush
//! - `merge`: folding a delta index into a main index

mod types;
mod cache;
mod plist;
mod merge;

pub use types::*;
pub use cache::*;
pub use plist::*;
pub use merge::*;
