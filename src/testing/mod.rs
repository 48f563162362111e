//! Testing infrastructure for correctness verification
//!
//! Invariant checkers that walk a posting-list index and report lists whose
//! stored blocks disagree with their headers.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use fingerdb::testing::prelude::*;
//!
//! let violations = check_all_invariants(conn.main_index(), &default_invariants());
//! assert!(violations.is_empty());
//! ```
//!
//! # Invariants
//!
//! - **ContiguousBlocks**: block ids run from 0 without gaps
//! - **CapacityRespected**: no block body exceeds the block capacity
//! - **HeaderCountsConsistent**: list header counts match the blocks
//! - **ChecksumsValid**: every block body matches its CRC

pub mod invariants;

pub use invariants::{
    check_all_invariants, default_invariants, CapacityRespected, ChecksumsValid,
    ContiguousBlocks, HeaderCountsConsistent, Invariant, Violation,
};

/// Prelude for easy imports
pub mod prelude {
    pub use super::invariants::{check_all_invariants, default_invariants, Invariant, Violation};
}
