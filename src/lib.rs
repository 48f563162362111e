pub mod collection;
pub mod config;
pub mod datastore;
pub mod error;
pub mod fingerprints;
pub mod index;
pub mod metadata;
pub mod metrics;
pub mod persistence;
pub mod testing;

pub use collection::Collection;
pub use config::{CollectionNames, DatastoreConfig, OpMode, OpenMode};
pub use datastore::{Connection, DataStore, OpenFlags};
pub use error::{FingerdbError, Result};
pub use fingerprints::{Fid, FingerprintStore};
pub use index::{Block, BlockHeader, BlockId, ListHeader, ListId, MergeStats, PostingIndex};
pub use metadata::{DatastoreInfo, InfoStore, MatchType, MetadataStore};
pub use metrics::StoreMetrics;
pub use persistence::{ByteStore, FjallBackend, MemoryBackend, StoreBackend};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
