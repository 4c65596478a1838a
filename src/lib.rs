pub mod analysis;
pub mod config;
pub mod error;
pub mod segment;
pub mod store;
pub mod testing;

pub use analysis::{Analyzer, Token, WhitespaceAnalyzer};
pub use config::{IndexConfig, MergePolicyConfig, SyncPolicy};
pub use error::{LucentError, Result};
pub use segment::{
    DocId, Document, Field, Index, SegmentId, SegmentInfo, SegmentMerger, SegmentReader,
    SegmentSet, SegmentWriter, Term, NO_MORE_DOCS,
};
pub use store::{Directory, FsDirectory, RamDirectory};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
