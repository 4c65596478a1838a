//! Segment-based inverted index storage
//!
//! Segments are immutable files holding postings, a front-coded term
//! dictionary and stored fields. Deletions live beside them in versioned
//! live-docs files.
//!
//! # Architecture
//!
//! - `SegmentWriter`: buffers and inverts documents, flushes a segment
//! - `SegmentReader`: verified, memory-mapped read access to one segment
//! - `SegmentMerger`: combines segments and drops deleted docs
//! - `TieredMergePolicy`: decides which segments to merge
//! - `Index`: publishes segment sets and commits the manifest

pub(crate) mod format;
pub(crate) mod index;
pub(crate) mod live_docs;
pub(crate) mod manifest;
pub(crate) mod merge;
pub(crate) mod merge_policy;
pub(crate) mod postings;
pub(crate) mod reader;
pub(crate) mod stored;
pub(crate) mod term_dict;
pub(crate) mod types;
pub(crate) mod varint;
pub(crate) mod writer;

pub use format::{Footer, Regions, SegmentBuilder, FOOTER_LEN, FORMAT_VERSION, SEGMENT_MAGIC};
pub use index::{Index, SegmentSet};
pub use live_docs::LiveDocs;
pub use manifest::{SegmentManifest, MANIFEST_FILE};
pub use merge::{DocMap, MergeCancel, MergeResult, SegmentMerger};
pub use merge_policy::{MergeCandidate, MergeReason, TieredMergePolicy};
pub use postings::{PostingsFormat, PostingsIterator, PostingsReader, PostingsWriter, SkipEntry};
pub use reader::{SegmentInfo, SegmentReader};
pub use stored::{StoredDocument, StoredField, StoredFieldsReader, StoredFieldsWriter};
pub use term_dict::{BlockIndexEntry, PrefixIter, TermDictWriter, TermDictionary, TermsIter};
pub use types::{DocId, Occurrence, Posting, SegmentId, Term, TermMeta, NO_MORE_DOCS};
pub use writer::{Document, Field, SegmentWriter};
