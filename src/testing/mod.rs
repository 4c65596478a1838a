//! Testing infrastructure for correctness verification
//!
//! - `FaultyDirectory`: fails writes, syncs or renames on demand
//! - `check_segment`: structural invariants of an open segment
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use lucent::testing::{check_segment, FaultyDirectory};
//!
//! let dir = FaultyDirectory::new(RamDirectory::new());
//! dir.fail_after_bytes(100);
//! assert!(writer.flush(&dir, SegmentId(0)).is_err());
//!
//! let violations = check_segment(&reader);
//! assert!(violations.is_empty());
//! ```

pub mod faulty;
pub mod invariants;

pub use faulty::FaultyDirectory;
pub use invariants::{
    check_all, check_segment, check_segments, default_checks, AdvanceMatchesNextDoc,
    LiveDocsConsistent, PostingsWellFormed, SegmentCheck, StoredFieldsReadable,
    TermsStrictlyIncreasing, Violation,
};
