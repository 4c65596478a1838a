//! Core types for the segment-based index

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Segment identifier (monotonically increasing per index)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentId(pub u64);

impl SegmentId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Name of the segment data file
    pub fn file_name(&self) -> String {
        format!("{}.seg", self)
    }

    /// Name of the live-docs file for a deletion generation
    pub fn live_docs_file_name(&self, del_gen: u64) -> String {
        format!("{}_{}.liv", self, del_gen)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment_{}", self.0)
    }
}

/// Dense document number within a segment (0..doc_count)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocId(pub u32);

/// Returned by postings iterators once exhausted
pub const NO_MORE_DOCS: DocId = DocId(u32::MAX);

impl DocId {
    pub fn new(n: u32) -> Self {
        Self(n)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    pub fn is_exhausted(self) -> bool {
        self == NO_MORE_DOCS
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_exhausted() {
            write!(f, "NO_MORE_DOCS")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// An indexed token: raw bytes ordered by unsigned byte-wise comparison
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Term(Vec<u8>);

impl Term {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }
}

impl From<&str> for Term {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Term {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<&[u8]> for Term {
    fn from(b: &[u8]) -> Self {
        Self(b.to_vec())
    }
}

impl Borrow<[u8]> for Term {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Term {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// One occurrence of a term inside a document
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub position: u32,
    pub start_offset: u32,
    pub end_offset: u32,
}

impl Occurrence {
    pub fn new(position: u32, start_offset: u32, end_offset: u32) -> Self {
        Self {
            position,
            start_offset,
            end_offset,
        }
    }

    pub fn at(position: u32) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }
}

/// A single posting entry within a posting list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub doc: DocId,
    /// Term frequency in this document
    pub freq: u32,
    /// Occurrences in increasing position order (empty unless positions
    /// are indexed)
    pub occurrences: Vec<Occurrence>,
}

impl Posting {
    pub fn new(doc: DocId, freq: u32) -> Self {
        Self {
            doc,
            freq,
            occurrences: Vec::new(),
        }
    }

    pub fn with_occurrences(doc: DocId, occurrences: Vec<Occurrence>) -> Self {
        Self {
            doc,
            freq: occurrences.len() as u32,
            occurrences,
        }
    }
}

/// Per-term metadata stored in the term dictionary
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermMeta {
    /// Offset of the term's postings in the postings region
    pub postings_offset: u32,
    /// Offset of the term's skip entries; 0 when the list has none
    pub skip_offset: u32,
    /// Number of documents containing this term
    pub doc_freq: u32,
    /// Total occurrences across all documents
    pub total_term_freq: u64,
}

impl TermMeta {
    pub fn has_skip_data(&self) -> bool {
        self.skip_offset != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_id() {
        let id = SegmentId::new(42);
        assert_eq!(id.0, 42);
        assert_eq!(id.next().0, 43);
        assert_eq!(format!("{}", id), "segment_42");
        assert_eq!(id.file_name(), "segment_42.seg");
        assert_eq!(id.live_docs_file_name(3), "segment_42_3.liv");
    }

    #[test]
    fn test_doc_id() {
        let doc = DocId::new(100);
        assert_eq!(doc.as_u32(), 100);
        assert_eq!(doc.as_usize(), 100);
        assert!(!doc.is_exhausted());
        assert!(NO_MORE_DOCS.is_exhausted());
        assert_eq!(NO_MORE_DOCS.to_string(), "NO_MORE_DOCS");
    }

    #[test]
    fn test_term_ordering_is_unsigned_bytewise() {
        let mut terms = vec![
            Term::new(vec![0xC3, 0xA9]),
            Term::from("b"),
            Term::from("ab"),
            Term::from("a"),
        ];
        terms.sort();
        assert_eq!(terms[0], Term::from("a"));
        assert_eq!(terms[1], Term::from("ab"));
        assert_eq!(terms[2], Term::from("b"));
        // Bytes >= 0x80 sort after ASCII
        assert_eq!(terms[3].as_bytes(), &[0xC3, 0xA9]);
    }

    #[test]
    fn test_posting_freq_follows_occurrences() {
        let posting = Posting::with_occurrences(
            DocId(3),
            vec![Occurrence::new(0, 0, 1), Occurrence::new(4, 8, 9)],
        );
        assert_eq!(posting.freq, 2);
    }
}
