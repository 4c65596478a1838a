//! Segment writer for creating new immutable segments
//!
//! Documents are inverted into an in-memory `term -> postings` map as they
//! arrive; doc ids are assigned sequentially, so every posting list is
//! already doc-sorted. `flush` sorts the terms and hands everything to
//! `SegmentBuilder`, the same encode path merges use.

use std::collections::HashMap;
use std::mem;

use roaring::RoaringBitmap;
use tracing::{debug, info};

use super::format::SegmentBuilder;
use super::postings::PostingsFormat;
use super::reader::SegmentInfo;
use super::stored::{StoredDocument, StoredField};
use super::types::{DocId, Occurrence, Posting, SegmentId, Term, NO_MORE_DOCS};
use crate::analysis::{Analyzer, Token};
use crate::config::IndexConfig;
use crate::error::{LucentError, Result};
use crate::store::Directory;

/// A named field: indexed tokens and an optional stored value
#[derive(Clone, Debug, Default)]
pub struct Field {
    pub name: String,
    pub tokens: Vec<Token>,
    pub stored: Option<String>,
}

impl Field {
    /// Indexed, not stored
    pub fn indexed(name: impl Into<String>, tokens: Vec<Token>) -> Self {
        Self {
            name: name.into(),
            tokens,
            stored: None,
        }
    }

    /// Analyzed and stored
    pub fn text(name: impl Into<String>, text: &str, analyzer: &dyn Analyzer) -> Self {
        Self {
            name: name.into(),
            tokens: analyzer.analyze(text),
            stored: Some(text.to_string()),
        }
    }

    /// Stored only
    pub fn stored(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tokens: Vec::new(),
            stored: Some(value.into()),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Document {
    /// External unique key, if any
    pub key: Option<String>,
    pub fields: Vec<Field>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn add_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    fn stored(&self) -> StoredDocument {
        StoredDocument {
            key: self.key.clone(),
            fields: self
                .fields
                .iter()
                .filter_map(|f| {
                    f.stored.as_ref().map(|value| StoredField {
                        name: f.name.clone(),
                        value: value.clone(),
                    })
                })
                .collect(),
        }
    }
}

/// Buffers documents and flushes them as one segment
pub struct SegmentWriter {
    config: IndexConfig,
    format: PostingsFormat,
    /// Term to postings mapping
    terms: HashMap<Term, Vec<Posting>>,
    stored: Vec<StoredDocument>,
    /// Buffered docs deleted before flush
    deleted: RoaringBitmap,
    /// Approximate heap usage of buffered postings
    size_bytes: usize,
}

impl SegmentWriter {
    pub fn new(config: IndexConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            format: PostingsFormat::from_config(&config),
            config,
            terms: HashMap::new(),
            stored: Vec::new(),
            deleted: RoaringBitmap::new(),
            size_bytes: 0,
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Invert a document and assign it the next doc id
    ///
    /// Fields share one position and offset space: each field continues
    /// after the previous field's last token. A rejected document leaves
    /// the buffer unchanged.
    pub fn add_document(&mut self, doc: &Document) -> Result<DocId> {
        let doc_id = self.stored.len() as u32;
        if doc_id >= NO_MORE_DOCS.as_u32() - 1 {
            return Err(LucentError::CapacityExceeded {
                limit: (NO_MORE_DOCS.as_u32() - 1) as u64,
                attempted: doc_id as u64 + 1,
            });
        }
        let doc_id = DocId(doc_id);

        let mut by_term: HashMap<&Term, Vec<Occurrence>> = HashMap::new();
        let mut position_base = 0u32;
        let mut offset_base = 0u32;
        for field in &doc.fields {
            let mut next_position = position_base;
            let mut next_offset = offset_base;
            for token in &field.tokens {
                let occurrence = Occurrence::new(
                    position_base.saturating_add(token.position),
                    offset_base.saturating_add(token.start_offset),
                    offset_base.saturating_add(token.end_offset),
                );
                next_position = next_position.max(occurrence.position.saturating_add(1));
                next_offset = next_offset.max(occurrence.end_offset.saturating_add(1));
                by_term.entry(&token.term).or_default().push(occurrence);
            }
            position_base = next_position;
            offset_base = next_offset;
        }

        for (term, occurrences) in by_term.iter_mut() {
            occurrences.sort_by_key(|o| (o.position, o.start_offset));
            if self.format.offsets {
                check_offsets(term, occurrences)?;
            }
        }

        for (term, occurrences) in by_term {
            let posting = if self.format.positions {
                Posting::with_occurrences(doc_id, occurrences)
            } else {
                Posting::new(doc_id, occurrences.len() as u32)
            };
            self.size_bytes += mem::size_of::<Posting>()
                + posting.occurrences.len() * mem::size_of::<Occurrence>();
            match self.terms.get_mut(term) {
                Some(postings) => postings.push(posting),
                None => {
                    self.size_bytes += term.len() + mem::size_of::<Term>();
                    self.terms.insert(term.clone(), vec![posting]);
                }
            }
        }

        let stored = doc.stored();
        self.size_bytes += stored.fields.iter().map(|f| f.name.len() + f.value.len()).sum::<usize>();
        self.stored.push(stored);
        Ok(doc_id)
    }

    /// Number of buffered documents
    pub fn num_docs(&self) -> u32 {
        self.stored.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.stored.is_empty()
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn ram_bytes_used(&self) -> usize {
        self.size_bytes
    }

    /// Buffered postings for a term
    pub fn postings(&self, term: &[u8]) -> Option<&[Posting]> {
        self.terms.get(term).map(|p| p.as_slice())
    }

    /// Delete every buffered doc containing `term`; returns how many were
    /// not already deleted
    ///
    /// Deleted docs are still written on flush; the caller applies
    /// `deleted_docs` to the flushed segment's live docs.
    pub fn delete_term(&mut self, term: &[u8]) -> u32 {
        let Some(postings) = self.terms.get(term) else {
            return 0;
        };
        postings
            .iter()
            .filter(|p| self.deleted.insert(p.doc.as_u32()))
            .count() as u32
    }

    /// Buffered docs deleted since the last flush
    pub fn deleted_docs(&self) -> &RoaringBitmap {
        &self.deleted
    }

    /// Write the buffered documents as segment `id`
    ///
    /// On success the buffer is reset. On failure nothing is published and
    /// the buffer is kept, so the caller may retry.
    pub fn flush(&mut self, dir: &dyn Directory, id: SegmentId) -> Result<SegmentInfo> {
        let info = self.write_segment(dir, id)?;
        self.reset();
        Ok(info)
    }

    /// Publish the buffered documents as segment `id`, keeping the buffer
    ///
    /// Callers that must do more work before the segment counts as flushed
    /// call `reset` themselves once that work succeeds.
    pub fn write_segment(&self, dir: &dyn Directory, id: SegmentId) -> Result<SegmentInfo> {
        let mut terms: Vec<&Term> = self.terms.keys().collect();
        terms.sort();

        let mut builder = SegmentBuilder::new(id, &self.config);
        for doc in &self.stored {
            builder.add_document(doc)?;
        }
        for term in &terms {
            builder.add_term(term.as_bytes(), &self.terms[*term])?;
        }

        let info = match builder.publish(dir, self.config.sync) {
            Ok(info) => info,
            Err(e) => {
                debug!(segment = %id, error = %e, "flush aborted");
                return Err(e);
            }
        };
        info!(
            segment = %id,
            docs = info.doc_count,
            terms = terms.len(),
            bytes = info.size_bytes,
            "flushed segment"
        );
        Ok(info)
    }

    /// Drop all buffered documents
    pub fn reset(&mut self) {
        self.terms.clear();
        self.stored.clear();
        self.deleted.clear();
        self.size_bytes = 0;
    }
}

fn check_offsets(term: &Term, occurrences: &[Occurrence]) -> Result<()> {
    let mut last_start = 0;
    for occ in occurrences {
        if occ.end_offset < occ.start_offset || occ.start_offset < last_start {
            return Err(LucentError::InvalidArgument(format!(
                "inconsistent offsets for term {:?}",
                term.to_string()
            )));
        }
        last_start = occ.start_offset;
    }
    Ok(())
}
