//! Segment merging
//!
//! Combines N segments into one: live docs are renumbered densely in input
//! order, the term streams are merged through a min-heap, and each term's
//! posting lists are concatenated in input order (which keeps doc ids
//! increasing, since each input's docs map into a higher range than the
//! previous input's). The output goes through the same `SegmentBuilder` as
//! a flush and is published atomically; any failure or cancellation leaves
//! nothing behind and the inputs untouched.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use tracing::{debug, info};

use super::format::SegmentBuilder;
use super::live_docs::LiveDocs;
use super::postings::PostingsFormat;
use super::reader::{SegmentInfo, SegmentReader};
use super::term_dict::TermsIter;
use super::types::{DocId, SegmentId, Term, TermMeta, NO_MORE_DOCS};
use crate::config::IndexConfig;
use crate::error::{LucentError, Result};
use crate::store::Directory;

/// Cooperative cancellation flag shared with a running merge
#[derive(Clone, Debug, Default)]
pub struct MergeCancel(Arc<AtomicBool>);

impl MergeCancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::Acquire)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(LucentError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Old doc id to merged doc id for one input segment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocMap {
    base: u32,
    /// Rank among live docs, `u32::MAX` for deleted docs
    ranks: Vec<u32>,
    live: u32,
}

impl DocMap {
    fn build(base: u32, live_docs: &LiveDocs) -> Self {
        let mut ranks = Vec::with_capacity(live_docs.max_doc() as usize);
        let mut live = 0u32;
        for doc in 0..live_docs.max_doc() {
            if live_docs.is_live(DocId(doc)) {
                ranks.push(live);
                live += 1;
            } else {
                ranks.push(u32::MAX);
            }
        }
        Self { base, ranks, live }
    }

    /// Merged doc id, `None` if the doc was dropped
    pub fn get(&self, old: DocId) -> Option<DocId> {
        match self.ranks.get(old.as_usize()) {
            Some(&rank) if rank != u32::MAX => Some(DocId(self.base + rank)),
            _ => None,
        }
    }

    /// First merged doc id of this input
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Docs carried into the merged segment
    pub fn live_count(&self) -> u32 {
        self.live
    }
}

/// Output of a successful merge
#[derive(Debug)]
pub struct MergeResult {
    pub info: SegmentInfo,
    /// One map per input, in input order
    pub doc_maps: Vec<DocMap>,
    /// The live docs each input was merged with
    pub merged_live: Vec<Arc<LiveDocs>>,
}

struct HeapEntry {
    term: Term,
    segment: usize,
    meta: TermMeta,
}

// Reversed so the max-heap pops the smallest (term, segment) first
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .term
            .cmp(&self.term)
            .then_with(|| other.segment.cmp(&self.segment))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

/// Merges segments into a new one
pub struct SegmentMerger {
    config: IndexConfig,
    cancel: MergeCancel,
}

impl SegmentMerger {
    pub fn new(config: IndexConfig) -> Self {
        Self::with_cancel(config, MergeCancel::new())
    }

    pub fn with_cancel(config: IndexConfig, cancel: MergeCancel) -> Self {
        Self { config, cancel }
    }

    pub fn cancel_handle(&self) -> MergeCancel {
        self.cancel.clone()
    }

    /// Merge `readers` into segment `id` and publish it in `dir`
    ///
    /// Deleted docs are dropped using each reader's live docs at the start
    /// of the merge.
    pub fn merge(
        &self,
        readers: &[&SegmentReader],
        dir: &dyn Directory,
        id: SegmentId,
    ) -> Result<MergeResult> {
        if readers.is_empty() {
            return Err(LucentError::InvalidArgument("no segments to merge".to_string()));
        }
        self.cancel.check()?;

        let merged_live: Vec<Arc<LiveDocs>> = readers.iter().map(|r| r.live_docs()).collect();
        let mut doc_maps = Vec::with_capacity(readers.len());
        let mut base = 0u64;
        for live in &merged_live {
            let map = DocMap::build(base as u32, live);
            base += map.live_count() as u64;
            if base >= NO_MORE_DOCS.as_u32() as u64 {
                return Err(LucentError::CapacityExceeded {
                    limit: NO_MORE_DOCS.as_u32() as u64 - 1,
                    attempted: base,
                });
            }
            doc_maps.push(map);
        }

        let format = self.output_format(readers);
        let mut builder = SegmentBuilder::with_format(id, format, &self.config);
        let inputs: Vec<String> = readers.iter().map(|r| r.id().to_string()).collect();
        debug!(segment = %id, inputs = ?inputs, docs = base, "merge started");

        let result = self.merge_into(&mut builder, readers, &merged_live, &doc_maps, format);
        if let Err(e) = result {
            debug!(segment = %id, error = %e, "merge aborted");
            return Err(e);
        }

        self.cancel.check()?;
        let terms = builder.term_count();
        let info = builder.publish(dir, self.config.sync)?;
        info!(
            segment = %id,
            inputs = ?inputs,
            docs = info.doc_count,
            terms,
            bytes = info.size_bytes,
            "merged segments"
        );

        Ok(MergeResult {
            info,
            doc_maps,
            merged_live,
        })
    }

    /// Positions and offsets survive only if every input has them
    fn output_format(&self, readers: &[&SegmentReader]) -> PostingsFormat {
        let mut format = PostingsFormat::from_config(&self.config);
        for reader in readers {
            let input = reader.format();
            format.positions &= input.positions;
            format.offsets &= input.offsets && format.positions;
        }
        format
    }

    fn merge_into(
        &self,
        builder: &mut SegmentBuilder,
        readers: &[&SegmentReader],
        merged_live: &[Arc<LiveDocs>],
        doc_maps: &[DocMap],
        format: PostingsFormat,
    ) -> Result<()> {
        for (i, reader) in readers.iter().enumerate() {
            for (n, doc) in merged_live[i].iter_live().enumerate() {
                if n % 1024 == 0 {
                    self.cancel.check()?;
                }
                builder.add_document(&reader.document(doc)?)?;
            }
        }

        let mut streams: Vec<TermsIter> = readers.iter().map(|r| r.terms()).collect();
        let mut heap = BinaryHeap::with_capacity(readers.len());
        for (segment, stream) in streams.iter_mut().enumerate() {
            if let Some((term, meta)) = stream.next_entry()? {
                heap.push(HeapEntry { term, segment, meta });
            }
        }

        let block = self.config.terms_per_block.max(1) as u64;
        let mut terms_seen = 0u64;
        let mut group: Vec<(usize, TermMeta)> = Vec::with_capacity(readers.len());
        while let Some(first) = heap.pop() {
            if terms_seen % block == 0 {
                self.cancel.check()?;
            }
            terms_seen += 1;

            let term = first.term;
            group.clear();
            group.push((first.segment, first.meta));
            while heap.peek().map_or(false, |e| e.term == term) {
                if let Some(entry) = heap.pop() {
                    group.push((entry.segment, entry.meta));
                }
            }
            for &(segment, _) in &group {
                if let Some((next, meta)) = streams[segment].next_entry()? {
                    heap.push(HeapEntry {
                        term: next,
                        segment,
                        meta,
                    });
                }
            }
            group.sort_by_key(|(segment, _)| *segment);

            let mut started = false;
            for &(segment, meta) in &group {
                let live = merged_live[segment].has_deletions().then(|| Arc::clone(&merged_live[segment]));
                let mut iter = readers[segment].open_postings_with(&meta, live)?;
                while iter.next_doc()? != NO_MORE_DOCS {
                    let mut posting = match iter.posting()? {
                        Some(posting) => posting,
                        None => break,
                    };
                    posting.doc = doc_maps[segment].get(posting.doc).ok_or_else(|| {
                        LucentError::corrupt(readers[segment].id(), "posting for a doc outside the segment")
                    })?;
                    if !format.positions {
                        posting.occurrences.clear();
                    }
                    if !started {
                        builder.start_term();
                        started = true;
                    }
                    builder.add_posting(&posting)?;
                }
            }
            if started {
                builder.finish_term(term.as_bytes())?;
            }
        }
        Ok(())
    }
}
