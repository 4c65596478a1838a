//! Segment index: buffered writer + published immutable segments
//!
//! `Index` owns one `SegmentWriter` for incoming documents and publishes
//! the visible segment set through an `ArcSwap`. Readers take a
//! `snapshot()` and never block; flush, merge and deletions build a new
//! set and swap it in under the publication lock.
//!
//! Deletions never modify a published reader handle. `delete_by_term`
//! derives new handles with the updated live docs, so earlier snapshots
//! keep seeing the docs they started with. `commit` writes the pending
//! live-docs generations and then the manifest.
//!
//! Files of merged-away segments are reclaimed once no snapshot holds
//! their handles and the last committed manifest no longer names them.
//!
//! Lock order: writer, then state. Merges take the merge lock, then state.

use std::collections::HashSet;
use std::fmt;
use std::mem;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::live_docs::LiveDocs;
use super::manifest::{SegmentManifest, MANIFEST_FILE};
use super::merge::{MergeCancel, SegmentMerger};
use super::merge_policy::TieredMergePolicy;
use super::postings::PostingsIterator;
use super::reader::{SegmentInfo, SegmentReader};
use super::stored::StoredDocument;
use super::types::{DocId, SegmentId, NO_MORE_DOCS};
use super::writer::{Document, SegmentWriter};
use crate::config::IndexConfig;
use crate::error::{LucentError, Result};
use crate::store::{Directory, TEMP_SUFFIX};

/// An immutable, point-in-time view of the index's segments
#[derive(Debug, Default)]
pub struct SegmentSet {
    version: u64,
    readers: Vec<Arc<SegmentReader>>,
}

impl SegmentSet {
    /// Incremented on every publication
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn readers(&self) -> &[Arc<SegmentReader>] {
        &self.readers
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    pub fn get(&self, id: SegmentId) -> Option<&Arc<SegmentReader>> {
        self.readers.iter().find(|r| r.id() == id)
    }

    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.readers.iter().map(|r| r.id()).collect()
    }

    /// Live docs across all segments
    pub fn num_docs(&self) -> u64 {
        self.readers.iter().map(|r| r.num_docs() as u64).sum()
    }

    /// All docs across all segments, deleted ones included
    pub fn max_doc(&self) -> u64 {
        self.readers.iter().map(|r| r.max_doc() as u64).sum()
    }

    /// Segment infos with deletion counts as seen by this view
    pub fn live_infos(&self) -> Vec<SegmentInfo> {
        self.readers
            .iter()
            .map(|r| {
                let mut info = r.info();
                info.del_count = r.num_deleted();
                info
            })
            .collect()
    }

    /// Docs containing the term, deleted ones included
    pub fn doc_freq(&self, term: &[u8]) -> Result<u64> {
        let mut total = 0u64;
        for reader in &self.readers {
            total += reader.doc_freq(term)? as u64;
        }
        Ok(total)
    }

    /// Per-segment postings of a term, live docs only
    pub fn postings(&self, term: &[u8]) -> Result<Vec<(SegmentId, PostingsIterator)>> {
        let mut out = Vec::new();
        for reader in &self.readers {
            if let Some(iter) = reader.postings(term)? {
                out.push((reader.id(), iter));
            }
        }
        Ok(out)
    }

    /// Live docs containing the term, in segment order
    pub fn term_docs(&self, term: &[u8]) -> Result<Vec<(SegmentId, DocId)>> {
        let mut out = Vec::new();
        for (id, mut iter) in self.postings(term)? {
            loop {
                let doc = iter.next_doc()?;
                if doc == NO_MORE_DOCS {
                    break;
                }
                out.push((id, doc));
            }
        }
        Ok(out)
    }

    pub fn document(&self, id: SegmentId, doc: DocId) -> Result<StoredDocument> {
        self.get(id)
            .ok_or_else(|| LucentError::InvalidArgument(format!("no such segment {}", id)))?
            .document(doc)
    }
}

/// Mutable bookkeeping guarded by the publication lock
struct IndexState {
    next_segment_id: SegmentId,
    /// Generation of the last committed manifest
    generation: u64,
    /// Files named by the last committed manifest
    committed_files: HashSet<String>,
    /// Handles of merged-away segments whose files are not yet deleted
    retired: Vec<Arc<SegmentReader>>,
}

impl IndexState {
    fn allocate_segment_id(&mut self) -> SegmentId {
        let id = self.next_segment_id;
        self.next_segment_id = id.next();
        id
    }

    /// Remove and return retired handles nothing references any more
    fn take_reclaimable(&mut self) -> Vec<Arc<SegmentReader>> {
        let committed_files = &self.committed_files;
        let (reclaimable, kept): (Vec<_>, Vec<_>) = mem::take(&mut self.retired)
            .into_iter()
            .partition(|reader: &Arc<SegmentReader>| {
                // Snapshots hold either this handle or an older one of the segment
                if Arc::strong_count(reader) > 1 || reader.handle_count() > 1 {
                    return false;
                }
                !reader.info().files().iter().any(|f| committed_files.contains(f))
            });
        self.retired = kept;
        reclaimable
    }
}

/// A directory of segments with a single writer and many readers
pub struct Index {
    dir: Arc<dyn Directory>,
    config: IndexConfig,
    policy: TieredMergePolicy,
    writer: Mutex<SegmentWriter>,
    merge_lock: Mutex<()>,
    state: Mutex<IndexState>,
    current: ArcSwap<SegmentSet>,
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.current.load();
        f.debug_struct("Index")
            .field("dir", &self.dir)
            .field("segments", &current.segment_ids())
            .field("buffered_docs", &self.writer.lock().num_docs())
            .finish()
    }
}

impl Index {
    /// Open the index committed in `dir`, or start an empty one
    ///
    /// Files left over from an interrupted flush, merge or commit are
    /// removed.
    pub fn open(dir: Arc<dyn Directory>, config: IndexConfig) -> Result<Self> {
        let writer = SegmentWriter::new(config.clone())?;
        let manifest = SegmentManifest::load(dir.as_ref())?.unwrap_or_default();

        let mut readers = Vec::with_capacity(manifest.segments.len());
        for info in &manifest.segments {
            readers.push(Arc::new(SegmentReader::open(dir.as_ref(), info)?));
        }

        let committed_files: HashSet<String> = manifest.referenced_files().into_iter().collect();
        let mut removed = 0;
        for name in dir.list()? {
            if is_index_file(&name) && !committed_files.contains(&name) {
                delete_quietly(dir.as_ref(), &name);
                removed += 1;
            }
        }

        info!(
            generation = manifest.generation,
            segments = readers.len(),
            docs = manifest.total_live_doc_count(),
            removed_files = removed,
            "opened index"
        );

        Ok(Self {
            policy: TieredMergePolicy::new(config.merge.clone()),
            config,
            writer: Mutex::new(writer),
            merge_lock: Mutex::new(()),
            state: Mutex::new(IndexState {
                next_segment_id: manifest.next_segment_id,
                generation: manifest.generation,
                committed_files,
                retired: Vec::new(),
            }),
            current: ArcSwap::from_pointee(SegmentSet {
                version: 0,
                readers,
            }),
            dir,
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.dir
    }

    /// Generation of the last successful commit
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Current published segments
    pub fn snapshot(&self) -> Arc<SegmentSet> {
        self.current.load_full()
    }

    pub fn num_buffered_docs(&self) -> u32 {
        self.writer.lock().num_docs()
    }

    /// Buffer a document, flushing once `max_buffered_docs` is reached
    pub fn add_document(&self, doc: &Document) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.add_document(doc)?;
        if writer.num_docs() as usize >= self.config.max_buffered_docs {
            self.flush_locked(&mut writer)?;
        }
        Ok(())
    }

    /// Publish buffered documents as a new segment
    ///
    /// Returns `None` when nothing was buffered. On failure the buffer and
    /// the published segments are unchanged.
    pub fn flush(&self) -> Result<Option<SegmentInfo>> {
        let mut writer = self.writer.lock();
        self.flush_locked(&mut writer)
    }

    fn flush_locked(&self, writer: &mut SegmentWriter) -> Result<Option<SegmentInfo>> {
        if writer.is_empty() {
            return Ok(None);
        }
        let id = self.state.lock().allocate_segment_id();
        let info = writer.write_segment(self.dir.as_ref(), id)?;

        let reader = match SegmentReader::open(self.dir.as_ref(), &info) {
            Ok(reader) => reader,
            Err(e) => {
                delete_quietly(self.dir.as_ref(), &info.file_name());
                return Err(e);
            }
        };
        let deleted = writer.deleted_docs();
        let reader = if deleted.is_empty() {
            reader
        } else {
            let mut live = LiveDocs::new(info.doc_count);
            for doc in deleted {
                live.delete(DocId(doc));
            }
            reader.with_live_docs(info.clone(), live)
        };
        writer.reset();

        let _state = self.state.lock();
        let current = self.current.load_full();
        let mut readers = current.readers.clone();
        readers.push(Arc::new(reader));
        self.publish(&current, readers);
        Ok(Some(info))
    }

    /// Delete every doc containing `term`, buffered docs included
    ///
    /// Returns the number of docs that were live. Snapshots taken earlier
    /// are unaffected.
    pub fn delete_by_term(&self, term: &[u8]) -> Result<u32> {
        let mut writer = self.writer.lock();
        let mut deleted = writer.delete_term(term);

        let _state = self.state.lock();
        let current = self.current.load_full();
        let mut readers = Vec::with_capacity(current.len());
        let mut changed = false;
        for reader in current.readers() {
            let docs = match reader.postings(term)? {
                Some(mut iter) => {
                    let mut docs = Vec::new();
                    loop {
                        let doc = iter.next_doc()?;
                        if doc == NO_MORE_DOCS {
                            break;
                        }
                        docs.push(doc);
                    }
                    docs
                }
                None => Vec::new(),
            };
            if docs.is_empty() {
                readers.push(Arc::clone(reader));
                continue;
            }

            let mut live = (*reader.live_docs()).clone();
            for doc in docs {
                if live.delete(doc) {
                    deleted += 1;
                }
            }
            readers.push(Arc::new(reader.with_live_docs(reader.info(), live)));
            changed = true;
        }

        if changed {
            self.publish(&current, readers);
        }
        debug!(term = %String::from_utf8_lossy(term), deleted, "deleted by term");
        Ok(deleted)
    }

    /// Merge the given segments into one
    pub fn merge(&self, ids: &[SegmentId]) -> Result<Option<SegmentInfo>> {
        self.merge_with_cancel(ids, MergeCancel::new())
    }

    /// Merge the given segments, stopping early if `cancel` fires
    ///
    /// Returns the merged segment's info, or `None` when every input doc
    /// was deleted and the segments were simply dropped. Deletions that
    /// land on the inputs while the merge runs are carried onto the merged
    /// segment. A failed or cancelled merge leaves the index unchanged.
    pub fn merge_with_cancel(
        &self,
        ids: &[SegmentId],
        cancel: MergeCancel,
    ) -> Result<Option<SegmentInfo>> {
        let _merging = self.merge_lock.lock();

        let mut unique = HashSet::new();
        if ids.is_empty() || !ids.iter().all(|id| unique.insert(*id)) {
            return Err(LucentError::InvalidArgument(format!(
                "merge needs distinct segment ids, got {:?}",
                ids
            )));
        }
        let snapshot = self.snapshot();
        let inputs = ids
            .iter()
            .map(|id| {
                snapshot
                    .get(*id)
                    .cloned()
                    .ok_or_else(|| LucentError::InvalidArgument(format!("no such segment {}", id)))
            })
            .collect::<Result<Vec<_>>>()?;
        drop(snapshot);

        let id = self.state.lock().allocate_segment_id();
        let merger = SegmentMerger::with_cancel(self.config.clone(), cancel);
        let refs: Vec<&SegmentReader> = inputs.iter().map(|r| r.as_ref()).collect();
        let result = merger.merge(&refs, self.dir.as_ref(), id)?;
        drop(refs);
        drop(inputs);

        let merged = if result.info.doc_count > 0 {
            match SegmentReader::open(self.dir.as_ref(), &result.info) {
                Ok(reader) => Some(reader),
                Err(e) => {
                    delete_quietly(self.dir.as_ref(), &result.info.file_name());
                    return Err(e);
                }
            }
        } else {
            delete_quietly(self.dir.as_ref(), &result.info.file_name());
            None
        };

        let mut state = self.state.lock();
        let current = self.current.load_full();
        let mut carried = merged.as_ref().map(|m| (*m.live_docs()).clone());
        for (i, input_id) in ids.iter().enumerate() {
            let now = current.get(*input_id).ok_or_else(|| {
                LucentError::InvalidArgument(format!("{} removed while merging", input_id))
            })?;
            if let Some(live) = carried.as_mut() {
                for doc in now.live_docs().deleted().iter() {
                    let doc = DocId(doc);
                    if !result.merged_live[i].is_live(doc) {
                        continue;
                    }
                    if let Some(new_doc) = result.doc_maps[i].get(doc) {
                        live.delete(new_doc);
                    }
                }
            }
        }

        let merged = match (merged, carried) {
            (Some(reader), Some(live)) if live.has_deletions() => {
                debug!(segment = %id, carried = live.num_deleted(), "carried deletions onto merged segment");
                Some(Arc::new(reader.with_live_docs(result.info.clone(), live)))
            }
            (reader, _) => reader.map(Arc::new),
        };

        let mut readers = Vec::with_capacity(current.len());
        let mut inserted = false;
        for reader in current.readers() {
            if ids.contains(&reader.id()) {
                if !inserted {
                    readers.extend(merged.clone());
                    inserted = true;
                }
                state.retired.push(Arc::clone(reader));
            } else {
                readers.push(Arc::clone(reader));
            }
        }
        self.publish(&current, readers);
        drop(current);
        let reclaimable = state.take_reclaimable();
        drop(state);
        self.delete_segment_files(&reclaimable);

        Ok(merged.map(|_| result.info))
    }

    /// Run every merge the policy proposes for the current segments
    pub fn maybe_merge(&self) -> Result<Vec<SegmentInfo>> {
        let candidates = self.policy.find_merges(&self.snapshot().live_infos());
        let mut merged = Vec::new();
        for candidate in candidates {
            debug!(
                segments = ?candidate.segment_ids,
                reason = ?candidate.reason,
                score = candidate.score,
                "running policy merge"
            );
            merged.extend(self.merge(&candidate.segment_ids)?);
        }
        Ok(merged)
    }

    /// Merge down to at most `max_segments` segments
    pub fn force_merge(&self, max_segments: usize) -> Result<Option<SegmentInfo>> {
        match self
            .policy
            .find_forced_merge(&self.snapshot().live_infos(), max_segments)
        {
            Some(candidate) => self.merge(&candidate.segment_ids),
            None => Ok(None),
        }
    }

    /// Flush, persist pending deletions and publish a new manifest
    ///
    /// Returns the new generation. Until this returns, a crash or reopen
    /// recovers the previous commit.
    pub fn commit(&self) -> Result<u64> {
        // The writer lock keeps flushes, deletions and other commits out.
        // Merges may still publish while the files below are written.
        let mut writer = self.writer.lock();
        self.flush_locked(&mut writer)?;

        let current = self.current.load_full();
        let (generation, next_segment_id) = {
            let state = self.state.lock();
            (state.generation + 1, state.next_segment_id)
        };
        let mut segments = Vec::with_capacity(current.len());
        for reader in current.readers() {
            segments.push(reader.commit_deletions(self.dir.as_ref(), self.config.sync)?);
        }

        let manifest = SegmentManifest {
            version: SegmentManifest::VERSION,
            generation,
            next_segment_id,
            segments,
        };
        manifest.commit(self.dir.as_ref(), self.config.sync)?;
        drop(current);

        let committed: HashSet<String> = manifest.referenced_files().into_iter().collect();
        let (obsolete, reclaimable) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.generation = generation;
            let obsolete: Vec<String> = state
                .committed_files
                .difference(&committed)
                .filter(|file| !state.retired.iter().any(|r| r.info().files().contains(*file)))
                .cloned()
                .collect();
            state.committed_files = committed;
            (obsolete, state.take_reclaimable())
        };

        for file in &obsolete {
            delete_quietly(self.dir.as_ref(), file);
        }
        self.delete_segment_files(&reclaimable);
        Ok(generation)
    }

    /// Delete files of merged-away segments that nothing references any
    /// more; returns the number of segments reclaimed
    pub fn reclaim(&self) -> usize {
        let reclaimable = self.state.lock().take_reclaimable();
        self.delete_segment_files(&reclaimable)
    }

    /// Segments waiting for their last reader before deletion
    pub fn pending_reclaim(&self) -> Vec<SegmentId> {
        self.state.lock().retired.iter().map(|r| r.id()).collect()
    }

    fn delete_segment_files(&self, readers: &[Arc<SegmentReader>]) -> usize {
        for reader in readers {
            for file in reader.info().files() {
                delete_quietly(self.dir.as_ref(), &file);
            }
            debug!(segment = %reader.id(), "reclaimed segment files");
        }
        readers.len()
    }

    fn publish(&self, previous: &SegmentSet, readers: Vec<Arc<SegmentReader>>) {
        let set = SegmentSet {
            version: previous.version + 1,
            readers,
        };
        debug!(version = set.version, segments = set.len(), "published segment set");
        self.current.store(Arc::new(set));
    }
}

fn is_index_file(name: &str) -> bool {
    name.ends_with(".seg")
        || name.ends_with(".liv")
        || name.ends_with(TEMP_SUFFIX)
        || name == MANIFEST_FILE
}

fn delete_quietly(dir: &dyn Directory, name: &str) {
    if !dir.exists(name) {
        return;
    }
    if let Err(e) = dir.delete(name) {
        warn!(file = %name, error = %e, "failed to delete index file");
    }
}
