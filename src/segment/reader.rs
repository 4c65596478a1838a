//! Immutable segment reader
//!
//! Opening a segment verifies its checksum and loads the sparse term index;
//! postings, dictionary blocks and stored fields stay in the (usually
//! memory-mapped) file. The reader is shared behind an `Arc`; lookups and
//! iterators never take a lock.
//!
//! Deletions go to a per-handle overlay of the live docs, published through
//! an `ArcSwap` so iterators capture a consistent snapshot when opened.
//! Other handles over the same segment do not see the overlay until they
//! are reopened after `commit_deletions`.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::format::Footer;
use super::live_docs::LiveDocs;
use super::postings::{PostingsFormat, PostingsIterator, PostingsReader};
use super::stored::{StoredDocument, StoredFieldsReader};
use super::term_dict::{PrefixIter, TermDictionary, TermsIter};
use super::types::{DocId, SegmentId, Term, TermMeta};
use crate::config::SyncPolicy;
use crate::error::{LucentError, Result};
use crate::store::{Directory, SharedBytes};

/// Metadata for a segment stored in the manifest
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub id: SegmentId,
    /// Number of documents in the segment, deleted ones included
    pub doc_count: u32,
    /// Deletions committed to the current live-docs generation
    pub del_count: u32,
    /// Live-docs generation; 0 means the all-live region inside the segment
    pub del_gen: u64,
    /// Size of the segment file
    pub size_bytes: u64,
    /// CRC32 stored in the segment footer
    pub checksum: u32,
}

impl SegmentInfo {
    pub fn live_count(&self) -> u32 {
        self.doc_count - self.del_count
    }

    pub fn delete_ratio(&self) -> f64 {
        if self.doc_count == 0 {
            0.0
        } else {
            self.del_count as f64 / self.doc_count as f64
        }
    }

    pub fn file_name(&self) -> String {
        self.id.file_name()
    }

    /// Live-docs file of the current generation
    pub fn live_docs_file_name(&self) -> Option<String> {
        (self.del_gen > 0).then(|| self.id.live_docs_file_name(self.del_gen))
    }

    /// Every file this segment needs
    pub fn files(&self) -> Vec<String> {
        let mut files = vec![self.file_name()];
        files.extend(self.live_docs_file_name());
        files
    }
}

/// Immutable parts of an open segment, shared by all handles
struct SegmentCore {
    id: SegmentId,
    footer: Footer,
    terms: TermDictionary,
    postings: PostingsReader,
    stored: StoredFieldsReader,
    /// Keeps the file mapped
    _file: SharedBytes,
}

/// Read handle over one segment
pub struct SegmentReader {
    core: Arc<SegmentCore>,
    info: RwLock<SegmentInfo>,
    live: ArcSwap<LiveDocs>,
    /// Serializes overlay updates
    delete_lock: Mutex<()>,
}

impl fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentReader")
            .field("info", &*self.info.read())
            .field("live", &self.live.load().num_live())
            .finish()
    }
}

fn region(file: &SharedBytes, range: std::ops::Range<usize>, segment: &str) -> Result<SharedBytes> {
    file.slice(range.clone())
        .ok_or_else(|| LucentError::corrupt(segment, format!("region {:?} out of bounds", range)))
}

impl SegmentReader {
    /// Open a published segment and its committed deletions
    pub fn open(dir: &dyn Directory, info: &SegmentInfo) -> Result<Self> {
        let name = info.id.to_string();
        let file = dir.open_input(&info.file_name())?;
        let footer = Footer::read(&file, &name)?;
        if footer.doc_count != info.doc_count {
            return Err(LucentError::corrupt(
                &name,
                format!(
                    "footer has {} docs, manifest expects {}",
                    footer.doc_count, info.doc_count
                ),
            ));
        }
        if footer.checksum != info.checksum {
            return Err(LucentError::corrupt(&name, "checksum differs from manifest"));
        }

        let regions = footer.regions();
        let terms = TermDictionary::open(
            region(&file, regions.dict_blocks, &name)?,
            &region(&file, regions.dict_index, &name)?,
        )
        .map_err(|e| rename_corruption(e, &name))?;
        let postings = PostingsReader::new(region(&file, regions.postings, &name)?, footer.format);
        let stored = StoredFieldsReader::open(region(&file, regions.stored, &name)?, &name)?;
        if stored.doc_count() != footer.doc_count {
            return Err(LucentError::corrupt(&name, "stored field count mismatch"));
        }

        let live = match info.live_docs_file_name() {
            Some(live_file) => LiveDocs::decode(dir.open_input(&live_file)?, &name)?,
            None => LiveDocs::decode(region(&file, regions.live_docs, &name)?, &name)?,
        };
        if live.max_doc() != footer.doc_count || live.num_deleted() != info.del_count {
            return Err(LucentError::corrupt(&name, "live docs disagree with segment info"));
        }

        debug!(
            segment = %info.id,
            docs = footer.doc_count,
            deleted = info.del_count,
            terms = terms.len(),
            mapped = file.is_mapped(),
            "opened segment"
        );

        Ok(Self {
            core: Arc::new(SegmentCore {
                id: info.id,
                footer,
                terms,
                postings,
                stored,
                _file: file,
            }),
            info: RwLock::new(info.clone()),
            live: ArcSwap::from_pointee(live),
            delete_lock: Mutex::new(()),
        })
    }

    /// New handle over the same files with its own copy of the live docs
    pub fn reopen(&self) -> Self {
        self.with_live_docs(self.info(), (*self.live_docs()).clone())
    }

    pub(crate) fn with_live_docs(&self, info: SegmentInfo, live: LiveDocs) -> Self {
        Self {
            core: Arc::clone(&self.core),
            info: RwLock::new(info),
            live: ArcSwap::from_pointee(live),
            delete_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> SegmentId {
        self.core.id
    }

    /// Segment info as of the last commit through this handle
    pub fn info(&self) -> SegmentInfo {
        self.info.read().clone()
    }

    pub fn format(&self) -> PostingsFormat {
        self.core.footer.format
    }

    /// Number of docs, deleted ones included
    pub fn max_doc(&self) -> u32 {
        self.core.footer.doc_count
    }

    /// Number of live docs
    pub fn num_docs(&self) -> u32 {
        self.live.load().num_live()
    }

    pub fn num_deleted(&self) -> u32 {
        self.live.load().num_deleted()
    }

    pub fn term_count(&self) -> u64 {
        self.core.terms.len()
    }

    /// Handles sharing this segment's files, this one included
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.core)
    }

    pub fn term_dictionary(&self) -> &TermDictionary {
        &self.core.terms
    }

    /// Term metadata; `None` when the term is not in the segment
    pub fn lookup_term(&self, term: &[u8]) -> Result<Option<TermMeta>> {
        self.core.terms.seek_exact(term)
    }

    /// Iterate a term's postings, skipping docs deleted as of now
    pub fn open_postings(&self, meta: &TermMeta) -> Result<PostingsIterator> {
        let live = self.live.load_full();
        let live = live.has_deletions().then_some(live);
        self.core.postings.open(meta, live)
    }

    /// Iterate a term's postings against a given live-docs snapshot
    pub fn open_postings_with(
        &self,
        meta: &TermMeta,
        live: Option<Arc<LiveDocs>>,
    ) -> Result<PostingsIterator> {
        self.core.postings.open(meta, live)
    }

    /// Iterate a term's postings including deleted docs
    pub fn open_raw_postings(&self, meta: &TermMeta) -> Result<PostingsIterator> {
        self.core.postings.open(meta, None)
    }

    /// Look up a term and open its postings
    pub fn postings(&self, term: &[u8]) -> Result<Option<PostingsIterator>> {
        match self.lookup_term(term)? {
            Some(meta) => self.open_postings(&meta).map(Some),
            None => Ok(None),
        }
    }

    /// Docs containing the term, deleted ones included
    pub fn doc_freq(&self, term: &[u8]) -> Result<u32> {
        Ok(self.lookup_term(term)?.map_or(0, |m| m.doc_freq))
    }

    pub fn terms(&self) -> TermsIter {
        self.core.terms.terms()
    }

    pub fn seek_ceil(&self, term: &[u8]) -> Result<Option<(Term, TermMeta)>> {
        self.core.terms.seek_ceil(term)
    }

    pub fn prefix(&self, prefix: &[u8]) -> Result<PrefixIter> {
        self.core.terms.prefix(prefix)
    }

    /// Snapshot of the live docs
    pub fn live_docs(&self) -> Arc<LiveDocs> {
        self.live.load_full()
    }

    pub fn is_live(&self, doc: DocId) -> bool {
        self.live.load().is_live(doc)
    }

    /// Stored values of a doc
    pub fn document(&self, doc: DocId) -> Result<StoredDocument> {
        self.core.stored.document(doc)
    }

    /// Delete a doc in this handle's overlay; returns whether it was live
    pub fn mark_deleted(&self, doc: DocId) -> Result<bool> {
        Ok(self.delete_docs(std::iter::once(doc))? == 1)
    }

    /// Delete several docs at once; returns how many were live
    pub fn delete_docs(&self, docs: impl IntoIterator<Item = DocId>) -> Result<u32> {
        let _guard = self.delete_lock.lock();
        let mut next = (*self.live.load_full()).clone();
        let mut deleted = 0;
        for doc in docs {
            if doc.as_u32() >= next.max_doc() {
                return Err(LucentError::InvalidArgument(format!(
                    "doc {} out of range for {} ({} docs)",
                    doc,
                    self.core.id,
                    next.max_doc()
                )));
            }
            if next.delete(doc) {
                deleted += 1;
            }
        }
        if deleted > 0 {
            self.live.store(Arc::new(next));
        }
        Ok(deleted)
    }

    /// Whether the overlay holds deletions not yet committed
    pub fn has_pending_deletions(&self) -> bool {
        self.live.load().num_deleted() != self.info.read().del_count
    }

    /// Persist the overlay as a new live-docs generation
    ///
    /// Only the small `.liv` file is written; the segment file is never
    /// touched. Returns the segment info that references the new
    /// generation (unchanged when there is nothing to commit).
    pub fn commit_deletions(&self, dir: &dyn Directory, sync: SyncPolicy) -> Result<SegmentInfo> {
        let _guard = self.delete_lock.lock();
        let live = self.live.load_full();
        let mut info = self.info();
        if live.num_deleted() == info.del_count {
            return Ok(info);
        }

        info.del_gen += 1;
        info.del_count = live.num_deleted();
        let file = info.id.live_docs_file_name(info.del_gen);
        dir.write_atomic(&file, &live.encode()?, sync)?;

        info!(
            segment = %info.id,
            del_gen = info.del_gen,
            deleted = info.del_count,
            "committed deletions"
        );
        *self.info.write() = info.clone();
        Ok(info)
    }
}

fn rename_corruption(err: LucentError, segment: &str) -> LucentError {
    match err {
        LucentError::CorruptSegment { reason, .. } => LucentError::CorruptSegment {
            segment: segment.to_string(),
            reason,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::WhitespaceAnalyzer;
    use crate::config::IndexConfig;
    use crate::segment::types::NO_MORE_DOCS;
    use crate::segment::writer::{Document, Field, SegmentWriter};
    use crate::store::RamDirectory;

    fn flush(dir: &RamDirectory, texts: &[&str]) -> SegmentInfo {
        let config = IndexConfig {
            sync: SyncPolicy::none(),
            ..IndexConfig::default()
        };
        let mut writer = SegmentWriter::new(config).unwrap();
        let analyzer = WhitespaceAnalyzer::new();
        for (i, text) in texts.iter().enumerate() {
            let doc = Document::with_key(format!("doc-{}", i)).field(Field::text("body", text, &analyzer));
            writer.add_document(&doc).unwrap();
        }
        writer.flush(dir, SegmentId(1)).unwrap()
    }

    fn docs(iter: PostingsIterator) -> Vec<u32> {
        iter.map(|r| r.unwrap().0.as_u32()).collect()
    }

    #[test]
    fn test_lookup_and_postings() {
        let dir = RamDirectory::new();
        let info = flush(&dir, &["a b", "b c"]);
        let reader = SegmentReader::open(&dir, &info).unwrap();

        assert_eq!(reader.max_doc(), 2);
        assert_eq!(reader.term_count(), 3);
        let meta = reader.lookup_term(b"b").unwrap().unwrap();
        assert_eq!(meta.doc_freq, 2);
        assert_eq!(docs(reader.open_postings(&meta).unwrap()), vec![0, 1]);
        assert!(reader.lookup_term(b"z").unwrap().is_none());
        assert_eq!(reader.doc_freq(b"z").unwrap(), 0);

        let doc = reader.document(DocId(1)).unwrap();
        assert_eq!(doc.key.as_deref(), Some("doc-1"));
        assert_eq!(doc.get("body"), Some("b c"));
    }

    #[test]
    fn test_mark_deleted_hides_doc_from_new_iterators() {
        let dir = RamDirectory::new();
        let info = flush(&dir, &["x", "x", "x"]);
        let reader = SegmentReader::open(&dir, &info).unwrap();

        let before = reader.postings(b"x").unwrap().unwrap();
        assert!(reader.mark_deleted(DocId(1)).unwrap());
        assert!(!reader.mark_deleted(DocId(1)).unwrap());
        assert!(reader.mark_deleted(DocId(3)).is_err());

        // Opened before the mark: sees its own snapshot
        assert_eq!(docs(before), vec![0, 1, 2]);
        assert_eq!(docs(reader.postings(b"x").unwrap().unwrap()), vec![0, 2]);
        assert_eq!(reader.num_docs(), 2);
        assert!(reader.has_pending_deletions());

        // Another handle does not see the uncommitted overlay
        let other = SegmentReader::open(&dir, &info).unwrap();
        assert_eq!(docs(other.postings(b"x").unwrap().unwrap()), vec![0, 1, 2]);
    }

    #[test]
    fn test_commit_deletions_writes_new_generation() {
        let dir = RamDirectory::new();
        let info = flush(&dir, &["x", "x", "x", "x"]);
        let reader = SegmentReader::open(&dir, &info).unwrap();
        let seg_bytes = dir.open_input("segment_1.seg").unwrap().to_vec();

        reader.delete_docs([DocId(0), DocId(3)]).unwrap();
        let committed = reader.commit_deletions(&dir, SyncPolicy::none()).unwrap();
        assert_eq!(committed.del_gen, 1);
        assert_eq!(committed.del_count, 2);
        assert!(dir.exists("segment_1_1.liv"));
        assert_eq!(dir.open_input("segment_1.seg").unwrap().to_vec(), seg_bytes);
        assert!(!reader.has_pending_deletions());

        let reopened = SegmentReader::open(&dir, &committed).unwrap();
        assert_eq!(docs(reopened.postings(b"x").unwrap().unwrap()), vec![1, 2]);

        // Nothing new: same generation
        assert_eq!(reader.commit_deletions(&dir, SyncPolicy::none()).unwrap(), committed);
    }

    #[test]
    fn test_corrupt_segment_rejected() {
        let dir = RamDirectory::new();
        let info = flush(&dir, &["a b c", "d e f"]);
        let mut bytes = dir.open_input("segment_1.seg").unwrap().to_vec();
        bytes[3] ^= 0xFF;
        dir.write_atomic("segment_1.seg", &bytes, SyncPolicy::none()).unwrap();

        let err = SegmentReader::open(&dir, &info).unwrap_err();
        assert!(matches!(err, LucentError::CorruptSegment { ref segment, .. } if segment == "segment_1"));
    }

    #[test]
    fn test_advance_through_reader() {
        let dir = RamDirectory::new();
        let texts: Vec<String> = (0..500)
            .map(|i| if i % 3 == 0 { "hit miss".to_string() } else { "miss".to_string() })
            .collect();
        let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        let info = flush(&dir, &refs);
        let reader = SegmentReader::open(&dir, &info).unwrap();

        let mut iter = reader.postings(b"hit").unwrap().unwrap();
        assert_eq!(iter.advance(DocId(250)).unwrap(), DocId(252));
        assert_eq!(iter.next_position().unwrap(), 0);
        assert_eq!(iter.advance(DocId(499)).unwrap(), NO_MORE_DOCS);
    }

    #[test]
    fn test_reopen_shares_files() {
        let dir = RamDirectory::new();
        let info = flush(&dir, &["a"]);
        let reader = SegmentReader::open(&dir, &info).unwrap();
        reader.mark_deleted(DocId(0)).unwrap();
        let second = reader.reopen();
        assert_eq!(reader.handle_count(), 2);
        assert_eq!(second.num_docs(), 0);
        drop(second);
        assert_eq!(reader.handle_count(), 1);
    }
}
