//! Postings format with skip data
//!
//! Per term, in the segment's postings region:
//! - one entry per document: `vint(doc delta)`, `vint(freq)`; the first
//!   delta is relative to 0
//! - when positions are indexed, each entry is followed by
//!   `vint(len)` and a sub-block of `vint(position delta)` (plus
//!   `vint(start offset delta)`, `vint(end - start)` with offsets)
//! - after the entries, if the list spans more than one block: skip data,
//!   `vint(count)` then per entry `vint(doc delta)` and a big-endian u32
//!   offset of the following block, relative to the term's first entry
//!
//! A skip entry is written after every `skip_interval` postings and holds
//! the last doc of the finished block, so `advance` can jump over whole
//! blocks without decoding them.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};

use super::live_docs::LiveDocs;
use super::types::{DocId, Occurrence, Posting, TermMeta, NO_MORE_DOCS};
use super::varint::{decode_vint, encode_vint};
use crate::config::IndexConfig;
use crate::error::{LucentError, Result};
use crate::store::SharedBytes;

/// Skip data for fast block skipping during query processing
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SkipEntry {
    /// Last doc of the block this entry closes
    pub doc: u32,
    /// Offset of the next block, relative to the term's first entry
    pub offset: u32,
}

/// Which per-occurrence data a postings stream carries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PostingsFormat {
    pub skip_interval: u32,
    pub positions: bool,
    pub offsets: bool,
}

impl PostingsFormat {
    pub fn from_config(config: &IndexConfig) -> Self {
        Self {
            skip_interval: config.skip_interval,
            positions: config.index_positions,
            offsets: config.index_positions && config.index_offsets,
        }
    }
}

/// Writer for the postings region of one segment
pub struct PostingsWriter {
    format: PostingsFormat,
    max_bytes: u64,
    /// Final output data
    data: Vec<u8>,
    /// Where the current term's entries begin
    term_start: usize,
    last_doc: Option<u32>,
    doc_freq: u32,
    total_term_freq: u64,
    /// Skip entries for the current term
    skip_entries: Vec<SkipEntry>,
    scratch: Vec<u8>,
}

impl PostingsWriter {
    pub fn new(format: PostingsFormat, max_bytes: u64) -> Self {
        Self {
            format,
            max_bytes,
            data: Vec::new(),
            term_start: 0,
            last_doc: None,
            doc_freq: 0,
            total_term_freq: 0,
            skip_entries: Vec::new(),
            scratch: Vec::new(),
        }
    }

    /// Start writing a new posting list
    pub fn start_term(&mut self) {
        self.term_start = self.data.len();
        self.last_doc = None;
        self.doc_freq = 0;
        self.total_term_freq = 0;
        self.skip_entries.clear();
    }

    /// Append a posting; docs must be strictly increasing within a term
    pub fn add_posting(&mut self, posting: &Posting) -> Result<()> {
        let doc = posting.doc.as_u32();
        if doc == NO_MORE_DOCS.as_u32() {
            return Err(LucentError::InvalidArgument(
                "doc id collides with NO_MORE_DOCS".to_string(),
            ));
        }
        let delta = match self.last_doc {
            Some(last) if doc <= last => {
                return Err(LucentError::InvalidArgument(format!(
                    "postings out of order: doc {} after {}",
                    doc, last
                )));
            }
            Some(last) => doc - last,
            None => doc,
        };
        if posting.freq == 0 {
            return Err(LucentError::InvalidArgument(format!(
                "zero frequency for doc {}",
                doc
            )));
        }

        encode_vint(delta, &mut self.data);
        encode_vint(posting.freq, &mut self.data);

        if self.format.positions {
            if posting.occurrences.len() != posting.freq as usize {
                return Err(LucentError::InvalidArgument(format!(
                    "doc {} has freq {} but {} positions",
                    doc,
                    posting.freq,
                    posting.occurrences.len()
                )));
            }
            self.encode_occurrences(doc, &posting.occurrences)?;
            encode_vint(self.scratch.len() as u32, &mut self.data);
            self.data.extend_from_slice(&self.scratch);
        }

        self.last_doc = Some(doc);
        self.doc_freq += 1;
        self.total_term_freq += posting.freq as u64;

        if self.doc_freq % self.format.skip_interval == 0 {
            let offset = self.data.len() - self.term_start;
            self.skip_entries.push(SkipEntry {
                doc,
                offset: offset.min(u32::MAX as usize) as u32,
            });
        }

        self.check_capacity()
    }

    fn encode_occurrences(&mut self, doc: u32, occurrences: &[Occurrence]) -> Result<()> {
        self.scratch.clear();
        let mut last_position = 0u32;
        let mut last_start = 0u32;
        for occ in occurrences {
            if occ.position < last_position {
                return Err(LucentError::InvalidArgument(format!(
                    "positions out of order in doc {}",
                    doc
                )));
            }
            encode_vint(occ.position - last_position, &mut self.scratch);
            last_position = occ.position;

            if self.format.offsets {
                if occ.start_offset < last_start || occ.end_offset < occ.start_offset {
                    return Err(LucentError::InvalidArgument(format!(
                        "offsets out of order in doc {}",
                        doc
                    )));
                }
                encode_vint(occ.start_offset - last_start, &mut self.scratch);
                encode_vint(occ.end_offset - occ.start_offset, &mut self.scratch);
                last_start = occ.start_offset;
            }
        }
        Ok(())
    }

    /// Finish the current posting list and return its metadata
    pub fn finish_term(&mut self) -> Result<TermMeta> {
        if self.doc_freq == 0 {
            return Err(LucentError::InvalidArgument(
                "cannot finish a term without postings".to_string(),
            ));
        }

        // An entry pointing at the end of the list closes the last block
        // and has nothing to skip to.
        let entries_end = self.data.len() - self.term_start;
        self.skip_entries
            .retain(|entry| (entry.offset as usize) < entries_end);

        let skip_offset = if self.skip_entries.is_empty() {
            0
        } else {
            let skip_offset = self.data.len();
            encode_vint(self.skip_entries.len() as u32, &mut self.data);
            let mut last = 0u32;
            for entry in &self.skip_entries {
                encode_vint(entry.doc - last, &mut self.data);
                last = entry.doc;
                let mut buf = [0u8; 4];
                BigEndian::write_u32(&mut buf, entry.offset);
                self.data.extend_from_slice(&buf);
            }
            skip_offset
        };

        self.check_capacity()?;

        Ok(TermMeta {
            postings_offset: self.term_start as u32,
            skip_offset: skip_offset as u32,
            doc_freq: self.doc_freq,
            total_term_freq: self.total_term_freq,
        })
    }

    /// Write a whole posting list
    pub fn write_term(&mut self, postings: &[Posting]) -> Result<TermMeta> {
        self.start_term();
        for posting in postings {
            self.add_posting(posting)?;
        }
        self.finish_term()
    }

    fn check_capacity(&self) -> Result<()> {
        let len = self.data.len() as u64;
        if len > self.max_bytes {
            return Err(LucentError::CapacityExceeded {
                limit: self.max_bytes,
                attempted: len,
            });
        }
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn format(&self) -> PostingsFormat {
        self.format
    }

    /// Take the data (consuming the writer)
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Reader for the postings region of one segment
#[derive(Clone, Debug)]
pub struct PostingsReader {
    data: SharedBytes,
    format: PostingsFormat,
}

impl PostingsReader {
    pub fn new(data: SharedBytes, format: PostingsFormat) -> Self {
        Self { data, format }
    }

    /// Open an iterator over a term's postings
    ///
    /// Docs absent from `live` are never yielded.
    pub fn open(&self, meta: &TermMeta, live: Option<Arc<LiveDocs>>) -> Result<PostingsIterator> {
        let start = meta.postings_offset as usize;
        if start >= self.data.len() || (meta.has_skip_data() && meta.skip_offset as usize >= self.data.len()) {
            return Err(LucentError::corrupt(
                "postings",
                format!("term metadata points beyond postings ({} bytes)", self.data.len()),
            ));
        }
        Ok(PostingsIterator {
            data: self.data.clone(),
            meta: *meta,
            format: self.format,
            live,
            pos: start,
            acc_doc: 0,
            read: 0,
            doc: None,
            freq: 0,
            positions_pos: 0,
            positions_left: 0,
            last_position: 0,
            start_offset: 0,
            end_offset: 0,
            skip_entries: None,
            skip_idx: 0,
        })
    }

    pub fn format(&self) -> PostingsFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Forward-only iterator over one term's postings
pub struct PostingsIterator {
    data: SharedBytes,
    meta: TermMeta,
    format: PostingsFormat,
    live: Option<Arc<LiveDocs>>,
    /// Start of the next undecoded entry
    pos: usize,
    /// Last decoded doc, the base for the next delta
    acc_doc: u32,
    /// Entries decoded (or skipped over) so far
    read: u32,
    /// Current doc; `None` before the first `next_doc`
    doc: Option<DocId>,
    freq: u32,
    positions_pos: usize,
    positions_left: u32,
    last_position: u32,
    start_offset: u32,
    end_offset: u32,
    /// Skip entries, decoded on first `advance`
    skip_entries: Option<Vec<SkipEntry>>,
    skip_idx: usize,
}

impl PostingsIterator {
    /// Current doc, `None` before iteration starts
    pub fn doc(&self) -> Option<DocId> {
        self.doc
    }

    /// Number of docs in the list, deleted ones included
    pub fn doc_freq(&self) -> u32 {
        self.meta.doc_freq
    }

    /// Frequency of the term in the current doc
    pub fn freq(&self) -> u32 {
        self.freq
    }

    /// Move to the next live doc
    pub fn next_doc(&mut self) -> Result<DocId> {
        loop {
            if self.doc == Some(NO_MORE_DOCS) {
                return Ok(NO_MORE_DOCS);
            }
            if self.read >= self.meta.doc_freq {
                self.doc = Some(NO_MORE_DOCS);
                self.freq = 0;
                return Ok(NO_MORE_DOCS);
            }
            let doc = self.decode_entry()?;
            if self.live.as_ref().map_or(true, |live| live.is_live(doc)) {
                return Ok(doc);
            }
        }
    }

    /// Move to the first live doc `>= target`
    ///
    /// # Panics
    ///
    /// If `target` is not beyond the current doc.
    pub fn advance(&mut self, target: DocId) -> Result<DocId> {
        if self.doc == Some(NO_MORE_DOCS) {
            return Ok(NO_MORE_DOCS);
        }
        if let Some(current) = self.doc {
            assert!(
                target > current,
                "advance target {} must be beyond current doc {}",
                target,
                current
            );
        }

        if self.meta.has_skip_data() {
            self.skip_towards(target)?;
        }

        loop {
            let doc = self.next_doc()?;
            if doc >= target {
                return Ok(doc);
            }
        }
    }

    fn skip_towards(&mut self, target: DocId) -> Result<()> {
        if self.skip_entries.is_none() {
            self.skip_entries = Some(self.load_skip_entries()?);
        }
        let entries = match &self.skip_entries {
            Some(entries) => entries,
            None => return Ok(()),
        };

        // Blocks whose last doc is below the target cannot contain it
        let passed = entries[self.skip_idx..].partition_point(|e| e.doc < target.as_u32());
        if passed == 0 {
            return Ok(());
        }
        let idx = self.skip_idx + passed - 1;
        self.skip_idx += passed;

        let consumed = (idx as u32 + 1) * self.format.skip_interval;
        if consumed > self.read {
            let entry = entries[idx];
            self.pos = self.meta.postings_offset as usize + entry.offset as usize;
            self.acc_doc = entry.doc;
            self.read = consumed;
            self.positions_left = 0;
        }
        Ok(())
    }

    fn load_skip_entries(&self) -> Result<Vec<SkipEntry>> {
        let data = &self.data[..];
        let mut pos = self.meta.skip_offset as usize;
        let count = decode_vint(data, &mut pos)? as usize;
        let mut entries = Vec::with_capacity(count);
        let mut doc = 0u32;
        for _ in 0..count {
            doc = doc
                .checked_add(decode_vint(data, &mut pos)?)
                .ok_or_else(|| LucentError::corrupt("postings", "skip doc overflow"))?;
            let bytes = data.get(pos..pos + 4).ok_or(LucentError::Underflow {
                position: pos,
                needed: 4,
                limit: data.len(),
            })?;
            pos += 4;
            entries.push(SkipEntry {
                doc,
                offset: BigEndian::read_u32(bytes),
            });
        }
        Ok(entries)
    }

    fn decode_entry(&mut self) -> Result<DocId> {
        let data = &self.data[..];
        let mut pos = self.pos;
        let delta = decode_vint(data, &mut pos)?;
        let freq = decode_vint(data, &mut pos)?;

        let doc = if self.read == 0 {
            delta
        } else {
            self.acc_doc
                .checked_add(delta)
                .filter(|d| *d != NO_MORE_DOCS.as_u32())
                .ok_or_else(|| LucentError::corrupt("postings", "doc delta overflow"))?
        };

        if self.format.positions {
            let len = decode_vint(data, &mut pos)? as usize;
            if pos + len > data.len() {
                return Err(LucentError::Underflow {
                    position: pos,
                    needed: len,
                    limit: data.len(),
                });
            }
            self.positions_pos = pos;
            self.positions_left = freq;
            pos += len;
        }

        self.pos = pos;
        self.acc_doc = doc;
        self.read += 1;
        self.last_position = 0;
        self.start_offset = 0;
        self.end_offset = 0;
        self.freq = freq;
        self.doc = Some(DocId(doc));
        Ok(DocId(doc))
    }

    /// Next position of the term in the current doc
    ///
    /// May be called at most `freq()` times per doc.
    pub fn next_position(&mut self) -> Result<u32> {
        if !self.format.positions {
            return Err(LucentError::InvalidArgument(
                "positions are not indexed".to_string(),
            ));
        }
        if self.positions_left == 0 {
            return Err(LucentError::InvalidArgument(
                "no more positions for the current doc".to_string(),
            ));
        }

        let data = &self.data[..];
        let mut pos = self.positions_pos;
        self.last_position += decode_vint(data, &mut pos)?;
        if self.format.offsets {
            self.start_offset += decode_vint(data, &mut pos)?;
            self.end_offset = self.start_offset + decode_vint(data, &mut pos)?;
        }
        self.positions_pos = pos;
        self.positions_left -= 1;
        Ok(self.last_position)
    }

    /// Start offset of the last position read (0 without offsets)
    pub fn start_offset(&self) -> u32 {
        self.start_offset
    }

    /// End offset of the last position read (0 without offsets)
    pub fn end_offset(&self) -> u32 {
        self.end_offset
    }

    /// Read all remaining occurrences of the current doc
    pub fn occurrences(&mut self) -> Result<Vec<Occurrence>> {
        let mut out = Vec::with_capacity(self.positions_left as usize);
        while self.format.positions && self.positions_left > 0 {
            let position = self.next_position()?;
            out.push(Occurrence::new(position, self.start_offset, self.end_offset));
        }
        Ok(out)
    }

    /// The current doc as a full posting
    pub fn posting(&mut self) -> Result<Option<Posting>> {
        match self.doc {
            Some(doc) if doc != NO_MORE_DOCS => {
                let freq = self.freq;
                let occurrences = self.occurrences()?;
                Ok(Some(Posting {
                    doc,
                    freq,
                    occurrences,
                }))
            }
            _ => Ok(None),
        }
    }
}

impl Iterator for PostingsIterator {
    type Item = Result<(DocId, u32)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_doc() {
            Ok(doc) if doc == NO_MORE_DOCS => None,
            Ok(doc) => Some(Ok((doc, self.freq))),
            Err(e) => {
                self.doc = Some(NO_MORE_DOCS);
                Some(Err(e))
            }
        }
    }
}
