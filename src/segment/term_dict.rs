//! Block-structured term dictionary
//!
//! Terms are written in sorted order into blocks of `terms_per_block`
//! entries. Within a block each term is front-coded against its
//! predecessor (shared prefix length + suffix), so the first term of a
//! block is always stored in full. A sparse index (first term and byte
//! offset of every block) is loaded into memory at open time; a lookup
//! binary-searches the index and then scans a single block.
//!
//! Block entry:
//! `vint(prefix) vint(suffix_len) suffix vint(postings delta)
//!  vint(skip delta) vint(doc_freq) vlong(total_term_freq)`
//!
//! Postings offsets are delta-coded against the previous entry in the
//! block; the skip offset is stored relative to the term's postings offset,
//! 0 meaning no skip data.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};

use super::types::{Term, TermMeta};
use super::varint::{decode_vint, decode_vlong, encode_vint, encode_vlong};
use crate::error::{LucentError, Result};
use crate::store::SharedBytes;

fn corrupt(reason: impl Into<String>) -> LucentError {
    LucentError::corrupt("term dictionary", reason)
}

/// In-memory index entry for one block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockIndexEntry {
    pub first_term: Term,
    pub offset: u32,
}

/// Builds the block and index regions from terms added in sorted order
pub struct TermDictWriter {
    terms_per_block: usize,
    blocks: Vec<u8>,
    index: Vec<BlockIndexEntry>,
    /// Entries of the block being filled
    block: Vec<u8>,
    block_terms: usize,
    last_term: Vec<u8>,
    last_postings_offset: u32,
    term_count: u64,
}

impl TermDictWriter {
    pub fn new(terms_per_block: usize) -> Self {
        Self {
            terms_per_block: terms_per_block.max(1),
            blocks: Vec::new(),
            index: Vec::new(),
            block: Vec::new(),
            block_terms: 0,
            last_term: Vec::new(),
            last_postings_offset: 0,
            term_count: 0,
        }
    }

    /// Add a term; terms must arrive in strictly increasing order
    pub fn add(&mut self, term: &[u8], meta: &TermMeta) -> Result<()> {
        if self.term_count > 0 && term <= self.last_term.as_slice() {
            return Err(LucentError::InvalidArgument(format!(
                "terms out of order: {:?} after {:?}",
                String::from_utf8_lossy(term),
                String::from_utf8_lossy(&self.last_term)
            )));
        }

        let first_in_block = self.block_terms == 0;
        if first_in_block {
            let offset = u32::try_from(self.blocks.len()).map_err(|_| {
                LucentError::CapacityExceeded {
                    limit: u32::MAX as u64,
                    attempted: self.blocks.len() as u64,
                }
            })?;
            self.index.push(BlockIndexEntry {
                first_term: Term::from(term),
                offset,
            });
        }

        let prefix = if first_in_block {
            0
        } else {
            shared_prefix_len(&self.last_term, term)
        };
        encode_vint(prefix as u32, &mut self.block);
        encode_vint((term.len() - prefix) as u32, &mut self.block);
        self.block.extend_from_slice(&term[prefix..]);

        let postings_delta = if first_in_block {
            meta.postings_offset
        } else {
            meta.postings_offset
                .checked_sub(self.last_postings_offset)
                .ok_or_else(|| {
                    LucentError::InvalidArgument("postings offsets must not decrease".to_string())
                })?
        };
        encode_vint(postings_delta, &mut self.block);
        let skip_delta = if meta.has_skip_data() {
            meta.skip_offset.saturating_sub(meta.postings_offset)
        } else {
            0
        };
        encode_vint(skip_delta, &mut self.block);
        encode_vint(meta.doc_freq, &mut self.block);
        encode_vlong(meta.total_term_freq, &mut self.block);

        self.last_term.clear();
        self.last_term.extend_from_slice(term);
        self.last_postings_offset = meta.postings_offset;
        self.term_count += 1;
        self.block_terms += 1;

        if self.block_terms == self.terms_per_block {
            self.finish_block();
        }
        Ok(())
    }

    fn finish_block(&mut self) {
        if self.block_terms == 0 {
            return;
        }
        encode_vint(self.block_terms as u32, &mut self.blocks);
        self.blocks.append(&mut self.block);
        self.block_terms = 0;
    }

    pub fn term_count(&self) -> u64 {
        self.term_count
    }

    /// Returns the block region and the index region
    pub fn finish(mut self) -> (Vec<u8>, Vec<u8>) {
        self.finish_block();

        let mut index = Vec::new();
        encode_vlong(self.term_count, &mut index);
        encode_vint(self.index.len() as u32, &mut index);
        for entry in &self.index {
            encode_vint(entry.first_term.len() as u32, &mut index);
            index.extend_from_slice(entry.first_term.as_bytes());
            let mut buf = [0u8; 4];
            BigEndian::write_u32(&mut buf, entry.offset);
            index.extend_from_slice(&buf);
        }
        (self.blocks, index)
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Read side of the dictionary; cheap to clone
#[derive(Clone, Debug)]
pub struct TermDictionary {
    blocks: SharedBytes,
    index: Arc<Vec<BlockIndexEntry>>,
    term_count: u64,
}

impl TermDictionary {
    /// Open from the block region and the raw index region
    pub fn open(blocks: SharedBytes, index_bytes: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let term_count = decode_vlong(index_bytes, &mut pos)?;
        let block_count = decode_vint(index_bytes, &mut pos)? as usize;

        let mut index: Vec<BlockIndexEntry> = Vec::with_capacity(block_count.min(index_bytes.len()));
        for _ in 0..block_count {
            let len = decode_vint(index_bytes, &mut pos)? as usize;
            let term = index_bytes
                .get(pos..pos + len)
                .ok_or_else(|| corrupt("truncated block index"))?;
            pos += len;
            let offset = index_bytes
                .get(pos..pos + 4)
                .map(BigEndian::read_u32)
                .ok_or_else(|| corrupt("truncated block index"))?;
            pos += 4;

            if offset as usize >= blocks.len() {
                return Err(corrupt(format!("block offset {} out of range", offset)));
            }
            if let Some(prev) = index.last() {
                if prev.first_term.as_bytes() >= term || prev.offset >= offset {
                    return Err(corrupt("block index out of order"));
                }
            }
            index.push(BlockIndexEntry {
                first_term: Term::from(term),
                offset,
            });
        }
        if pos != index_bytes.len() {
            return Err(corrupt("trailing bytes after block index"));
        }

        Ok(Self {
            blocks,
            index: Arc::new(index),
            term_count,
        })
    }

    /// Number of terms
    pub fn len(&self) -> u64 {
        self.term_count
    }

    pub fn is_empty(&self) -> bool {
        self.term_count == 0
    }

    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Block that would contain `term`, if any block starts at or before it
    fn block_for(&self, term: &[u8]) -> Option<usize> {
        let n = self
            .index
            .partition_point(|entry| entry.first_term.as_bytes() <= term);
        n.checked_sub(1)
    }

    /// Exact lookup; `None` is a normal miss
    pub fn seek_exact(&self, term: &[u8]) -> Result<Option<TermMeta>> {
        let block = match self.block_for(term) {
            Some(block) => block,
            None => return Ok(None),
        };
        let mut iter = self.terms_from_block(block);
        while let Some(entry) = iter.next_entry()? {
            match entry.0.as_bytes().cmp(term) {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Equal => return Ok(Some(entry.1)),
                std::cmp::Ordering::Greater => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Smallest term `>= term`, `None` past the last term
    pub fn seek_ceil(&self, term: &[u8]) -> Result<Option<(Term, TermMeta)>> {
        let mut iter = self.terms_from_block(self.block_for(term).unwrap_or(0));
        while let Some(entry) = iter.next_entry()? {
            if entry.0.as_bytes() >= term {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// All terms in order
    pub fn terms(&self) -> TermsIter {
        self.terms_from_block(0)
    }

    /// Terms `>= from` in order
    pub fn terms_from(&self, from: &[u8]) -> Result<TermsIter> {
        let mut iter = self.terms_from_block(self.block_for(from).unwrap_or(0));
        iter.skip_below(from)?;
        Ok(iter)
    }

    /// Terms starting with `prefix`, in order
    pub fn prefix(&self, prefix: &[u8]) -> Result<PrefixIter> {
        Ok(PrefixIter {
            inner: self.terms_from(prefix)?,
            prefix: prefix.to_vec(),
        })
    }

    fn terms_from_block(&self, block: usize) -> TermsIter {
        TermsIter {
            blocks: self.blocks.clone(),
            index: Arc::clone(&self.index),
            block,
            pos: 0,
            left_in_block: 0,
            current: Vec::new(),
            last_postings_offset: 0,
            pending: None,
            done: block >= self.index.len(),
        }
    }
}

/// Lazy ordered sequence of `(term, meta)`
///
/// Restart by asking the dictionary for a new iterator.
pub struct TermsIter {
    blocks: SharedBytes,
    index: Arc<Vec<BlockIndexEntry>>,
    block: usize,
    pos: usize,
    left_in_block: u32,
    current: Vec<u8>,
    last_postings_offset: u32,
    /// Entry read ahead by `skip_below`
    pending: Option<(Term, TermMeta)>,
    done: bool,
}

impl TermsIter {
    fn enter_block(&mut self) -> Result<bool> {
        if self.left_in_block > 0 {
            return Ok(true);
        }
        if self.block >= self.index.len() {
            return Ok(false);
        }
        let mut pos = self.index[self.block].offset as usize;
        self.left_in_block = decode_vint(&self.blocks, &mut pos)?;
        if self.left_in_block == 0 {
            return Err(corrupt(format!("empty block {}", self.block)));
        }
        self.pos = pos;
        self.block += 1;
        self.current.clear();
        self.last_postings_offset = 0;
        Ok(true)
    }

    /// Next entry, surfacing decode errors
    pub fn next_entry(&mut self) -> Result<Option<(Term, TermMeta)>> {
        if let Some(entry) = self.pending.take() {
            return Ok(Some(entry));
        }
        if self.done {
            return Ok(None);
        }
        let first_in_block = self.left_in_block == 0;
        if !self.enter_block()? {
            self.done = true;
            return Ok(None);
        }

        let data = &self.blocks[..];
        let mut pos = self.pos;
        let prefix = decode_vint(data, &mut pos)? as usize;
        let suffix_len = decode_vint(data, &mut pos)? as usize;
        if prefix > self.current.len() || (first_in_block && prefix != 0) {
            return Err(corrupt(format!("bad shared prefix {}", prefix)));
        }
        let suffix = data
            .get(pos..pos + suffix_len)
            .ok_or_else(|| corrupt("truncated term suffix"))?;
        pos += suffix_len;

        if !first_in_block {
            let increasing = match (self.current.get(prefix), suffix.first()) {
                (Some(old), Some(new)) => new > old,
                (None, Some(_)) => true,
                _ => false,
            };
            if !increasing {
                return Err(corrupt("terms out of order within block"));
            }
        }
        self.current.truncate(prefix);
        self.current.extend_from_slice(suffix);

        let delta = decode_vint(data, &mut pos)?;
        let postings_offset = if first_in_block {
            delta
        } else {
            self.last_postings_offset
                .checked_add(delta)
                .ok_or_else(|| corrupt("postings offset overflow"))?
        };
        let skip_delta = decode_vint(data, &mut pos)?;
        let skip_offset = if skip_delta == 0 {
            0
        } else {
            postings_offset
                .checked_add(skip_delta)
                .ok_or_else(|| corrupt("skip offset overflow"))?
        };
        let doc_freq = decode_vint(data, &mut pos)?;
        let total_term_freq = decode_vlong(data, &mut pos)?;

        self.pos = pos;
        self.left_in_block -= 1;
        self.last_postings_offset = postings_offset;

        Ok(Some((
            Term::new(self.current.clone()),
            TermMeta {
                postings_offset,
                skip_offset,
                doc_freq,
                total_term_freq,
            },
        )))
    }

    fn skip_below(&mut self, from: &[u8]) -> Result<()> {
        while let Some(entry) = self.next_entry()? {
            if entry.0.as_bytes() >= from {
                self.pending = Some(entry);
                break;
            }
        }
        Ok(())
    }
}

impl Iterator for TermsIter {
    type Item = Result<(Term, TermMeta)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(entry) => entry.map(Ok),
            Err(e) => {
                self.done = true;
                self.pending = None;
                Some(Err(e))
            }
        }
    }
}

/// Terms sharing a prefix
pub struct PrefixIter {
    inner: TermsIter,
    prefix: Vec<u8>,
}

impl Iterator for PrefixIter {
    type Item = Result<(Term, TermMeta)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok((term, meta)) if term.starts_with(&self.prefix) => Some(Ok((term, meta))),
            Ok(_) => {
                self.inner.done = true;
                None
            }
            Err(e) => Some(Err(e)),
        }
    }
}
