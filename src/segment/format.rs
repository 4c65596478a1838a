//! Segment file layout and the shared encode path
//!
//! A segment is a single file:
//!
//! ```text
//! [postings][dict blocks][dict index][stored fields][live docs][footer]
//! ```
//!
//! The footer has a fixed size and ends with a CRC32 over every byte
//! before it. `SegmentBuilder` is used by both flush and merge; its output
//! is only published through `Directory::write_atomic`, so a segment file
//! either exists complete with a valid checksum or not at all.

use std::ops::Range;

use tracing::debug;

use super::live_docs::LiveDocs;
use super::postings::{PostingsFormat, PostingsWriter};
use super::reader::SegmentInfo;
use super::stored::{StoredDocument, StoredFieldsWriter};
use super::term_dict::TermDictWriter;
use super::types::{Posting, SegmentId, TermMeta};
use crate::config::{IndexConfig, SyncPolicy};
use crate::error::{LucentError, Result};
use crate::store::{ByteBuffer, Directory, SharedBytes};

pub const SEGMENT_MAGIC: u32 = 0x4C43_4E54;
pub const FORMAT_VERSION: u32 = 1;

const FLAG_POSITIONS: u32 = 1;
const FLAG_OFFSETS: u32 = 1 << 1;
const REGION_COUNT: usize = 5;

/// magic, version, doc_count, flags, skip_interval, five region lengths, crc
pub const FOOTER_LEN: usize = 4 * 5 + 8 * REGION_COUNT + 4;

/// Byte ranges of a segment's regions
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Regions {
    pub postings: Range<usize>,
    pub dict_blocks: Range<usize>,
    pub dict_index: Range<usize>,
    pub stored: Range<usize>,
    pub live_docs: Range<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Footer {
    pub version: u32,
    pub doc_count: u32,
    pub format: PostingsFormat,
    /// Region lengths in file order
    lengths: [u64; REGION_COUNT],
    pub checksum: u32,
}

impl Footer {
    pub fn regions(&self) -> Regions {
        let mut start = 0usize;
        let mut next = |len: u64| {
            let range = start..start + len as usize;
            start = range.end;
            range
        };
        Regions {
            postings: next(self.lengths[0]),
            dict_blocks: next(self.lengths[1]),
            dict_index: next(self.lengths[2]),
            stored: next(self.lengths[3]),
            live_docs: next(self.lengths[4]),
        }
    }

    fn body_len(&self) -> u64 {
        self.lengths.iter().sum()
    }

    /// Verify the checksum and parse the footer of a whole segment file
    pub fn read(file: &SharedBytes, segment: &str) -> Result<Self> {
        if file.len() < FOOTER_LEN {
            return Err(LucentError::corrupt(
                segment,
                format!("file too short for footer ({} bytes)", file.len()),
            ));
        }

        let crc_at = file.len() - 4;
        let checksum = crc32fast::hash(&file[..crc_at]);
        let mut buf = ByteBuffer::from_shared(file.clone());
        let stored = buf.get_i32_at(crc_at)? as u32;
        if stored != checksum {
            return Err(LucentError::corrupt(
                segment,
                format!("checksum mismatch: stored {:08x}, computed {:08x}", stored, checksum),
            ));
        }

        buf.set_position(file.len() - FOOTER_LEN)?;
        if buf.get_u32()? != SEGMENT_MAGIC {
            return Err(LucentError::corrupt(segment, "bad magic"));
        }
        let version = buf.get_u32()?;
        if version != FORMAT_VERSION {
            return Err(LucentError::corrupt(
                segment,
                format!("unsupported format version {}", version),
            ));
        }
        let doc_count = buf.get_u32()?;
        let flags = buf.get_u32()?;
        let skip_interval = buf.get_u32()?;
        if skip_interval < 2 {
            return Err(LucentError::corrupt(segment, "bad skip interval"));
        }
        let mut lengths = [0u64; REGION_COUNT];
        for len in lengths.iter_mut() {
            *len = buf.get_u64()?;
        }

        let footer = Self {
            version,
            doc_count,
            format: PostingsFormat {
                skip_interval,
                positions: flags & FLAG_POSITIONS != 0,
                offsets: flags & FLAG_OFFSETS != 0,
            },
            lengths,
            checksum,
        };
        if footer.body_len() != (file.len() - FOOTER_LEN) as u64 {
            return Err(LucentError::corrupt(segment, "region lengths do not match file size"));
        }
        Ok(footer)
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut flags = 0;
        if self.format.positions {
            flags |= FLAG_POSITIONS;
        }
        if self.format.offsets {
            flags |= FLAG_OFFSETS;
        }

        let mut buf = ByteBuffer::allocate(FOOTER_LEN - 4);
        buf.put_u32(SEGMENT_MAGIC)?;
        buf.put_u32(self.version)?;
        buf.put_u32(self.doc_count)?;
        buf.put_u32(flags)?;
        buf.put_u32(self.format.skip_interval)?;
        for len in &self.lengths {
            buf.put_u64(*len)?;
        }
        buf.flip();
        out.extend_from_slice(&buf.to_vec());

        let crc = crc32fast::hash(out);
        out.extend_from_slice(&crc.to_be_bytes());
        Ok(())
    }
}

/// Encodes one segment from sorted terms and per-doc stored values
pub struct SegmentBuilder {
    id: SegmentId,
    postings: PostingsWriter,
    terms: TermDictWriter,
    stored: StoredFieldsWriter,
    term_open: bool,
}

impl SegmentBuilder {
    pub fn new(id: SegmentId, config: &IndexConfig) -> Self {
        Self::with_format(id, PostingsFormat::from_config(config), config)
    }

    pub fn with_format(id: SegmentId, format: PostingsFormat, config: &IndexConfig) -> Self {
        Self {
            id,
            postings: PostingsWriter::new(format, config.max_postings_bytes),
            terms: TermDictWriter::new(config.terms_per_block),
            stored: StoredFieldsWriter::new(),
            term_open: false,
        }
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn format(&self) -> PostingsFormat {
        self.postings.format()
    }

    /// Append the next doc's stored values; docs are numbered in call order
    pub fn add_document(&mut self, doc: &StoredDocument) -> Result<()> {
        self.stored.add(doc)
    }

    pub fn doc_count(&self) -> u32 {
        self.stored.doc_count()
    }

    pub fn term_count(&self) -> u64 {
        self.terms.term_count()
    }

    pub fn start_term(&mut self) {
        self.postings.start_term();
        self.term_open = true;
    }

    pub fn add_posting(&mut self, posting: &Posting) -> Result<()> {
        if posting.doc.as_u32() >= self.doc_count() {
            return Err(LucentError::InvalidArgument(format!(
                "posting for doc {} but segment has {} docs",
                posting.doc,
                self.doc_count()
            )));
        }
        self.postings.add_posting(posting)
    }

    /// Close the current term; terms must be finished in sorted order
    pub fn finish_term(&mut self, term: &[u8]) -> Result<TermMeta> {
        self.term_open = false;
        let meta = self.postings.finish_term()?;
        self.terms.add(term, &meta)?;
        Ok(meta)
    }

    /// Encode a whole posting list for `term`
    pub fn add_term(&mut self, term: &[u8], postings: &[Posting]) -> Result<TermMeta> {
        self.start_term();
        for posting in postings {
            self.add_posting(posting)?;
        }
        self.finish_term(term)
    }

    /// Produce the complete file image
    pub fn finish(self) -> Result<Vec<u8>> {
        if self.term_open {
            return Err(LucentError::InvalidArgument(
                "segment finished with an open term".to_string(),
            ));
        }
        let doc_count = self.stored.doc_count();
        let format = self.postings.format();

        let mut out = self.postings.into_data();
        let (blocks, index) = self.terms.finish();
        let stored = self.stored.finish()?;
        let live = LiveDocs::new(doc_count).encode()?;

        let lengths = [
            out.len() as u64,
            blocks.len() as u64,
            index.len() as u64,
            stored.len() as u64,
            live.len() as u64,
        ];
        out.reserve(blocks.len() + index.len() + stored.len() + live.len() + FOOTER_LEN);
        out.extend_from_slice(&blocks);
        out.extend_from_slice(&index);
        out.extend_from_slice(&stored);
        out.extend_from_slice(&live);

        Footer {
            version: FORMAT_VERSION,
            doc_count,
            format,
            lengths,
            checksum: 0,
        }
        .write(&mut out)?;
        Ok(out)
    }

    /// Encode and atomically publish the segment file
    pub fn publish(self, dir: &dyn Directory, sync: SyncPolicy) -> Result<SegmentInfo> {
        let id = self.id;
        let doc_count = self.doc_count();
        let bytes = self.finish()?;
        let checksum = crc32fast::hash(&bytes[..bytes.len() - 4]);
        dir.write_atomic(&id.file_name(), &bytes, sync)?;

        debug!(segment = %id, docs = doc_count, bytes = bytes.len(), "published segment");
        Ok(SegmentInfo {
            id,
            doc_count,
            del_count: 0,
            del_gen: 0,
            size_bytes: bytes.len() as u64,
            checksum,
        })
    }
}
