//! Live-document sets
//!
//! Deletions are kept as a `RoaringBitmap` of deleted docs; a doc is live
//! when it is below `max_doc` and not in the bitmap. The same encoding is
//! used for the live-docs region inside a segment file and for the
//! `<segment>_<gen>.liv` files written by a deletion commit:
//!
//! `magic:u32 max_doc:u32 bitmap_len:u32 bitmap crc32:u32` (big-endian)

use roaring::RoaringBitmap;

use super::types::DocId;
use crate::error::{LucentError, Result};
use crate::store::{ByteBuffer, SharedBytes};

const LIVE_DOCS_MAGIC: u32 = 0x4C49_5645;
const HEADER_LEN: usize = 12;
const CHECKSUM_LEN: usize = 4;

/// Set of non-deleted docs of one segment
#[derive(Clone, Debug, PartialEq)]
pub struct LiveDocs {
    max_doc: u32,
    deleted: RoaringBitmap,
}

impl LiveDocs {
    /// All `max_doc` docs live
    pub fn new(max_doc: u32) -> Self {
        Self {
            max_doc,
            deleted: RoaringBitmap::new(),
        }
    }

    pub fn max_doc(&self) -> u32 {
        self.max_doc
    }

    pub fn is_live(&self, doc: DocId) -> bool {
        doc.as_u32() < self.max_doc && !self.deleted.contains(doc.as_u32())
    }

    /// Mark a doc deleted; returns whether it was live before
    pub fn delete(&mut self, doc: DocId) -> bool {
        doc.as_u32() < self.max_doc && self.deleted.insert(doc.as_u32())
    }

    /// Fold another set's deletions into this one
    pub fn delete_all(&mut self, other: &LiveDocs) {
        self.deleted |= &other.deleted;
        self.deleted.remove_range(self.max_doc..);
    }

    pub fn num_deleted(&self) -> u32 {
        self.deleted.len() as u32
    }

    pub fn num_live(&self) -> u32 {
        self.max_doc - self.num_deleted()
    }

    pub fn has_deletions(&self) -> bool {
        !self.deleted.is_empty()
    }

    /// Fraction of docs deleted
    pub fn delete_ratio(&self) -> f64 {
        if self.max_doc == 0 {
            0.0
        } else {
            self.num_deleted() as f64 / self.max_doc as f64
        }
    }

    pub fn deleted(&self) -> &RoaringBitmap {
        &self.deleted
    }

    /// Live docs in increasing order
    pub fn iter_live(&self) -> impl Iterator<Item = DocId> + '_ {
        (0..self.max_doc)
            .filter(move |doc| !self.deleted.contains(*doc))
            .map(DocId)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bitmap = Vec::with_capacity(self.deleted.serialized_size());
        self.deleted.serialize_into(&mut bitmap)?;

        let mut buf = ByteBuffer::allocate(HEADER_LEN + bitmap.len() + CHECKSUM_LEN);
        buf.put_u32(LIVE_DOCS_MAGIC)?;
        buf.put_u32(self.max_doc)?;
        buf.put_u32(bitmap.len() as u32)?;
        buf.put_bytes(&bitmap)?;
        let mut body = buf.duplicate();
        body.flip();
        buf.put_u32(crc32fast::hash(&body.to_vec()))?;
        buf.flip();
        Ok(buf.to_vec())
    }

    /// Decode and verify; `segment` names the owner in errors
    pub fn decode(bytes: SharedBytes, segment: &str) -> Result<Self> {
        if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(LucentError::corrupt(segment, "live docs region too short"));
        }
        let body_len = bytes.len() - CHECKSUM_LEN;
        let mut buf = ByteBuffer::from_shared(bytes.clone());

        let stored_crc = buf.get_i32_at(body_len)? as u32;
        if crc32fast::hash(&bytes[..body_len]) != stored_crc {
            return Err(LucentError::corrupt(segment, "live docs checksum mismatch"));
        }

        if buf.get_u32()? != LIVE_DOCS_MAGIC {
            return Err(LucentError::corrupt(segment, "bad live docs magic"));
        }
        let max_doc = buf.get_u32()?;
        let bitmap_len = buf.get_u32()? as usize;
        if HEADER_LEN + bitmap_len != body_len {
            return Err(LucentError::corrupt(segment, "live docs length mismatch"));
        }

        let deleted = RoaringBitmap::deserialize_from(&bytes[HEADER_LEN..body_len])
            .map_err(|e| LucentError::corrupt(segment, format!("bad deletion bitmap: {}", e)))?;
        if deleted.max().map_or(false, |max| max >= max_doc) {
            return Err(LucentError::corrupt(segment, "deleted doc beyond max_doc"));
        }

        Ok(Self { max_doc, deleted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_and_counts() {
        let mut live = LiveDocs::new(5);
        assert!(!live.has_deletions());
        assert!(live.delete(DocId(2)));
        assert!(!live.delete(DocId(2)));
        assert!(!live.delete(DocId(5)));

        assert!(live.is_live(DocId(1)));
        assert!(!live.is_live(DocId(2)));
        assert!(!live.is_live(DocId(5)));
        assert_eq!(live.num_live(), 4);
        assert_eq!(live.num_deleted(), 1);
        assert!((live.delete_ratio() - 0.2).abs() < 1e-9);
        assert_eq!(
            live.iter_live().collect::<Vec<_>>(),
            vec![DocId(0), DocId(1), DocId(3), DocId(4)]
        );
    }

    #[test]
    fn test_delete_all() {
        let mut a = LiveDocs::new(10);
        a.delete(DocId(1));
        let mut b = LiveDocs::new(10);
        b.delete(DocId(7));
        b.delete(DocId(1));
        a.delete_all(&b);
        assert_eq!(a.num_deleted(), 2);
        assert!(!a.is_live(DocId(7)));
    }

    #[test]
    fn test_encode_decode() {
        let mut live = LiveDocs::new(1000);
        for doc in (0..1000).step_by(7) {
            live.delete(DocId(doc));
        }
        let bytes = live.encode().unwrap();
        let decoded = LiveDocs::decode(SharedBytes::from_vec(bytes), "segment_1").unwrap();
        assert_eq!(decoded, live);
    }

    #[test]
    fn test_decode_detects_corruption() {
        let mut live = LiveDocs::new(64);
        live.delete(DocId(3));
        let mut bytes = live.encode().unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x40;
        let err = LiveDocs::decode(SharedBytes::from_vec(bytes), "segment_1").unwrap_err();
        assert!(err.is_corruption());

        let err = LiveDocs::decode(SharedBytes::from_vec(vec![0; 8]), "segment_1").unwrap_err();
        assert!(err.is_corruption());
    }
}
