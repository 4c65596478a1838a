//! Stored fields
//!
//! Each document's stored values are serialized with bincode and
//! concatenated; a table of `doc_count + 1` big-endian u64 offsets and the
//! doc count follow, so any doc is found with two absolute reads.

use serde::{Deserialize, Serialize};

use super::types::DocId;
use crate::error::{LucentError, Result};
use crate::store::{ByteBuffer, SharedBytes};

/// A stored field value
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredField {
    pub name: String,
    pub value: String,
}

/// Stored part of a document: its external key and stored values
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDocument {
    /// External unique key, stable across merges
    pub key: Option<String>,
    pub fields: Vec<StoredField>,
}

impl StoredDocument {
    /// Value of the first stored field named `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}

#[derive(Default)]
pub struct StoredFieldsWriter {
    data: Vec<u8>,
    offsets: Vec<u64>,
}

impl StoredFieldsWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, doc: &StoredDocument) -> Result<()> {
        self.offsets.push(self.data.len() as u64);
        bincode::serialize_into(&mut self.data, doc)?;
        Ok(())
    }

    pub fn doc_count(&self) -> u32 {
        self.offsets.len() as u32
    }

    pub fn finish(mut self) -> Result<Vec<u8>> {
        let doc_count = self.doc_count();
        self.offsets.push(self.data.len() as u64);
        let table_len = self.offsets.len() * 8 + 4;

        let mut table = ByteBuffer::allocate(table_len);
        for offset in &self.offsets {
            table.put_u64(*offset)?;
        }
        table.put_u32(doc_count)?;
        table.flip();

        let mut out = self.data;
        out.extend_from_slice(&table.to_vec());
        Ok(out)
    }
}

#[derive(Clone, Debug)]
pub struct StoredFieldsReader {
    buf: ByteBuffer,
    doc_count: u32,
    /// Start of the offsets table
    table: usize,
    segment: String,
}

impl StoredFieldsReader {
    pub fn open(bytes: SharedBytes, segment: &str) -> Result<Self> {
        let len = bytes.len();
        if len < 12 {
            return Err(LucentError::corrupt(segment, "stored fields region too short"));
        }
        let buf = ByteBuffer::from_shared(bytes);
        let doc_count = buf.get_i32_at(len - 4)? as u32;
        let table_len = (doc_count as usize + 1) * 8 + 4;
        if table_len > len {
            return Err(LucentError::corrupt(segment, "stored fields table out of range"));
        }
        let table = len - table_len;
        let data_end = buf.get_i64_at(table + doc_count as usize * 8)? as u64;
        if data_end != table as u64 {
            return Err(LucentError::corrupt(segment, "stored fields length mismatch"));
        }

        Ok(Self {
            buf,
            doc_count,
            table,
            segment: segment.to_string(),
        })
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    pub fn document(&self, doc: DocId) -> Result<StoredDocument> {
        if doc.as_u32() >= self.doc_count {
            return Err(LucentError::InvalidArgument(format!(
                "doc {} out of range for {} ({} docs)",
                doc, self.segment, self.doc_count
            )));
        }
        let entry = self.table + doc.as_usize() * 8;
        let start = self.buf.get_i64_at(entry)? as u64 as usize;
        let end = self.buf.get_i64_at(entry + 8)? as u64 as usize;
        if start > end || end > self.table {
            return Err(LucentError::corrupt(
                &self.segment,
                format!("bad stored offsets for doc {}", doc),
            ));
        }

        let view = self.buf.slice_at(start, end - start)?;
        let bytes = view.shared_remaining().unwrap_or_else(|| SharedBytes::from_vec(view.to_vec()));
        bincode::deserialize(&bytes)
            .map_err(|e| LucentError::corrupt(&self.segment, format!("stored doc {}: {}", doc, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(key: &str, title: &str) -> StoredDocument {
        StoredDocument {
            key: Some(key.to_string()),
            fields: vec![StoredField {
                name: "title".to_string(),
                value: title.to_string(),
            }],
        }
    }

    #[test]
    fn test_stored_fields_round_trip() {
        let docs = vec![doc("a", "first"), StoredDocument::default(), doc("c", "third")];
        let mut writer = StoredFieldsWriter::new();
        for d in &docs {
            writer.add(d).unwrap();
        }
        let bytes = writer.finish().unwrap();

        let reader = StoredFieldsReader::open(SharedBytes::from_vec(bytes), "segment_0").unwrap();
        assert_eq!(reader.doc_count(), 3);
        for (i, d) in docs.iter().enumerate() {
            assert_eq!(&reader.document(DocId(i as u32)).unwrap(), d);
        }
        assert_eq!(reader.document(DocId(2)).unwrap().get("title"), Some("third"));
        assert!(reader.document(DocId(3)).is_err());
    }

    #[test]
    fn test_empty_stored_fields() {
        let bytes = StoredFieldsWriter::new().finish().unwrap();
        let reader = StoredFieldsReader::open(SharedBytes::from_vec(bytes), "segment_0").unwrap();
        assert_eq!(reader.doc_count(), 0);
    }

    #[test]
    fn test_truncated_region_is_corrupt() {
        let mut writer = StoredFieldsWriter::new();
        writer.add(&doc("a", "x")).unwrap();
        let mut bytes = writer.finish().unwrap();
        bytes.remove(0);
        let err = StoredFieldsReader::open(SharedBytes::from_vec(bytes), "segment_0").unwrap_err();
        assert!(err.is_corruption());
    }
}
