//! End-to-end segment scenarios: write, read, delete, merge, reopen

use std::collections::BTreeMap;
use std::sync::Arc;

use lucent::segment::{LiveDocs, PostingsIterator, SegmentBuilder, StoredDocument};
use lucent::testing::{check_segment, check_segments};
use lucent::{
    Directory, DocId, Document, Field, FsDirectory, Index, IndexConfig, RamDirectory, SegmentId,
    SegmentInfo, SegmentMerger, SegmentReader, SegmentWriter, SyncPolicy, WhitespaceAnalyzer,
    NO_MORE_DOCS,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

fn test_config() -> IndexConfig {
    IndexConfig {
        sync: SyncPolicy::none(),
        skip_interval: 8,
        terms_per_block: 8,
        ..IndexConfig::default()
    }
}

fn text_doc(key: &str, text: &str) -> Document {
    Document::with_key(key).field(Field::text("body", text, &WhitespaceAnalyzer::new()))
}

fn write_segment(dir: &RamDirectory, id: u64, texts: &[&str]) -> SegmentInfo {
    let mut writer = SegmentWriter::new(test_config()).unwrap();
    for (i, text) in texts.iter().enumerate() {
        writer
            .add_document(&text_doc(&format!("{}-{}", id, i), text))
            .unwrap();
    }
    writer.flush(dir, SegmentId(id)).unwrap()
}

fn collect(iter: PostingsIterator) -> Vec<u32> {
    iter.map(|r| r.unwrap().0.as_u32()).collect()
}

#[test]
fn test_two_doc_scenario() {
    let dir = RamDirectory::new();
    let info = write_segment(&dir, 0, &["a b", "b c"]);
    let reader = SegmentReader::open(&dir, &info).unwrap();

    let meta = reader.lookup_term(b"b").unwrap().unwrap();
    assert_eq!(meta.doc_freq, 2);
    assert_eq!(collect(reader.open_postings(&meta).unwrap()), vec![0, 1]);

    let terms: Vec<String> = reader.terms().map(|r| r.unwrap().0.to_string()).collect();
    assert_eq!(terms, vec!["a", "b", "c"]);
    assert!(reader.lookup_term(b"missing").unwrap().is_none());
    assert!(check_segment(&reader).is_empty());
}

#[test]
fn test_merge_renumbers_live_docs() {
    let dir = RamDirectory::new();
    let first = write_segment(&dir, 0, &["x d0", "x d1", "x d2", "x d3", "x d4"]);
    let second = write_segment(&dir, 1, &["x e0"]);

    let a = SegmentReader::open(&dir, &first).unwrap();
    let b = SegmentReader::open(&dir, &second).unwrap();
    assert!(a.mark_deleted(DocId(2)).unwrap());

    let result = SegmentMerger::new(test_config())
        .merge(&[&a, &b], &dir, SegmentId(2))
        .unwrap();
    assert_eq!(result.info.doc_count, 5);

    let merged = SegmentReader::open(&dir, &result.info).unwrap();
    assert_eq!(merged.num_docs(), 5);
    assert_eq!(collect(merged.postings(b"x").unwrap().unwrap()), vec![0, 1, 2, 3, 4]);
    assert!(merged.lookup_term(b"d2").unwrap().is_none());
    assert_eq!(collect(merged.postings(b"d3").unwrap().unwrap()), vec![2]);
    assert_eq!(collect(merged.postings(b"e0").unwrap().unwrap()), vec![4]);
    assert_eq!(merged.document(DocId(4)).unwrap().key.as_deref(), Some("1-0"));

    assert_eq!(result.doc_maps[0].get(DocId(2)), None);
    assert_eq!(result.doc_maps[0].get(DocId(3)), Some(DocId(2)));
    assert_eq!(result.doc_maps[1].get(DocId(0)), Some(DocId(4)));
    assert!(check_segment(&merged).is_empty());
}

#[test]
fn test_merge_preserves_union_of_live_postings() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let dir = RamDirectory::new();
    let vocab: Vec<String> = (0..40).map(|i| format!("w{:02}", i)).collect();

    let mut readers = Vec::new();
    let mut expected: BTreeMap<String, Vec<(usize, u32, u32)>> = BTreeMap::new();
    for seg in 0..4u64 {
        let mut texts = Vec::new();
        for _ in 0..rng.gen_range(20..80) {
            let words: Vec<&str> = (0..rng.gen_range(1..12))
                .map(|_| vocab[rng.gen_range(0..vocab.len())].as_str())
                .collect();
            texts.push(words.join(" "));
        }
        let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        let info = write_segment(&dir, seg, &refs);
        let reader = SegmentReader::open(&dir, &info).unwrap();
        for doc in 0..info.doc_count {
            if rng.gen_bool(0.2) {
                reader.mark_deleted(DocId(doc)).unwrap();
            }
        }

        for word in &vocab {
            if let Some(iter) = reader.postings(word.as_bytes()).unwrap() {
                for entry in iter {
                    let (doc, freq) = entry.unwrap();
                    expected
                        .entry(word.clone())
                        .or_default()
                        .push((seg as usize, doc.as_u32(), freq));
                }
            }
        }
        readers.push(reader);
    }

    let refs: Vec<&SegmentReader> = readers.iter().collect();
    let result = SegmentMerger::new(test_config())
        .merge(&refs, &dir, SegmentId(10))
        .unwrap();
    let merged = SegmentReader::open(&dir, &result.info).unwrap();

    let expected_live: u32 = readers.iter().map(|r| r.num_docs()).sum();
    assert_eq!(merged.max_doc(), expected_live);

    for word in &vocab {
        let want: Vec<(u32, u32)> = expected
            .get(word)
            .map(|list| {
                list.iter()
                    .map(|&(seg, doc, freq)| {
                        (result.doc_maps[seg].get(DocId(doc)).unwrap().as_u32(), freq)
                    })
                    .collect()
            })
            .unwrap_or_default();
        let got: Vec<(u32, u32)> = match merged.postings(word.as_bytes()).unwrap() {
            Some(iter) => iter.map(|r| {
                let (doc, freq) = r.unwrap();
                (doc.as_u32(), freq)
            })
            .collect(),
            None => Vec::new(),
        };
        assert_eq!(got, want, "postings of {}", word);
    }
    assert!(check_segment(&merged).is_empty());
}

#[test]
fn test_positions_and_offsets_round_trip() {
    let dir = RamDirectory::new();
    let info = write_segment(&dir, 0, &["the quick fox jumps over the lazy dog"]);
    let reader = SegmentReader::open(&dir, &info).unwrap();

    let mut iter = reader.postings(b"the").unwrap().unwrap();
    assert_eq!(iter.next_doc().unwrap(), DocId(0));
    assert_eq!(iter.freq(), 2);
    assert_eq!(iter.next_position().unwrap(), 0);
    assert_eq!((iter.start_offset(), iter.end_offset()), (0, 3));
    assert_eq!(iter.next_position().unwrap(), 5);
    assert_eq!((iter.start_offset(), iter.end_offset()), (25, 28));
    assert!(iter.next_position().is_err());

    let meta = reader.lookup_term(b"the").unwrap().unwrap();
    assert_eq!(meta.total_term_freq, 2);
}

#[test]
fn test_prefix_iteration() {
    let dir = RamDirectory::new();
    let info = write_segment(&dir, 0, &["app apple apply banana", "application band"]);
    let reader = SegmentReader::open(&dir, &info).unwrap();

    let terms: Vec<String> = reader
        .prefix(b"appl")
        .unwrap()
        .map(|r| r.unwrap().0.to_string())
        .collect();
    assert_eq!(terms, vec!["apple", "application", "apply"]);
    assert_eq!(reader.prefix(b"zz").unwrap().count(), 0);

    let (term, _) = reader.seek_ceil(b"b").unwrap().unwrap();
    assert_eq!(term.to_string(), "banana");
    assert!(reader.seek_ceil(b"c").unwrap().is_none());
}

#[test]
fn test_deleted_doc_invisible_after_mark() {
    let dir = RamDirectory::new();
    let info = write_segment(&dir, 0, &["t", "t", "t", "t"]);
    let reader = SegmentReader::open(&dir, &info).unwrap();

    reader.mark_deleted(DocId(1)).unwrap();
    let mut iter = reader.postings(b"t").unwrap().unwrap();
    assert_eq!(iter.advance(DocId(1)).unwrap(), DocId(2));
    assert_eq!(collect(reader.postings(b"t").unwrap().unwrap()), vec![0, 2, 3]);
    assert!(!reader.is_live(DocId(1)));
    assert_eq!(reader.live_docs().iter_live().count(), 3);
}

#[test]
fn test_empty_segment_is_valid() {
    let dir = RamDirectory::new();
    let builder = SegmentBuilder::new(SegmentId(3), &test_config());
    let info = builder.publish(&dir, SyncPolicy::none()).unwrap();
    let reader = SegmentReader::open(&dir, &info).unwrap();
    assert_eq!(reader.max_doc(), 0);
    assert_eq!(reader.terms().count(), 0);
    assert!(reader.lookup_term(b"a").unwrap().is_none());
}

#[test]
fn test_builder_with_stored_only_docs() {
    let dir = RamDirectory::new();
    let mut builder = SegmentBuilder::new(SegmentId(0), &test_config());
    builder
        .add_document(&StoredDocument {
            key: Some("only".to_string()),
            fields: Vec::new(),
        })
        .unwrap();
    let info = builder.publish(&dir, SyncPolicy::none()).unwrap();
    let reader = SegmentReader::open(&dir, &info).unwrap();
    assert_eq!(reader.document(DocId(0)).unwrap().key.as_deref(), Some("only"));
    assert_eq!(reader.live_docs().as_ref(), &LiveDocs::new(1));
}

#[test]
fn test_fs_index_round_trip() {
    let tmp = TempDir::new().unwrap();
    let config = IndexConfig {
        max_buffered_docs: 50,
        ..test_config()
    };
    {
        let dir = Arc::new(FsDirectory::open(tmp.path()).unwrap());
        let index = Index::open(dir, config.clone()).unwrap();
        for i in 0..120 {
            let parity = if i % 2 == 0 { "even" } else { "odd" };
            index
                .add_document(&text_doc(&format!("k{}", i), &format!("num{} {}", i, parity)))
                .unwrap();
        }
        assert_eq!(index.delete_by_term(b"num7").unwrap(), 1);
        index.commit().unwrap();
        index.force_merge(1).unwrap();
        index.commit().unwrap();
    }

    let dir = Arc::new(FsDirectory::open(tmp.path()).unwrap());
    let index = Index::open(dir.clone(), config).unwrap();
    let set = index.snapshot();
    assert_eq!(set.len(), 1);
    assert_eq!(set.num_docs(), 119);
    assert_eq!(set.max_doc(), 119);
    assert_eq!(set.term_docs(b"odd").unwrap().len(), 59);
    assert!(set.readers()[0].live_docs().iter_live().count() == 119);
    assert!(check_segments(&set).is_empty());

    let mut files = dir.list().unwrap();
    files.retain(|f| f.ends_with(".seg"));
    assert_eq!(files.len(), 1);
}

#[test]
fn test_advance_past_end() {
    let dir = RamDirectory::new();
    let info = write_segment(&dir, 0, &["z"; 20]);
    let reader = SegmentReader::open(&dir, &info).unwrap();
    let mut iter = reader.postings(b"z").unwrap().unwrap();
    assert_eq!(iter.advance(DocId(19)).unwrap(), DocId(19));
    assert_eq!(iter.advance(DocId(20)).unwrap(), NO_MORE_DOCS);
    assert_eq!(iter.next_doc().unwrap(), NO_MORE_DOCS);
}
