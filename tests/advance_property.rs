//! `advance(t)` agrees with stepping `next_doc` past every doc below `t`

use std::sync::Arc;

use lucent::segment::{LiveDocs, Occurrence, Posting, PostingsFormat, PostingsReader, PostingsWriter};
use lucent::store::SharedBytes;
use lucent::{DocId, NO_MORE_DOCS};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_postings(rng: &mut StdRng, max_doc: u32, positions: bool) -> Vec<Posting> {
    let density = rng.gen_range(0.01..0.9);
    let mut postings = Vec::new();
    for doc in 0..max_doc {
        if !rng.gen_bool(density) {
            continue;
        }
        let freq = rng.gen_range(1..5u32);
        postings.push(if positions {
            let occurrences = (0..freq)
                .map(|i| Occurrence::new(i * 3, i * 10, i * 10 + 4))
                .collect();
            Posting::with_occurrences(DocId(doc), occurrences)
        } else {
            Posting::new(DocId(doc), freq)
        });
    }
    postings
}

fn expected_after(docs: &[u32], live: &LiveDocs, target: u32) -> DocId {
    docs.iter()
        .copied()
        .find(|&d| d >= target && live.is_live(DocId(d)))
        .map_or(NO_MORE_DOCS, DocId)
}

#[test]
fn test_advance_matches_linear_scan() {
    let mut rng = StdRng::seed_from_u64(42);
    for round in 0..60 {
        let format = PostingsFormat {
            skip_interval: rng.gen_range(2..20),
            positions: rng.gen_bool(0.5),
            offsets: false,
        };
        let format = PostingsFormat {
            offsets: format.positions && rng.gen_bool(0.5),
            ..format
        };
        let max_doc = rng.gen_range(1..3000);
        let postings = random_postings(&mut rng, max_doc, format.positions);
        if postings.is_empty() {
            continue;
        }
        let docs: Vec<u32> = postings.iter().map(|p| p.doc.as_u32()).collect();

        let mut writer = PostingsWriter::new(format, u32::MAX as u64);
        let meta = writer.write_term(&postings).unwrap();
        let reader = PostingsReader::new(SharedBytes::from_vec(writer.into_data()), format);

        let mut live = LiveDocs::new(max_doc);
        for doc in 0..max_doc {
            if rng.gen_bool(0.1) {
                live.delete(DocId(doc));
            }
        }
        let live = Arc::new(live);

        let mut iter = reader.open(&meta, Some(Arc::clone(&live))).unwrap();
        let mut target = 0u32;
        loop {
            let want = expected_after(&docs, &live, target);
            let got = iter.advance(DocId(target)).unwrap();
            assert_eq!(got, want, "round {} target {}", round, target);
            if got == NO_MORE_DOCS {
                break;
            }
            // Positions of the landed doc are intact after skipping
            if format.positions {
                let posting = postings.iter().find(|p| p.doc == got).unwrap();
                assert_eq!(iter.occurrences().unwrap().len() as u32, posting.freq);
            }
            target = got.as_u32() + rng.gen_range(1..200);
        }
    }
}

#[test]
fn test_mixed_next_and_advance() {
    let mut rng = StdRng::seed_from_u64(7);
    let format = PostingsFormat {
        skip_interval: 8,
        positions: false,
        offsets: false,
    };
    let postings = random_postings(&mut rng, 5000, false);
    let docs: Vec<u32> = postings.iter().map(|p| p.doc.as_u32()).collect();
    let all_live = LiveDocs::new(5000);

    let mut writer = PostingsWriter::new(format, u32::MAX as u64);
    let meta = writer.write_term(&postings).unwrap();
    let reader = PostingsReader::new(SharedBytes::from_vec(writer.into_data()), format);

    let mut iter = reader.open(&meta, None).unwrap();
    let mut current = iter.next_doc().unwrap();
    while current != NO_MORE_DOCS {
        let next = if rng.gen_bool(0.5) {
            let expected = expected_after(&docs, &all_live, current.as_u32() + 1);
            let got = iter.next_doc().unwrap();
            assert_eq!(got, expected);
            got
        } else {
            let target = current.as_u32() + rng.gen_range(1..100);
            let got = iter.advance(DocId(target)).unwrap();
            assert_eq!(got, expected_after(&docs, &all_live, target));
            got
        };
        let index = docs.iter().position(|&d| DocId(d) == next);
        if let Some(i) = index {
            assert_eq!(iter.freq(), postings[i].freq);
        }
        current = next;
    }
}
