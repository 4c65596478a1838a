use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use lucent::segment::{Posting, PostingsFormat, PostingsReader, PostingsWriter, TermMeta};
use lucent::store::SharedBytes;
use lucent::{DocId, NO_MORE_DOCS};

fn make_postings(count: u32, gap: u32) -> Vec<Posting> {
    (0..count)
        .map(|i| Posting::new(DocId(i * gap), 1 + i % 4))
        .collect()
}

fn format(skip_interval: u32) -> PostingsFormat {
    PostingsFormat {
        skip_interval,
        positions: false,
        offsets: false,
    }
}

fn encode(postings: &[Posting], format: PostingsFormat) -> (PostingsReader, TermMeta) {
    let mut writer = PostingsWriter::new(format, u32::MAX as u64);
    let meta = writer.write_term(postings).unwrap();
    let reader = PostingsReader::new(SharedBytes::from_vec(writer.into_data()), format);
    (reader, meta)
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("postings_encode");
    for &count in &[1_000u32, 10_000, 100_000] {
        let postings = make_postings(count, 3);
        group.bench_with_input(BenchmarkId::from_parameter(count), &postings, |b, postings| {
            b.iter(|| {
                let mut writer = PostingsWriter::new(format(128), u32::MAX as u64);
                black_box(writer.write_term(postings).unwrap());
                black_box(writer.into_data());
            })
        });
    }
    group.finish();
}

fn bench_next_doc(c: &mut Criterion) {
    let mut group = c.benchmark_group("postings_next_doc");
    for &count in &[1_000u32, 10_000, 100_000] {
        let (reader, meta) = encode(&make_postings(count, 3), format(128));
        group.bench_with_input(BenchmarkId::from_parameter(count), &meta, |b, meta| {
            b.iter(|| {
                let mut iter = reader.open(meta, None).unwrap();
                let mut sum = 0u64;
                while iter.next_doc().unwrap() != NO_MORE_DOCS {
                    sum += iter.freq() as u64;
                }
                black_box(sum)
            })
        });
    }
    group.finish();
}

fn bench_advance(c: &mut Criterion) {
    let postings = make_postings(100_000, 3);
    let mut group = c.benchmark_group("postings_advance");
    for &skip_interval in &[16u32, 128, 1024] {
        let (reader, meta) = encode(&postings, format(skip_interval));
        group.bench_with_input(
            BenchmarkId::new("skip_interval", skip_interval),
            &meta,
            |b, meta| {
                b.iter(|| {
                    let mut iter = reader.open(meta, None).unwrap();
                    let mut target = 0u32;
                    let mut hits = 0u32;
                    loop {
                        let doc = iter.advance(DocId(target)).unwrap();
                        if doc == NO_MORE_DOCS {
                            break;
                        }
                        hits += 1;
                        target = doc.as_u32() + 2_000;
                    }
                    black_box(hits)
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_next_doc, bench_advance);
criterion_main!(benches);
