// Rope editing and tracking benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use trellis::rope::{EditableRope, Rope};

fn source_text(len: usize) -> String {
    let mut rng = StdRng::seed_from_u64(42);
    return (0..len)
        .map(|_| if rng.gen_bool(0.15) { ' ' } else { rng.gen_range(b'a'..=b'z') as char })
        .collect();
}

// =============================================================================
// Benchmark Helpers
// =============================================================================

/// Random single char inserts and deletes, like typing with corrections.
fn random_edits(rope: &EditableRope, rng: &mut StdRng, count: usize) {
    for _ in 0..count {
        let len = rope.len();
        if len > 0 && rng.gen_bool(0.3) {
            let at = rng.gen_range(0..len);
            let _ = rope.delete(at, at + 1);
        } else {
            let at = rng.gen_range(0..=len);
            let _ = rope.insert(at, &Rope::from("x"));
        }
    }
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_random_edits(c: &mut Criterion) {
    let mut group = c.benchmark_group("random_edits");
    for &count in &[100, 1000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let text = source_text(10_000);
            b.iter(|| {
                let rope = EditableRope::new(Rope::from(text.as_str()));
                let mut rng = StdRng::seed_from_u64(1);
                random_edits(&rope, &mut rng, count);
                black_box(rope.len())
            });
        });
    }
    group.finish();
}

fn bench_tracking(c: &mut Criterion) {
    let text = source_text(10_000);
    let source = Rope::from(text.as_str());
    let rope = EditableRope::new(source.clone());
    random_edits(&rope, &mut StdRng::seed_from_u64(2), 500);
    let edited = rope.contents();

    let mut group = c.benchmark_group("tracking");
    group.bench_function("source_location", |b| {
        let mut rng = StdRng::seed_from_u64(3);
        b.iter(|| {
            let index = rng.gen_range(0..edited.len());
            black_box(edited.tracked_source_location(index).offset)
        });
    });
    group.bench_function("location_of_offset", |b| {
        let mut rng = StdRng::seed_from_u64(4);
        b.iter(|| {
            let offset = rng.gen_range(0..source.len());
            black_box(edited.tracked_location(source.source_id(), offset))
        });
    });
    group.finish();
}

fn bench_flatten(c: &mut Criterion) {
    let text = source_text(10_000);
    c.bench_function("flatten_after_edits", |b| {
        b.iter(|| {
            let rope = EditableRope::new(Rope::from(text.as_str()));
            random_edits(&rope, &mut StdRng::seed_from_u64(5), 200);
            rope.flatten();
            black_box(rope.contents().segment_count())
        });
    });
}

fn bench_split_and_trim(c: &mut Criterion) {
    let text: String = source_text(10_000).replace(' ', "|");
    let rope = Rope::from(text.as_str());
    c.bench_function("split_parts_trim", |b| {
        b.iter(|| {
            let parts = rope.split_parts('|', false);
            black_box(parts.iter().map(|part| part.trim().len()).sum::<usize>())
        });
    });
}

criterion_group!(benches, bench_random_edits, bench_tracking, bench_flatten, bench_split_and_trim);

criterion_main!(benches);
