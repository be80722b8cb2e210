// Hash trie benchmarks for TrieDB

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use triedb::segment::{MergePlanner, PlanSegment};
use triedb::trie::{HashTrie, MemoryHashTrie, MemoryNode};

fn random_keys(count: usize) -> Vec<[u8; 16]> {
    let mut rng = StdRng::seed_from_u64(7);
    (0..count).map(|_| rng.random()).collect()
}

fn build(keys: &Vec<[u8; 16]>, page_limit: usize) -> MemoryHashTrie {
    let mut trie = MemoryHashTrie::builder().page_limit(page_limit).build().unwrap();
    for idx in 0..keys.len() as u32 {
        trie = trie.add(keys, idx);
    }
    trie
}

fn benchmark_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("trie_add");

    for size in [1_000, 10_000, 100_000].iter() {
        let keys = random_keys(*size);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &keys, |b, keys| {
            b.iter(|| black_box(build(keys, 1024)));
        });
    }

    group.finish();
}

fn benchmark_compact_logs(c: &mut Criterion) {
    let mut group = c.benchmark_group("trie_compact_logs");

    for size in [1_000, 10_000, 100_000].iter() {
        let keys = random_keys(*size);
        let trie = build(&keys, 1024);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &trie, |b, trie| {
            b.iter(|| black_box(trie.compact_logs(&keys)));
        });
    }

    group.finish();
}

struct BenchSegment(MemoryHashTrie);

impl PlanSegment for BenchSegment {
    type Node = MemoryNode;

    fn part(&self) -> Option<&[u8]> {
        None
    }

    fn root_node(&self) -> Option<MemoryNode> {
        self.0.root_node()
    }
}

fn benchmark_merge_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_plan");
    let keys = random_keys(50_000);

    for segments in [2, 8, 32].iter() {
        let tries: Vec<BenchSegment> = (0..*segments)
            .map(|i| BenchSegment(build(&keys, 64 << (i % 4)).compact_logs(&keys)))
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(segments), &tries, |b, tries| {
            b.iter(|| black_box(MergePlanner::plan(tries, None).len()));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_add, benchmark_compact_logs, benchmark_merge_plan);
criterion_main!(benches);
