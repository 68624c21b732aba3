//! Propagation throughput: chain cascades, batched fan-in, topological sort

use blockdag::{Block, BlockError, BlockIo, BlockRef, Dag, FieldSpec, FieldType};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

struct Pass;

impl Block for Pass {
    fn fields(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::input("in_v", FieldType::Int),
            FieldSpec::output("out_v", FieldType::Int),
        ]
    }

    fn execute(&mut self, io: &mut BlockIo<'_>) -> Result<(), BlockError> {
        let v = io.get("in_v")?;
        io.set("out_v", v)?;
        Ok(())
    }
}

struct Wide;

impl Block for Wide {
    fn fields(&self) -> Vec<FieldSpec> {
        (0..8)
            .map(|i| FieldSpec::output(&format!("out_{i}"), FieldType::Int))
            .chain((0..8).map(|i| FieldSpec::input(&format!("in_{i}"), FieldType::Int)))
            .collect()
    }
}

fn chain(len: usize) -> (Dag, BlockRef) {
    let dag = Dag::builder().title("chain").no_hook().build();
    let blocks: Vec<BlockRef> = (0..len)
        .map(|i| BlockRef::named(&format!("b{i}"), Pass).unwrap())
        .collect();
    for pair in blocks.windows(2) {
        dag.connect(&pair[0], &pair[1], [("out_v", "in_v")]).unwrap();
    }
    (dag, blocks[0].clone())
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_cascade");
    for len in [4, 32, 128] {
        let (_dag, head) = chain(len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, _| {
            b.iter(|| head.set("out_v", black_box(1)).unwrap())
        });
    }
    group.finish();
}

fn bench_fan_in(c: &mut Criterion) {
    let dag = Dag::builder().title("fan-in").no_hook().build();
    let src = BlockRef::named("src", Wide).unwrap();
    let dst = BlockRef::named("dst", Wide).unwrap();
    let conns: Vec<(String, String)> = (0..8)
        .map(|i| (format!("out_{i}"), format!("in_{i}")))
        .collect();
    dag.connect(
        &src,
        &dst,
        conns.iter().map(|(s, d)| (s.as_str(), d.as_str())),
    )
    .unwrap();

    let mut group = c.benchmark_group("fan_in");
    group.bench_function("single_assignments", |b| {
        b.iter(|| {
            for (field, _) in &conns {
                src.set(field, black_box(1)).unwrap();
            }
        })
    });
    group.bench_function("batched_assignment", |b| {
        b.iter(|| {
            src.update(conns.iter().map(|(field, _)| (field.as_str(), json!(1))))
                .unwrap()
        })
    });
    group.finish();
}

fn bench_sort(c: &mut Criterion) {
    let (dag, _) = chain(256);
    c.bench_function("sorted_256", |b| b.iter(|| black_box(dag.sorted())));
}

criterion_group!(benches, bench_chain, bench_fan_in, bench_sort);
criterion_main!(benches);
