use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fluxion_core::fold::FoldMode;
use fluxion_core::graph::Graph;
use fluxion_session::SessionBuilder;

const THREADS: usize = 4;

fn chain(c: &mut Criterion) {
    c.bench_function("chain-64", |b| {
        b.iter(|| {
            let mut graph = Graph::new();
            let input = graph.add_input::<u64>();
            graph.set_input(input.id(), 1u64).unwrap();
            let mut last = graph.add_node(|x: &u64| x + 1, (&input,));
            for _ in 0..63 {
                last = graph.add_node(|x: &u64| x + 1, (&last,));
            }

            let session = SessionBuilder::new(graph)
                .with_num_threads(THREADS)
                .build()
                .unwrap();
            session.run().unwrap();
            black_box(last.result())
        })
    });
}

fn fan_in(c: &mut Criterion) {
    c.bench_function("fan-in-64", |b| {
        b.iter(|| {
            let mut graph = Graph::new();
            let sum = graph.add_fold(FoldMode::Eager, |acc: u64, x: u64| acc + x, 0);
            for i in 0..64u64 {
                let leaf = graph.add_input::<u64>();
                graph.set_input(leaf.id(), i).unwrap();
                let squared = graph.add_node(|x: &u64| x * x, (&leaf,));
                sum.connect(&squared);
            }

            let session = SessionBuilder::new(graph)
                .with_num_threads(THREADS)
                .build()
                .unwrap();
            session.run().unwrap();
            black_box(sum.result())
        })
    });
}

criterion_group!(benches, chain, fan_in);
criterion_main!(benches);
