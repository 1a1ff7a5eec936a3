use criterion::{criterion_group, criterion_main, Criterion};
use ledger_core::{mine::mine_parallel, now_timestamp, pow::mine_block, BlockTemplate};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn bench_pow(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);
    let payload: String = (0..64)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect();
    let template = BlockTemplate::new(1, now_timestamp(), payload, "0", 3);

    c.bench_function("mine_block_difficulty_3", |b| {
        b.iter(|| {
            let _mined = mine_block(template.clone());
        });
    });

    c.bench_function("mine_parallel_difficulty_3", |b| {
        b.iter(|| {
            let _mined = mine_parallel(&template, || false);
        });
    });
}

criterion_group!(benches, bench_pow);
criterion_main!(benches);
