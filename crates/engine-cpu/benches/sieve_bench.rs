use criterion::{black_box, criterion_group, criterion_main, Criterion};
use engine_cpu::sieve::base_remainders;
use engine_cpu::{BitArraySieve, CandidateCompactor, ModularWheelTable};
use num_bigint::BigUint;
use prime_core::{Origin, RoundCounters};
use rand::RngCore;
use std::sync::atomic::AtomicBool;

const PRIMORIAL: u64 = 30030;
const PATTERN: [u32; 7] = [0, 2, 6, 8, 12, 18, 20];

fn random_origin() -> Origin {
    let mut hash = [0u8; 128];
    rand::thread_rng().fill_bytes(&mut hash);
    hash[0] |= 0x80;
    Origin::new(&BigUint::from_bytes_be(&hash), PRIMORIAL)
}

fn bench_wheel_sieve(c: &mut Criterion) {
    let wheel = ModularWheelTable::generate(PRIMORIAL, 6, 1 << 14).unwrap();
    let origin = random_origin();
    let mut remainders = Vec::new();
    base_remainders(&origin.candidate(15551), &wheel, &mut remainders);
    let mut sieve = BitArraySieve::new(1 << 16).unwrap();
    let cancel = AtomicBool::new(false);

    c.bench_function("wheel_sieve_64k_bits", |b| {
        b.iter(|| {
            let outcome = sieve.run(
                black_box(&wheel),
                black_box(&remainders),
                black_box(&PATTERN),
                &cancel,
            );
            black_box(outcome)
        })
    });
}

fn bench_compaction(c: &mut Criterion) {
    let wheel = ModularWheelTable::generate(PRIMORIAL, 6, 1 << 14).unwrap();
    let origin = random_origin();
    let mut remainders = Vec::new();
    base_remainders(&origin.candidate(15551), &wheel, &mut remainders);
    let mut sieve = BitArraySieve::new(1 << 14).unwrap();
    let cancel = AtomicBool::new(false);
    sieve.run(&wheel, &remainders, &PATTERN, &cancel);

    let compactor = CandidateCompactor::new(PRIMORIAL, 0);
    let counters = RoundCounters::default();

    c.bench_function("compact_16k_bits", |b| {
        b.iter(|| {
            let survivors = compactor.compact(
                black_box(&sieve),
                black_box(15551),
                &origin,
                &cancel,
                &counters,
            );
            black_box(survivors)
        })
    });
}

criterion_group!(benches, bench_wheel_sieve, bench_compaction);
criterion_main!(benches);
