use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use edmd::core::{random_gas, GasSpec, HardSphere, Integrator, PotentialMap, RunLimit, SimBox};
use std::hint::black_box;

fn prepare_gas(count: usize) -> Integrator {
    // Keep the packing fraction near 5% as the count grows
    let edge = (count as f64 * 0.5236 / 0.05).cbrt().max(4.0);
    let sim_box = SimBox::periodic([edge; 3]).expect("valid box");
    let spec = GasSpec {
        num_particles: count,
        seed: Some(17),
        ..GasSpec::default()
    };
    let particles = random_gas(&spec, &sim_box).expect("placement");
    let potentials = PotentialMap::uniform(HardSphere::new(1.0).expect("valid sigma"));
    Integrator::initialize(particles, sim_box, potentials).expect("valid setup")
}

fn bench_collisions(c: &mut Criterion) {
    let mut group = c.benchmark_group("collisions");
    group.sample_size(20);
    for &count in &[256usize, 1024, 4096] {
        group.bench_with_input(BenchmarkId::new("hard_sphere", count), &count, |b, &count| {
            b.iter(|| {
                let mut sim = prepare_gas(count);
                sim.run_until(black_box(RunLimit::Collisions(1000)))
                    .expect("run")
            })
        });
    }
    group.finish();
}

fn bench_initial_prediction(c: &mut Criterion) {
    let mut group = c.benchmark_group("initial_prediction");
    for &count in &[1024usize, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let mut sim = prepare_gas(count);
                sim.step().expect("step")
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_collisions, bench_initial_prediction);
criterion_main!(benches);
