//! Benchmarks for cascade planning and execution
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tickflow::engine::steps::{ConstantStep, GainStep};
use tickflow::engine::{
    BuiltinStep, CascadeCompiler, Group, LoopedTrigger, LoopedTriggerConfig, Step, Triggerable,
};

/// `source -> g1 -> g2 -> ... -> gN`, connected and chained, with only the
/// source attached to the trigger.
fn gain_chain(length: usize) -> (Arc<Group>, LoopedTrigger) {
    let group = Group::new("bench");
    group
        .add_step(Step::builtin("g0", BuiltinStep::Constant(ConstantStep::new(1.0))).unwrap())
        .unwrap();
    for i in 1..=length {
        group
            .add_step(Step::builtin(format!("g{}", i), BuiltinStep::Gain(GainStep::new(1.0001))).unwrap())
            .unwrap();
        group
            .connect(&format!("g{}.out", i - 1), &format!("g{}.in", i))
            .unwrap();
        group
            .connect_trigger(&format!("g{}", i - 1), &format!("g{}", i))
            .unwrap();
    }
    let trigger = group
        .add_looped_trigger("bench", LoopedTriggerConfig::default())
        .unwrap();
    group.assign("g0", "bench").unwrap();
    (group, trigger)
}

fn bench_fire(c: &mut Criterion) {
    let mut bench = c.benchmark_group("cascade_fire");

    for length in [10, 100, 1000].iter() {
        let (_group, trigger) = gain_chain(*length);
        bench.throughput(Throughput::Elements(*length as u64 + 1));
        bench.bench_with_input(BenchmarkId::new("gain_chain", length), &trigger, |b, trigger| {
            b.iter(|| black_box(trigger.fire()));
        });
    }

    bench.finish();
}

fn bench_compile(c: &mut Criterion) {
    let mut bench = c.benchmark_group("cascade_compile");

    for length in [10, 100, 1000].iter() {
        let (_group, trigger) = gain_chain(*length);
        let roots: Vec<Arc<dyn Triggerable>> = trigger.attached();
        bench.throughput(Throughput::Elements(*length as u64 + 1));
        bench.bench_with_input(BenchmarkId::new("gain_chain", length), &roots, |b, roots| {
            b.iter(|| black_box(CascadeCompiler::compile(roots)));
        });
    }

    bench.finish();
}

criterion_group!(benches, bench_fire, bench_compile);

criterion_main!(benches);
