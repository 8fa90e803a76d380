use std::hint::black_box;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use wagmi_vm::{Configure, Value, Vm};

/// `fib(n: i32) -> i32`, naive recursion, exported as "fib".
const FIB_WASM: &[u8] = &[
    0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, // header
    0x01, 0x06, 0x01, 0x60, 0x01, 0x7f, 0x01, 0x7f, // (i32) -> i32
    0x03, 0x02, 0x01, 0x00, //
    0x07, 0x07, 0x01, 0x03, b'f', b'i', b'b', 0x00, 0x00, //
    0x0a, 0x1e, 0x01, 0x1c, 0x00, //
    0x20, 0x00, 0x41, 0x02, 0x48, 0x04, 0x7f, // if n < 2
    0x20, 0x00, //
    0x05, // else fib(n - 1) + fib(n - 2)
    0x20, 0x00, 0x41, 0x01, 0x6b, 0x10, 0x00, //
    0x20, 0x00, 0x41, 0x02, 0x6b, 0x10, 0x00, //
    0x6a, 0x0b, 0x0b,
];

fn bench_fib(c: &mut Criterion) {
    let conf = Configure::new();
    let mut vm = Vm::new(&conf);
    let t0 = Instant::now();
    let res = vm.run_wasm_bytes(FIB_WASM, "fib", &[Value::I32(25)]).expect("run fib once");
    println!(
        "fib(25) single-run: elapsed={:.6}s result={:?} instrs={}",
        t0.elapsed().as_secs_f64(),
        res,
        vm.statistics().instr_count
    );

    let mut group = c.benchmark_group("fib");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(20));
    group.throughput(Throughput::Elements(1));
    group.bench_function("fib_25", |b| {
        b.iter(|| {
            let results = vm.execute("fib", &[Value::I32(black_box(25))]).expect("execute fib");
            black_box(results);
        });
    });
    group.finish();
    println!("{:.0} instructions per second of guest time", vm.statistics().instr_per_second());
}

fn bench_pipeline(c: &mut Criterion) {
    let conf = Configure::new();
    let mut group = c.benchmark_group("pipeline");
    group.bench_function("load_validate_instantiate", |b| {
        let mut vm = Vm::new(&conf);
        b.iter(|| {
            vm.load_wasm_bytes(black_box(FIB_WASM)).expect("load");
            vm.validate().expect("validate");
            vm.instantiate().expect("instantiate");
            vm.cleanup();
        });
    });
    group.finish();
}

criterion_group!(benches, bench_fib, bench_pipeline);
criterion_main!(benches);
