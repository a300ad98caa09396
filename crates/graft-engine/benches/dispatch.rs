use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use graft_engine::{
    BackendKind, HostObject, HostType, HostTypeBuilder, Modifiers, Platform, PlatformOptions, ScriptTypeBuilder,
    StandardWrapper, TableResolver, Value, ValueType,
};

fn platform(backend: BackendKind) -> Platform {
    Platform::with_options(
        PlatformOptions::default().with_backend(backend),
        Arc::new(TableResolver::new()),
        Arc::new(StandardWrapper::new()),
    )
}

fn adder() -> Arc<HostType> {
    HostTypeBuilder::class("bench.Adder")
        .native_method(
            "add",
            vec![ValueType::int(), ValueType::int()],
            ValueType::int(),
            Modifiers::PUBLIC,
            |_, args| {
                let a = args[0].as_int().unwrap_or_default();
                let b = args[1].as_int().unwrap_or_default();
                Ok(Value::int(a.wrapping_add(b)))
            },
        )
        .build()
}

fn bench_script_override(c: &mut Criterion) {
    let mut group = c.benchmark_group("script_override");

    for backend in [BackendKind::Assembly, BackendKind::Weave] {
        let platform = platform(backend);
        let script = ScriptTypeBuilder::extending("Doubler", &adder())
            .function("add", Some(2), |_, args| {
                let a = args[0].as_int().unwrap_or_default();
                let b = args[1].as_int().unwrap_or_default();
                Ok(Value::int(2 * a.wrapping_add(b)))
            })
            .build();
        let instance = platform.extend(&script, &[], &[]).unwrap();

        group.bench_with_input(BenchmarkId::new("add", backend), &instance, |b, instance| {
            b.iter(|| instance.call("add", black_box(&[Value::int(20), Value::int(1)])).unwrap());
        });
    }

    group.finish();
}

fn bench_host_default(c: &mut Criterion) {
    let mut group = c.benchmark_group("host_default");

    for backend in [BackendKind::Assembly, BackendKind::Weave] {
        let platform = platform(backend);
        let script = ScriptTypeBuilder::extending("Plain", &adder()).build();
        let instance = platform.extend(&script, &[], &[]).unwrap();

        group.bench_with_input(BenchmarkId::new("routed", backend), &instance, |b, instance| {
            b.iter(|| instance.call("add", black_box(&[Value::int(20), Value::int(1)])).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("call_original", backend), &instance, |b, instance| {
            b.iter(|| instance.call_original("add", black_box(vec![Value::int(20), Value::int(1)])).unwrap());
        });
    }

    group.finish();
}

fn bench_unbound(c: &mut Criterion) {
    let platform = platform(BackendKind::Weave);
    let subtype = platform.create_extension_type(&adder(), &[], &[]).unwrap();
    let obj = HostObject::construct(subtype.host_type(), &[], &[]).unwrap();
    let plain = HostObject::construct(&adder(), &[], &[]).unwrap();

    c.bench_function("unbound_thunk", |b| {
        b.iter(|| obj.call("add", black_box(&[Value::int(20), Value::int(1)])).unwrap());
    });
    c.bench_function("plain_host_call", |b| {
        b.iter(|| plain.call("add", black_box(&[Value::int(20), Value::int(1)])).unwrap());
    });
}

fn bench_generation(c: &mut Criterion) {
    c.bench_function("cache_hit", |b| {
        let platform = platform(BackendKind::Weave);
        let base = adder();
        platform.create_extension_type(&base, &[], &[]).unwrap();
        b.iter(|| platform.create_extension_type(black_box(&base), &[], &[]).unwrap());
    });
}

criterion_group!(
    benches,
    bench_script_override,
    bench_host_default,
    bench_unbound,
    bench_generation
);
criterion_main!(benches);
