use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};

use simroute::services::fingerprint::Fingerprinter;

/// Core spec with `assemblies` fuel assemblies of 17x17 pins each.
fn core_spec(assemblies: usize) -> Value {
    let assemblies: Vec<Value> = (0..assemblies)
        .map(|i| {
            json!({
                "id": format!("A{i:03}"),
                "enrichment": 3.1 + (i % 5) as f64 * 0.4,
                "burnup_mwd": 1000 * i,
                "pins": (0..289).map(|p| json!({"r": 0.4096, "gap": 0.0084, "idx": p})).collect::<Vec<_>>(),
            })
        })
        .collect();
    json!({
        "geometry": {"lattice": "square", "pitch": 21.5, "assemblies": assemblies},
        "materials": {"coolant": {"density": 0.7405, "boron_ppm": 1300}},
        "settings": {"temperature_k": 565.0, "seed": 7, "output_dir": "/tmp/run"}
    })
}

fn bench_fingerprint(c: &mut Criterion) {
    let fingerprinter = Fingerprinter::default();
    let mut group = c.benchmark_group("fingerprint");
    for size in [1usize, 16, 64] {
        let spec = core_spec(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &spec, |b, spec| {
            b.iter(|| fingerprinter.fingerprint(black_box(spec)));
        });
    }
    group.finish();
}

fn bench_call_key(c: &mut Criterion) {
    let fingerprinter = Fingerprinter::default();
    let spec = core_spec(4);
    let fingerprint = match fingerprinter.fingerprint(&spec) {
        Ok(fp) => fp,
        Err(e) => panic!("benchmark spec rejected: {e}"),
    };
    let args = json!({"particles": 20_000, "batches": 150});
    c.bench_function("derive_call_key", |b| {
        b.iter(|| fingerprinter.derive_call_key(black_box("run_simulation"), Some(&fingerprint), black_box(&args)));
    });
}

criterion_group!(benches, bench_fingerprint, bench_call_key);
criterion_main!(benches);
