//! resolve many benches
#[macro_use]
extern crate criterion;

use std::collections::HashSet;

use chalet_core::config::{self, resolver::ResolutionContext};
use criterion::Criterion;

fn context() -> ResolutionContext {
    ResolutionContext {
        configuration_name: "Release".to_string(),
        platform: "linux".to_string(),
        toolchain_family: "gnu".to_string(),
        toolchain_name: "gcc".to_string(),
        architecture: "x86_64".to_string(),
        target_triple: "x86_64-unknown-linux-gnu".to_string(),
        external_dir: "/tmp/external".to_string(),
        build_dir: "/tmp/build".to_string(),
        output_dir: "/tmp/build".to_string(),
        user_tokens: HashSet::new(),
    }
}

fn build_file(num_targets: usize) -> serde_json::Value {
    let mut targets = serde_json::Map::new();
    for i in 0..num_targets {
        targets.insert(
            format!("target{i}"),
            serde_json::json!({
                "kind": "staticLibrary",
                "language": "cpp",
                "files.!windows": [format!("src/target{i}/posix/*.cpp")],
                "files.windows": [format!("src/target{i}/win/*.cpp")],
                "includeDirs": ["include", "${var:root}/vendor/include"],
                "defines": ["RELEASE=1"],
            }),
        );
    }
    serde_json::json!({
        "workspace": "bench",
        "version": "0.1.0",
        "variables": { "root": "." },
        "abstracts": { "*": { "cppStandard": "c++17", "warnings": "strict" } },
        "targets": targets,
    })
}

fn resolve_many_benchmark(c: &mut Criterion) {
    let value = build_file(200);
    let ctx = context();

    let mut group = c.benchmark_group("resolve many targets");
    group.sample_size(20);
    group.bench_function("200 targets, conditioned + inherited fields", |b| {
        b.iter(|| {
            let workspace = config::resolver::resolve(&value, &ctx).unwrap();
            assert_eq!(workspace.targets.len(), 200);
        });
    });
}

criterion_group!(benches, resolve_many_benchmark);
criterion_main!(benches);
