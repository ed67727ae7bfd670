//! Criterion benchmarks for the registration path.
//!
//! Measures tree-sitter extraction on a synthetic module, full directory
//! registration into an in-memory store, and a CALLS lookup over the result.
//!
//! Run with: `cargo bench --bench extraction`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::path::Path;
use std::sync::Arc;

use callmap::config::ProjectConfig;
use callmap::graph::{GraphStore, SqliteStore};
use callmap::languages::{get_extractor, Extractor};
use callmap::pipeline::Pipeline;

/// A module importing from `deps` sibling files and declaring `functions`
/// top-level functions, each calling two imported helpers.
fn synthetic_module(deps: usize, functions: usize) -> String {
    let mut src = String::new();
    for d in 0..deps {
        src.push_str(&format!("import {{ helper{d}, other{d} }} from './dep{d}';\n"));
    }
    for f in 0..functions {
        let d = f % deps.max(1);
        src.push_str(&format!(
            "export function fn{f}(input) {{\n  const v = helper{d}(input);\n  if (v) {{ return other{d}(v); }}\n  return input.map((x) => x + {f});\n}}\n\n"
        ));
    }
    src
}

fn dep_module(d: usize) -> String {
    format!("export function helper{d}(x) {{ return x; }}\nexport function other{d}(x) {{ return x; }}\n")
}

fn write_project(root: &Path, modules: usize) {
    for d in 0..8 {
        std::fs::write(root.join(format!("dep{d}.ts")), dep_module(d)).expect("write dep");
    }
    for m in 0..modules {
        std::fs::write(root.join(format!("mod{m}.ts")), synthetic_module(8, 20)).expect("write module");
    }
}

fn bench_extract(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract_typescript");
    for functions in [10usize, 100, 500] {
        let source = synthetic_module(8, functions);
        let mut extractor = get_extractor("typescript").expect("typescript extractor");
        group.bench_with_input(BenchmarkId::from_parameter(functions), &source, |b, src| {
            b.iter(|| extractor.extract(src, "/bench/mod.ts").unwrap())
        });
    }
    group.finish();
}

fn bench_register(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let dir = tempfile::tempdir().expect("tempdir");
    write_project(dir.path(), 50);

    c.bench_function("register_directory_58_files", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let store = Arc::new(SqliteStore::memory().unwrap());
                let pipeline = Pipeline::new(ProjectConfig::default(), store.clone(), store);
                pipeline.register_directory(dir.path()).await.unwrap()
            })
        })
    });
}

fn bench_calls_query(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let dir = tempfile::tempdir().expect("tempdir");
    write_project(dir.path(), 50);
    let store = Arc::new(SqliteStore::memory().unwrap());
    let pipeline = Pipeline::new(ProjectConfig::default(), store.clone(), store.clone());
    runtime
        .block_on(pipeline.register_directory(dir.path()))
        .unwrap();

    c.bench_function("callers_of_helper0", |b| {
        b.iter(|| {
            runtime
                .block_on(store.run(
                    "SELECT s.node, c.rel FROM calls_rels c \
                     JOIN function_nodes s ON s.id = c.caller_id \
                     JOIN function_nodes d ON d.id = c.callee_id \
                     WHERE d.name = ?1",
                    &[serde_json::json!("helper0")],
                ))
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_extract, bench_register, bench_calls_query);
criterion_main!(benches);
