//! Benchmarks for coverage arithmetic and report ingestion.
//!
//! Run with: cargo bench
//! Run specific benchmark: cargo bench -- subtract

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use augur::augment::{filter_overlap, ImprovedTest};
use augur::coverage::{parse_coverage_py_str, Coverage, TestCoverage, TestPathFilter};
use augur::parser::FunctionDef;
use augur::testmod::contiguous_ranges;

/// Coverage over `files` files of `lines` statements, covering every `step`-th line.
fn synthetic(files: usize, lines: u32, step: u32, offset: u32) -> TestCoverage {
    TestCoverage::new(
        (0..files)
            .map(|f| {
                let covered = (1..=lines).filter(|l| (l + offset) % step == 0);
                let missing = (1..=lines).filter(|l| (l + offset) % step != 0);
                Coverage::new(format!("pkg/mod_{f}.py"), covered, missing)
            })
            .collect(),
    )
}

fn coverage_json(files: usize, lines: u32) -> String {
    let entries: Vec<String> = (0..files)
        .map(|f| {
            let executed: Vec<String> = (1..=lines).step_by(2).map(|l| l.to_string()).collect();
            let missing: Vec<String> = (2..=lines).step_by(2).map(|l| l.to_string()).collect();
            format!(
                r#""pkg/mod_{f}.py": {{"executed_lines": [{}], "missing_lines": [{}], "summary": {{"num_statements": {lines}}}}}"#,
                executed.join(","),
                missing.join(",")
            )
        })
        .collect();
    format!(r#"{{"files": {{{}}}}}"#, entries.join(","))
}

fn bench_arithmetic(c: &mut Criterion) {
    let mut group = c.benchmark_group("arithmetic");
    for files in [10usize, 100, 500] {
        let a = synthetic(files, 400, 2, 0);
        let b = synthetic(files, 400, 3, 1);
        group.throughput(Throughput::Elements(files as u64));
        group.bench_with_input(BenchmarkId::new("subtract", files), &files, |bench, _| {
            bench.iter(|| black_box(&a - &b))
        });
        group.bench_with_input(BenchmarkId::new("add", files), &files, |bench, _| {
            bench.iter(|| black_box(&a + &b))
        });
        group.bench_with_input(BenchmarkId::new("get_covered", files), &files, |bench, _| {
            bench.iter(|| black_box(a.get_covered(&b)))
        });
    }
    group.finish();
}

fn bench_filter_overlap(c: &mut Criterion) {
    let base = synthetic(20, 400, 5, 0);
    let tests: Vec<ImprovedTest> = (0..50u32)
        .map(|i| ImprovedTest {
            func: FunctionDef {
                name: format!("test_{i}"),
                class_name: None,
                start_line: 1,
                end_line: 2,
                code: format!("def test_{i}():\n    pass"),
            },
            coverage: synthetic(3, 400, 7 + i % 5, i),
        })
        .collect();

    c.bench_function("filter_overlap/50", |bench| {
        bench.iter(|| black_box(filter_overlap(tests.clone(), &base)))
    });
}

fn bench_chunking(c: &mut Criterion) {
    let lines: Vec<u32> = (1..=20_000).filter(|l| l % 7 != 0).collect();
    c.bench_function("contiguous_ranges/20k", |bench| {
        bench.iter(|| black_box(contiguous_ranges(lines.iter().copied())))
    });
}

fn bench_report_parsing(c: &mut Criterion) {
    let filter = TestPathFilter::new(&["test_*.py".to_string()]).expect("valid patterns");
    let mut group = c.benchmark_group("coverage_json");
    for files in [10usize, 200] {
        let json = coverage_json(files, 500);
        group.throughput(Throughput::Bytes(json.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(files), &json, |bench, json| {
            bench.iter(|| black_box(parse_coverage_py_str(json, &filter).expect("parses")))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_arithmetic,
    bench_filter_overlap,
    bench_chunking,
    bench_report_parsing
);
criterion_main!(benches);
