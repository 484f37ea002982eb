use std::hash::BuildHasherDefault;

use criterion::measurement::WallTime;
use criterion::{
    black_box, criterion_group, criterion_main, BenchmarkGroup, BenchmarkId, Criterion, Throughput,
};
use hyperloglogplus::HyperLogLog as HyperLogLogTrait;
use pprof::criterion::{Output, PProfProfiler};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sketch_dataset::{
    BucketDescriptor, HistogramSketch, HllSketch, HyperLogLog, MisraGriesSketch, Sketch,
    Table as DataTable,
};
use tabled::settings::{Settings, Style};
use tabled::{Table, Tabled};
use wyhash::WyHash;

/// Sketches are benchmarked over tables of 1, 4, 16, ... rows up to
/// `DEFAULT_MAX_ROWS` or environment variable `N` (if defined).
const DEFAULT_MAX_ROWS: usize = 1 << 16;

const PRECISION: u8 = 12;

criterion_group! {
    name = benches;
    config = Criterion::default().with_profiler(PProfProfiler::new(100, Output::Protobuf));
    targets = benchmark
}
criterion_main!(benches);

fn benchmark(c: &mut Criterion) {
    let bench_results_path = std::env::var("BENCH_RESULTS_PATH").unwrap_or_else(|_| "target".to_string());
    let max_rows = std::env::var("N")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_ROWS);

    let sizes: Vec<usize> = (0..)
        .map(|c| 1 << (2 * c))
        .take_while(|&c| c <= max_rows)
        .collect();

    let mut group = c.benchmark_group("create");
    for &rows in &sizes {
        group.throughput(Throughput::Elements(rows as u64));
        let table = table(rows);
        let histogram = HistogramSketch::new("x", BucketDescriptor::equal_width(0.0, 1_000.0, 100).unwrap());
        bench_create(&mut group, "histogram", &histogram, &table);
        bench_create(&mut group, "hll", &HllSketch::new("x", PRECISION, 0).unwrap(), &table);
        let misra_gries = MisraGriesSketch::new(vec!["x".to_string()], 100).unwrap();
        bench_create(&mut group, "misra_gries", &misra_gries, &table);
    }
    group.finish();

    let mut group = c.benchmark_group("merge");
    group.throughput(Throughput::Elements(1));
    for &rows in &sizes {
        let sketch = HllSketch::new("x", PRECISION, 0).unwrap();
        let parts = table(rows).split(2).unwrap();
        let left = sketch.create(&parts[0]).unwrap();
        let right = sketch.create(&parts[1]).unwrap();
        group.bench_with_input(BenchmarkId::new("hll", rows), &rows, |b, _| {
            b.iter(|| sketch.add(black_box(&left), black_box(&right)).unwrap());
        });
    }
    group.finish();

    let results: Vec<StatRecord> = sizes
        .iter()
        .map(|&cardinality| StatRecord {
            cardinality,
            sketch_dataset: measure_error(cardinality, hll_estimate),
            hyperloglogplus: measure_error(cardinality, hyperloglogplus_estimate),
        })
        .collect();

    let table_config = Settings::default().with(Style::markdown());
    std::fs::write(
        format!("{}/relative_error.md", bench_results_path),
        Table::new(results).with(table_config).to_string(),
    )
    .unwrap();
}

fn table(rows: usize) -> DataTable {
    let mut rng = StdRng::seed_from_u64(rows as u64);
    DataTable::builder()
        .integers("x", (0..rows).map(|_| rng.gen_range(0..1_000)))
        .build()
        .unwrap()
}

fn bench_create<S: Sketch<DataTable>>(
    group: &mut BenchmarkGroup<WallTime>,
    name: &str,
    sketch: &S,
    table: &DataTable,
) {
    group.bench_with_input(
        BenchmarkId::new(name, table.num_rows()),
        table,
        |b, table| {
            b.iter(|| sketch.create(black_box(table)).unwrap());
        },
    );
}

fn hll_estimate(items: &[u64]) -> usize {
    let mut hll = HyperLogLog::new(PRECISION, 0).unwrap();
    for item in items {
        hll.insert_hash(wyhash::wyhash(&item.to_le_bytes(), 0));
    }
    hll.estimate()
}

fn hyperloglogplus_estimate(items: &[u64]) -> usize {
    let mut hll: hyperloglogplus::HyperLogLogPlus<u64, BuildHasherDefault<WyHash>> =
        hyperloglogplus::HyperLogLogPlus::new(PRECISION, BuildHasherDefault::<WyHash>::default())
            .unwrap();
    for item in items {
        hll.insert(item);
    }
    hll.count() as usize
}

fn measure_error(cardinality: usize, estimate: fn(&[u64]) -> usize) -> String {
    let n = 100;
    let mut total_relative_error: f64 = 0.0;
    let mut rng = StdRng::seed_from_u64(12345);
    for _ in 0..n {
        let items: Vec<u64> = (0..cardinality).map(|_| rng.gen()).collect();
        let relative_error = if cardinality == 0 {
            0.0
        } else {
            (estimate(&items) as f64 - cardinality as f64).abs() / cardinality as f64
        };
        total_relative_error += relative_error;
    }
    let avg_relative_error = total_relative_error / (n as f64);

    if avg_relative_error < 1.0 {
        format!("{:.4}", avg_relative_error)
    } else {
        format!("{:.2e}", avg_relative_error)
    }
}

#[derive(Tabled)]
struct StatRecord {
    cardinality: usize,
    sketch_dataset: String,
    hyperloglogplus: String,
}
