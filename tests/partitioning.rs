use std::sync::Arc;

use sketch_dataset::{
    BucketDescriptor, DataSet, EngineConfig, GroupBySketch, HistogramSketch, HllSketch, MinKSketch,
    MisraGriesSketch, RowSnapshot, Sketch, Table,
};
use test_case::test_case;

fn table(rows: i64) -> Table {
    Table::builder()
        .integers("x", (0..rows).map(|i| (i * 7_919) % 1_000))
        .strings("s", (0..rows).map(|i| format!("k{}", (i * i) % 97)))
        .build()
        .unwrap()
}

/// Parallel dataset over `parts` leaves; with `nested` the leaves are grouped
/// in pairs under intermediate parallel nodes.
fn dataset(t: &Table, parts: usize, nested: bool, config: &EngineConfig) -> DataSet<Table> {
    let leaves: Vec<DataSet<Table>> = t
        .split(parts)
        .unwrap()
        .into_iter()
        .map(|p| DataSet::local(p, config))
        .collect();
    if !nested {
        return DataSet::parallel(leaves, config).unwrap();
    }
    let groups = leaves
        .chunks(2)
        .map(|c| DataSet::parallel(c.to_vec(), config).unwrap())
        .collect();
    DataSet::parallel(groups, config).unwrap()
}

#[test_case(1, false)]
#[test_case(7, false)]
#[test_case(8, true)]
#[test_case(13, true)]
fn test_histogram_is_partition_invariant(parts: usize, nested: bool) {
    let config = EngineConfig::default();
    let t = table(50_000);
    let sketch = HistogramSketch::new("x", BucketDescriptor::equal_width(0.0, 999.0, 20).unwrap());
    let expected = sketch.create(&t).unwrap();
    let actual = dataset(&t, parts, nested, &config)
        .blocking_sketch(Arc::new(sketch))
        .unwrap();
    assert_eq!(actual, expected);
    let total: u64 = actual.buckets().iter().sum::<u64>() + actual.missing() + actual.out_of_range();
    assert_eq!(total, 50_000);
}

#[test_case(3, false)]
#[test_case(10, true)]
fn test_hll_is_partition_invariant(parts: usize, nested: bool) {
    let config = EngineConfig::default();
    let t = table(20_000);
    let sketch = HllSketch::new("s", 12, 5).unwrap();
    let expected = sketch.create(&t).unwrap();
    let actual = dataset(&t, parts, nested, &config)
        .blocking_sketch(Arc::new(sketch))
        .unwrap();
    assert_eq!(actual, expected);
    // i^2 mod 97 takes (97 + 1) / 2 distinct values
    assert!((actual.estimate() as f64 - 49.0).abs() < 3.0, "{}", actual.estimate());
}

#[test]
fn test_min_k_and_group_by_through_parallel() {
    let config = EngineConfig::default();
    let t = table(10_000);
    let min_k = MinKSketch::new("s", 20, 3).unwrap();
    assert_eq!(
        dataset(&t, 6, true, &config).blocking_sketch(Arc::new(min_k.clone())).unwrap(),
        min_k.create(&t).unwrap()
    );
    let group_by = GroupBySketch::new(
        "x",
        BucketDescriptor::equal_width(0.0, 999.0, 4).unwrap(),
        HllSketch::new("s", 10, 0).unwrap(),
    );
    assert_eq!(
        dataset(&t, 5, false, &config).blocking_sketch(Arc::new(group_by.clone())).unwrap(),
        group_by.create(&t).unwrap()
    );
}

#[test]
fn test_zero_is_identity_on_real_results() {
    let t = table(1_000);
    let sketch = HistogramSketch::new("x", BucketDescriptor::equal_width(0.0, 500.0, 10).unwrap());
    let result = sketch.create(&t).unwrap();
    assert_eq!(sketch.add(&sketch.zero(), &result).unwrap(), result);
    assert_eq!(sketch.add(&result, &sketch.zero()).unwrap(), result);
}

#[test]
fn test_heavy_hitters_guarantee_across_partitions() {
    let config = EngineConfig::default();
    // "hot" makes up 30% of the rows, everything else is unique.
    let values: Vec<String> = (0..20_000)
        .map(|i| if i % 10 < 3 { "hot".to_string() } else { format!("u{i}") })
        .collect();
    let t = Table::builder().strings("s", values).build().unwrap();
    let sketch = MisraGriesSketch::new(vec!["s".to_string()], 10).unwrap();
    let list = dataset(&t, 9, true, &config).blocking_sketch(Arc::new(sketch)).unwrap();
    let hot = RowSnapshot::new(vec!["hot".into()]);
    let hitters = list.heavy_hitters(0.2);
    assert!(hitters.iter().any(|(row, _)| row == &hot));
    let estimate = list.get(&hot).unwrap();
    assert!(estimate <= 6_000);
    assert!((6_000 - estimate) as f64 <= list.error_bound());
}
