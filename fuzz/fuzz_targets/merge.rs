#![no_main]

use libfuzzer_sys::fuzz_target;
use sketch_dataset::{HllSketch, MisraGriesSketch, Sketch, Table};
use wyhash::wyhash;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let values: Vec<i64> = data.iter().map(|&b| i64::from(b % 32)).collect();
    let table = Table::builder().integers("x", values).build().unwrap();
    let parts = 1 + wyhash(data, 0) as usize % data.len();

    let hll = HllSketch::new("x", 4 + data[0] % 13, 0).unwrap();
    let whole = hll.create(&table).unwrap();
    let mut merged = hll.zero();
    for part in table.split(parts).unwrap() {
        merged = hll.add(&merged, &hll.create(&part).unwrap()).unwrap();
    }
    assert_eq!(whole, merged);

    let mg = MisraGriesSketch::new(vec!["x".to_string()], 1 + usize::from(data[0] % 8)).unwrap();
    let mut list = mg.zero();
    for part in table.split(parts).unwrap() {
        list = mg.add(&list, &mg.create(&part).unwrap()).unwrap();
    }
    assert_eq!(list.total_rows(), data.len() as u64);
    assert!(list.len() <= 1 + usize::from(data[0] % 8));
});
