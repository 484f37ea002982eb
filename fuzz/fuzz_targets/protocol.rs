#![no_main]

use libfuzzer_sys::fuzz_target;
use sketch_dataset::protocol::{Reply, Request};
use sketch_dataset::{FreqKList, Histogram, HistogramSketch, HyperLogLog, MinKSet, Sketch, Table};

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = Request::decode(data) {
        let bytes = request.encode().unwrap();
        assert_eq!(Request::decode(&bytes).unwrap(), request);
    }
    if let Ok(reply) = Reply::decode(data) {
        reply.encode().unwrap();
    }
    if let Ok(hll) = serde_json::from_slice::<HyperLogLog>(data) {
        let mut merged = hll.clone();
        merged.merge(&hll).unwrap();
        assert_eq!(merged, hll);
        hll.estimate();
    }
    if let Ok(histogram) = serde_json::from_slice::<Histogram>(data) {
        if let Ok(doubled) = histogram.add(&histogram) {
            assert_eq!(doubled.buckets().len(), histogram.buckets().len());
        }
    }
    if let Ok(sketch) = serde_json::from_slice::<HistogramSketch>(data) {
        let table = Table::builder().doubles("x", [0.0, 1.5, -3.0]).strings("s", ["a", "b", "c"]).build().unwrap();
        let _ = sketch.create(&table);
    }
    if let Ok(set) = serde_json::from_slice::<MinKSet>(data) {
        assert!(set.add(&set).is_ok());
    }
    if let Ok(list) = serde_json::from_slice::<FreqKList>(data) {
        assert!(list.error_bound() >= 0.0);
    }
});
