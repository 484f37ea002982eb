//! # Validated deserialization
//!
//! Results and sketches that carry invariants are deserialized through a plain
//! representation struct and converted with `TryFrom`, so a malformed document
//! received from a remote worker is rejected instead of producing a value that
//! panics later (a register array of the wrong length, a heavy hitter list
//! larger than its counter budget...).
//!
//! Serialization uses the derived field layout, which the representations
//! mirror.
//!
//! Refer to the serde documentation for details on container attributes:
//! - [`try_from`](https://serde.rs/container-attrs.html#from)
use std::collections::BTreeMap;

use serde::Deserialize;

use crate::buckets::{BucketDescriptor, BucketsTrait, EqualWidthBuckets, ExplicitBuckets};
use crate::correlation::{CorrMatrix, CorrelationSketch};
use crate::error::{Error, Result};
use crate::heavy_hitters::{FreqKList, MisraGriesSketch, SampleHeavyHittersSketch, SampledFreq};
use crate::histogram::{Histogram, HistogramSketch};
use crate::hyperloglog::{validate_precision, HllSketch, HyperLogLog};
use crate::min_k::{MinKSet, MinKSketch};
use crate::quantiles::SampleQuantileSketch;
use crate::row::{Datum, RecordOrder, RowSnapshot};
use crate::sampling::{SampleSet, SampleSetSketch};
use crate::table::SampleMap;
use crate::top_k::NextKSketch;

#[derive(Deserialize)]
pub(crate) struct HyperLogLogRepr {
    precision: u8,
    seed: u64,
    registers: Vec<u8>,
}

impl TryFrom<HyperLogLogRepr> for HyperLogLog {
    type Error = Error;

    fn try_from(repr: HyperLogLogRepr) -> Result<Self> {
        validate_precision(repr.precision)?;
        if repr.registers.len() != 1 << repr.precision {
            return Err(Error::invalid(
                "registers",
                format!("expected {} registers, got {}", 1 << repr.precision, repr.registers.len()),
            ));
        }
        let max_rank = 64 - repr.precision + 1;
        if repr.registers.iter().any(|&r| r > max_rank) {
            return Err(Error::invalid("registers", format!("rank above {max_rank}")));
        }
        Ok(HyperLogLog {
            precision: repr.precision,
            seed: repr.seed,
            registers: repr.registers,
        })
    }
}

#[derive(Deserialize)]
pub(crate) struct EqualWidthBucketsRepr {
    min: f64,
    max: f64,
    count: usize,
}

impl TryFrom<EqualWidthBucketsRepr> for EqualWidthBuckets {
    type Error = Error;

    fn try_from(repr: EqualWidthBucketsRepr) -> Result<Self> {
        EqualWidthBuckets::new(repr.min, repr.max, repr.count)
    }
}

#[derive(Deserialize)]
pub(crate) struct ExplicitBucketsRepr<V> {
    left_boundaries: Vec<V>,
    max: Option<V>,
}

impl<V: Ord> TryFrom<ExplicitBucketsRepr<V>> for ExplicitBuckets<V> {
    type Error = Error;

    fn try_from(repr: ExplicitBucketsRepr<V>) -> Result<Self> {
        ExplicitBuckets::new(repr.left_boundaries, repr.max)
    }
}

#[derive(Deserialize)]
pub(crate) struct HllSketchRepr {
    column: String,
    precision: u8,
    seed: u64,
}

impl TryFrom<HllSketchRepr> for HllSketch {
    type Error = Error;

    fn try_from(repr: HllSketchRepr) -> Result<Self> {
        HllSketch::new(repr.column, repr.precision, repr.seed)
    }
}

#[derive(Deserialize)]
pub(crate) struct HistogramSketchRepr {
    column: String,
    descriptor: BucketDescriptor,
    rate: f64,
    seed: u64,
}

impl TryFrom<HistogramSketchRepr> for HistogramSketch {
    type Error = Error;

    fn try_from(repr: HistogramSketchRepr) -> Result<Self> {
        HistogramSketch::new(repr.column, repr.descriptor).sampled(repr.rate, repr.seed)
    }
}

#[derive(Deserialize)]
pub(crate) struct HistogramRepr {
    descriptor: BucketDescriptor,
    buckets: Vec<u64>,
    missing: u64,
    out_of_range: u64,
    rate: f64,
}

impl TryFrom<HistogramRepr> for Histogram {
    type Error = Error;

    fn try_from(repr: HistogramRepr) -> Result<Self> {
        let expected = repr.descriptor.bucket_count();
        if repr.buckets.len() != expected {
            return Err(Error::invalid(
                "buckets",
                format!("expected {expected} buckets, got {}", repr.buckets.len()),
            ));
        }
        if !(repr.rate > 0.0 && repr.rate <= 1.0) {
            return Err(Error::invalid("rate", format!("{} is not in (0, 1]", repr.rate)));
        }
        Ok(Histogram {
            descriptor: repr.descriptor,
            buckets: repr.buckets,
            missing: repr.missing,
            out_of_range: repr.out_of_range,
            rate: repr.rate,
        })
    }
}

#[derive(Deserialize)]
pub(crate) struct MinKSetRepr {
    max_size: usize,
    seed: u64,
    data: BTreeMap<u64, Datum>,
    min: Option<Datum>,
    max: Option<Datum>,
    present: u64,
    missing: u64,
}

impl TryFrom<MinKSetRepr> for MinKSet {
    type Error = Error;

    fn try_from(repr: MinKSetRepr) -> Result<Self> {
        if repr.max_size == 0 {
            return Err(Error::invalid("max_size", "must be positive"));
        }
        if repr.data.len() > repr.max_size || repr.data.len() as u64 > repr.present {
            return Err(Error::invalid(
                "data",
                format!("{} samples exceed the size {} or the present count", repr.data.len(), repr.max_size),
            ));
        }
        if repr.data.iter().any(|(&hash, value)| value.hash64(repr.seed) != hash) {
            return Err(Error::invalid("data", "sample hash does not match its value"));
        }
        if (repr.present > 0) != (repr.min.is_some() && repr.max.is_some()) {
            return Err(Error::invalid("min", "bounds must be present exactly when values are"));
        }
        Ok(MinKSet {
            max_size: repr.max_size,
            seed: repr.seed,
            data: repr.data,
            min: repr.min,
            max: repr.max,
            present: repr.present,
            missing: repr.missing,
        })
    }
}

#[derive(Deserialize)]
pub(crate) struct MinKSketchRepr {
    column: String,
    max_size: usize,
    seed: u64,
}

impl TryFrom<MinKSketchRepr> for MinKSketch {
    type Error = Error;

    fn try_from(repr: MinKSketchRepr) -> Result<Self> {
        MinKSketch::new(repr.column, repr.max_size, repr.seed)
    }
}

#[derive(Deserialize)]
pub(crate) struct SampleSetRepr {
    capacity: usize,
    seed: u64,
    samples: Vec<f64>,
    count: u64,
    missing: u64,
    min: Option<f64>,
    max: Option<f64>,
}

impl TryFrom<SampleSetRepr> for SampleSet {
    type Error = Error;

    fn try_from(repr: SampleSetRepr) -> Result<Self> {
        if repr.capacity == 0 {
            return Err(Error::invalid("capacity", "must be positive"));
        }
        let expected = repr.count.min(repr.capacity as u64);
        if repr.samples.len() as u64 != expected {
            return Err(Error::invalid(
                "samples",
                format!("expected {expected} samples, got {}", repr.samples.len()),
            ));
        }
        if repr.count == 0 && (repr.min.is_some() || repr.max.is_some()) {
            return Err(Error::invalid("min", "bounds without values"));
        }
        Ok(SampleSet {
            capacity: repr.capacity,
            seed: repr.seed,
            samples: repr.samples,
            count: repr.count,
            missing: repr.missing,
            min: repr.min,
            max: repr.max,
        })
    }
}

#[derive(Deserialize)]
pub(crate) struct SampleSetSketchRepr {
    column: String,
    capacity: usize,
    seed: u64,
}

impl TryFrom<SampleSetSketchRepr> for SampleSetSketch {
    type Error = Error;

    fn try_from(repr: SampleSetSketchRepr) -> Result<Self> {
        SampleSetSketch::new(repr.column, repr.capacity, repr.seed)
    }
}

#[derive(Deserialize)]
pub(crate) struct SampleQuantileRepr {
    order: RecordOrder,
    rate: f64,
    seed: u64,
}

impl TryFrom<SampleQuantileRepr> for SampleQuantileSketch {
    type Error = Error;

    fn try_from(repr: SampleQuantileRepr) -> Result<Self> {
        if repr.order.is_empty() {
            return Err(Error::invalid("order", "record order has no columns"));
        }
        if !(repr.rate > 0.0 && repr.rate <= 1.0) {
            return Err(Error::invalid("rate", format!("{} is not in (0, 1]", repr.rate)));
        }
        Ok(SampleQuantileSketch {
            order: repr.order,
            rate: repr.rate,
            seed: repr.seed,
        })
    }
}

#[derive(Deserialize)]
pub(crate) struct NextKRepr {
    order: RecordOrder,
    top_row: Option<RowSnapshot>,
    max_size: usize,
}

impl TryFrom<NextKRepr> for NextKSketch {
    type Error = Error;

    fn try_from(repr: NextKRepr) -> Result<Self> {
        NextKSketch::new(repr.order, repr.top_row, repr.max_size)
    }
}

#[derive(Deserialize)]
pub(crate) struct SampleMapRepr {
    rate: f64,
    seed: u64,
}

impl TryFrom<SampleMapRepr> for SampleMap {
    type Error = Error;

    fn try_from(repr: SampleMapRepr) -> Result<Self> {
        SampleMap::new(repr.rate, repr.seed)
    }
}

#[derive(Deserialize)]
pub(crate) struct FreqKListRepr {
    max_size: usize,
    total_rows: u64,
    counts: Vec<(RowSnapshot, u64)>,
}

impl TryFrom<FreqKListRepr> for FreqKList {
    type Error = Error;

    fn try_from(repr: FreqKListRepr) -> Result<Self> {
        if repr.max_size == 0 {
            return Err(Error::invalid("max_size", "must be positive"));
        }
        if repr.counts.len() > repr.max_size {
            return Err(Error::invalid(
                "counts",
                format!("{} counters exceed the budget of {}", repr.counts.len(), repr.max_size),
            ));
        }
        let reported = repr.counts.iter().try_fold(0u64, |acc, (_, c)| match c {
            0 => None,
            c => acc.checked_add(*c),
        });
        match reported {
            Some(sum) if sum <= repr.total_rows => {}
            _ => return Err(Error::invalid("counts", "counts must be positive and add up to at most total_rows")),
        }
        let sorted = repr
            .counts
            .windows(2)
            .all(|w| w[0].1 > w[1].1 || (w[0].1 == w[1].1 && w[0].0 < w[1].0));
        if !sorted {
            return Err(Error::invalid("counts", "counts must be sorted and unique"));
        }
        Ok(FreqKList {
            max_size: repr.max_size,
            total_rows: repr.total_rows,
            counts: repr.counts,
        })
    }
}

#[derive(Deserialize)]
pub(crate) struct SampledFreqRepr {
    rate: f64,
    total_rows: u64,
    sampled_rows: u64,
    counts: Vec<(RowSnapshot, u64)>,
}

impl TryFrom<SampledFreqRepr> for SampledFreq {
    type Error = Error;

    fn try_from(repr: SampledFreqRepr) -> Result<Self> {
        if !(repr.rate > 0.0 && repr.rate <= 1.0) {
            return Err(Error::invalid("rate", format!("{} is not in (0, 1]", repr.rate)));
        }
        if repr.sampled_rows > repr.total_rows {
            return Err(Error::invalid("sampled_rows", "more rows sampled than seen"));
        }
        let counted = repr.counts.iter().try_fold(0u64, |acc, (_, c)| match c {
            0 => None,
            c => acc.checked_add(*c),
        });
        if counted != Some(repr.sampled_rows) {
            return Err(Error::invalid("counts", "counts must be positive and add up to sampled_rows"));
        }
        let sorted = repr
            .counts
            .windows(2)
            .all(|w| w[0].1 > w[1].1 || (w[0].1 == w[1].1 && w[0].0 < w[1].0));
        if !sorted {
            return Err(Error::invalid("counts", "counts must be sorted and unique"));
        }
        Ok(SampledFreq {
            rate: repr.rate,
            total_rows: repr.total_rows,
            sampled_rows: repr.sampled_rows,
            counts: repr.counts,
        })
    }
}

#[derive(Deserialize)]
pub(crate) struct SampleHeavyHittersRepr {
    columns: Vec<String>,
    epsilon: f64,
    rate: f64,
    seed: u64,
}

impl TryFrom<SampleHeavyHittersRepr> for SampleHeavyHittersSketch {
    type Error = Error;

    fn try_from(repr: SampleHeavyHittersRepr) -> Result<Self> {
        SampleHeavyHittersSketch::with_rate(repr.columns, repr.epsilon, repr.rate, repr.seed)
    }
}

#[derive(Deserialize)]
pub(crate) struct CorrMatrixRepr {
    columns: Vec<String>,
    count: u64,
    incomplete: u64,
    sums: Vec<f64>,
    products: Vec<f64>,
}

impl TryFrom<CorrMatrixRepr> for CorrMatrix {
    type Error = Error;

    fn try_from(repr: CorrMatrixRepr) -> Result<Self> {
        let n = repr.columns.len();
        if repr.sums.len() != n || repr.products.len() != n * n {
            return Err(Error::invalid(
                "products",
                format!("expected {n} sums and {} products", n * n),
            ));
        }
        Ok(CorrMatrix {
            columns: repr.columns,
            count: repr.count,
            incomplete: repr.incomplete,
            sums: repr.sums,
            products: repr.products,
        })
    }
}

#[derive(Deserialize)]
pub(crate) struct CorrelationRepr {
    columns: Vec<String>,
    rate: f64,
    seed: u64,
}

impl TryFrom<CorrelationRepr> for CorrelationSketch {
    type Error = Error;

    fn try_from(repr: CorrelationRepr) -> Result<Self> {
        CorrelationSketch::new(repr.columns, repr.rate, repr.seed)
    }
}

#[derive(Deserialize)]
pub(crate) struct MisraGriesRepr {
    columns: Vec<String>,
    max_size: usize,
}

impl TryFrom<MisraGriesRepr> for MisraGriesSketch {
    type Error = Error;

    fn try_from(repr: MisraGriesRepr) -> Result<Self> {
        MisraGriesSketch::new(repr.columns, repr.max_size)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::sketch::Sketch;
    use crate::table::Table;
    use test_case::test_case;

    #[test_case(0; "empty set")]
    #[test_case(1; "single element")]
    #[test_case(100; "hundred distinct elements")]
    #[test_case(10000; "ten thousand distinct elements")]
    fn test_hll_serde(n: i64) {
        let t = Table::builder().integers("x", 0..n).build().unwrap();
        let original = HllSketch::new("x", 10, 3).unwrap().create(&t).unwrap();
        let serialized = serde_json::to_string(&original).expect("serialization failed");
        let deserialized: HyperLogLog = serde_json::from_str(&serialized).expect("deserialization failed");
        assert_eq!(original, deserialized);
    }

    #[test_case(r#"{"precision":3,"seed":0,"registers":[0,0,0,0,0,0,0,0]}"#; "precision too small")]
    #[test_case(r#"{"precision":4,"seed":0,"registers":[0,0]}"#; "wrong register count")]
    #[test_case(r#"{"precision":4,"seed":0,"registers":[99,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0]}"#; "rank too large")]
    #[test_case("{ invalid_json_string }"; "invalid json")]
    fn test_hll_failed_deserialization(input: &str) {
        assert!(serde_json::from_str::<HyperLogLog>(input).is_err());
    }

    #[test_case(r#"{"max_size":1,"total_rows":5,"counts":[[[{"Integer":1}],2],[[{"Integer":2}],1]]}"#; "over budget")]
    #[test_case(r#"{"max_size":2,"total_rows":2,"counts":[[[{"Integer":1}],3]]}"#; "more than total")]
    #[test_case(r#"{"max_size":2,"total_rows":5,"counts":[[[{"Integer":1}],0]]}"#; "zero count")]
    #[test_case(r#"{"max_size":2,"total_rows":5,"counts":[[[{"Integer":1}],1],[[{"Integer":2}],2]]}"#; "unsorted")]
    fn test_freq_failed_deserialization(input: &str) {
        assert!(serde_json::from_str::<FreqKList>(input).is_err());
    }

    #[test_case(r#"{"rate":0.5,"total_rows":4,"sampled_rows":3,"counts":[[[{"Integer":1}],2]]}"#; "counts short of sample")]
    #[test_case(r#"{"rate":0.5,"total_rows":1,"sampled_rows":2,"counts":[[[{"Integer":1}],2]]}"#; "sample above total")]
    #[test_case(r#"{"rate":1.5,"total_rows":2,"sampled_rows":2,"counts":[[[{"Integer":1}],2]]}"#; "rate above one")]
    fn test_sampled_freq_failed_deserialization(input: &str) {
        assert!(serde_json::from_str::<SampledFreq>(input).is_err());
    }

    #[test]
    fn test_corr_matrix_validated() {
        let input = r#"{"columns":["a","b"],"count":1,"incomplete":0,"sums":[1.0,2.0],"products":[1.0,2.0,2.0]}"#;
        assert!(serde_json::from_str::<CorrMatrix>(input).is_err());
        let input = r#"{"columns":["a","b"],"count":1,"incomplete":0,"sums":[1.0,2.0],"products":[1.0,2.0,2.0,4.0]}"#;
        assert_eq!(serde_json::from_str::<CorrMatrix>(input).unwrap().correlation(0, 1), None);
    }

    #[test]
    fn test_freq_deserialization() {
        let input = r#"{"max_size":2,"total_rows":5,"counts":[[[{"Integer":1}],3],[[{"Integer":2}],1]]}"#;
        let list: FreqKList = serde_json::from_str(input).unwrap();
        assert_eq!(list.total_rows(), 5);
        assert_eq!(list.len(), 2);
    }

    #[test_case(r#"{"column":"x","precision":20,"seed":0}"#)]
    fn test_sketch_params_validated(input: &str) {
        assert!(serde_json::from_str::<HllSketch>(input).is_err());
    }

    #[test_case(r#"{"equal_width":{"min":0.0,"max":1.0,"count":0}}"#; "no buckets")]
    #[test_case(r#"{"equal_width":{"min":2.0,"max":1.0,"count":4}}"#; "inverted range")]
    #[test_case(r#"{"explicit":{"left_boundaries":[2.0,1.0],"max":null}}"#; "unsorted boundaries")]
    #[test_case(r#"{"explicit":{"left_boundaries":[],"max":null}}"#; "empty boundaries")]
    #[test_case(r#"{"strings":{"left_boundaries":["a","c"],"max":"b"}}"#; "max below boundary")]
    fn test_buckets_failed_deserialization(input: &str) {
        assert!(serde_json::from_str::<BucketDescriptor>(input).is_err());
    }

    #[test]
    fn test_invalid_histogram_sketch_rejected_before_running() {
        let input = r#"{"column":"x","descriptor":{"equal_width":{"min":0.0,"max":1.0,"count":0}},"rate":1.0,"seed":0}"#;
        assert!(serde_json::from_str::<HistogramSketch>(input).is_err());
        let valid = HistogramSketch::new("x", BucketDescriptor::explicit(vec![0.0, 5.0], Some(9.0)).unwrap());
        let json = serde_json::to_string(&valid).unwrap();
        assert_eq!(serde_json::from_str::<HistogramSketch>(&json).unwrap(), valid);
    }

    #[test]
    fn test_histogram_result_validated() {
        let t = Table::builder().integers("x", 0..10).build().unwrap();
        let sketch = HistogramSketch::new("x", BucketDescriptor::equal_width(0.0, 9.0, 3).unwrap());
        let histogram = sketch.create(&t).unwrap();
        let mut json = serde_json::to_value(&histogram).unwrap();
        assert_eq!(serde_json::from_value::<Histogram>(json.clone()).unwrap(), histogram);

        json["buckets"] = serde_json::json!([1]);
        assert!(serde_json::from_value::<Histogram>(json.clone()).is_err());
        json["buckets"] = serde_json::json!([1, 2, 3]);
        json["rate"] = serde_json::json!(0.0);
        assert!(serde_json::from_value::<Histogram>(json).is_err());
    }

    #[test]
    fn test_min_k_result_validated() {
        let t = Table::builder().strings("w", ["a", "b", "c", "a"]).build().unwrap();
        let set = MinKSketch::new("w", 2, 9).unwrap().create(&t).unwrap();
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(serde_json::from_value::<MinKSet>(json.clone()).unwrap(), set);

        let mut oversized = json.clone();
        oversized["max_size"] = serde_json::json!(1);
        assert!(serde_json::from_value::<MinKSet>(oversized).is_err());
        let mut reseeded = json.clone();
        reseeded["seed"] = serde_json::json!(10);
        assert!(serde_json::from_value::<MinKSet>(reseeded).is_err());
        let mut unbounded = json;
        unbounded["min"] = serde_json::Value::Null;
        assert!(serde_json::from_value::<MinKSet>(unbounded).is_err());
        assert!(serde_json::from_str::<MinKSketch>(r#"{"column":"w","max_size":0,"seed":0}"#).is_err());
    }

    #[test]
    fn test_sample_set_validated() {
        let t = Table::builder().integers("x", 0..100).build().unwrap();
        let set = SampleSetSketch::new("x", 8, 1).unwrap().create(&t).unwrap();
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(serde_json::from_value::<SampleSet>(json.clone()).unwrap(), set);

        let mut truncated = json.clone();
        truncated["samples"] = serde_json::json!([1.0]);
        assert!(serde_json::from_value::<SampleSet>(truncated).is_err());
        let mut overfull = json;
        overfull["capacity"] = serde_json::json!(4);
        assert!(serde_json::from_value::<SampleSet>(overfull).is_err());
        assert!(serde_json::from_str::<SampleSetSketch>(r#"{"column":"x","capacity":0,"seed":0}"#).is_err());
    }
}
