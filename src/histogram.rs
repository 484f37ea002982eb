//! ## Histogram
//! Bucket counts of one column plus separate counters for missing and
//! out-of-range cells, so that `sum(buckets) + missing + out_of_range` always
//! equals the number of rows scanned.
//!
//! With a sampling rate below 1, rows are kept by a seeded per-row decision
//! that only depends on the global row index; the raw counts stay exact
//! integers and [`Histogram::estimated_buckets`] rescales them by `1 / rate`.

use serde::{Deserialize, Serialize};

use crate::buckets::{BucketDescriptor, BucketsTrait};
use crate::error::{Error, Result};
use crate::sketch::{OpSpec, Remotable, Sketch};
use crate::table::{keep_row, Table};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "crate::serde::HistogramRepr")]
pub struct Histogram {
    pub(crate) descriptor: BucketDescriptor,
    pub(crate) buckets: Vec<u64>,
    pub(crate) missing: u64,
    pub(crate) out_of_range: u64,
    pub(crate) rate: f64,
}

impl Histogram {
    pub fn empty(descriptor: BucketDescriptor, rate: f64) -> Self {
        Self {
            buckets: vec![0; descriptor.bucket_count()],
            descriptor,
            missing: 0,
            out_of_range: 0,
            rate,
        }
    }

    pub fn descriptor(&self) -> &BucketDescriptor {
        &self.descriptor
    }

    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }

    pub fn missing(&self) -> u64 {
        self.missing
    }

    pub fn out_of_range(&self) -> u64 {
        self.out_of_range
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Rows that went through the histogram, after sampling.
    pub fn rows_scanned(&self) -> u64 {
        self.buckets.iter().sum::<u64>() + self.missing + self.out_of_range
    }

    /// Bucket counts scaled back to the full population.
    pub fn estimated_buckets(&self) -> Vec<f64> {
        self.buckets.iter().map(|&c| c as f64 / self.rate).collect()
    }

    /// Running totals of the bucket counts.
    pub fn cdf(&self) -> Vec<u64> {
        self.buckets
            .iter()
            .scan(0, |acc, &c| {
                *acc += c;
                Some(*acc)
            })
            .collect()
    }

    pub fn add(&self, other: &Histogram) -> Result<Histogram> {
        if self.descriptor != other.descriptor || self.buckets.len() != other.buckets.len() {
            return Err(Error::BucketsMismatch);
        }
        if self.rate != other.rate {
            return Err(Error::IncompatibleResults(format!(
                "histograms sampled at rates {} and {}",
                self.rate, other.rate
            )));
        }
        Ok(Histogram {
            descriptor: self.descriptor.clone(),
            buckets: self
                .buckets
                .iter()
                .zip(&other.buckets)
                .map(|(a, b)| a + b)
                .collect(),
            missing: self.missing + other.missing,
            out_of_range: self.out_of_range + other.out_of_range,
            rate: self.rate,
        })
    }
}

/// Histogram of one column over a bucket descriptor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "crate::serde::HistogramSketchRepr")]
pub struct HistogramSketch {
    pub(crate) column: String,
    pub(crate) descriptor: BucketDescriptor,
    pub(crate) rate: f64,
    pub(crate) seed: u64,
}

impl HistogramSketch {
    pub fn new(column: impl Into<String>, descriptor: BucketDescriptor) -> Self {
        Self {
            column: column.into(),
            descriptor,
            rate: 1.0,
            seed: 0,
        }
    }

    /// Scan only a seeded Bernoulli sample of the rows.
    pub fn sampled(mut self, rate: f64, seed: u64) -> Result<Self> {
        if !(rate > 0.0 && rate <= 1.0) {
            return Err(Error::invalid("rate", format!("{rate} is not in (0, 1]")));
        }
        self.rate = rate;
        self.seed = seed;
        Ok(self)
    }
}

impl Sketch<Table> for HistogramSketch {
    type Output = Histogram;

    fn zero(&self) -> Histogram {
        Histogram::empty(self.descriptor.clone(), self.rate)
    }

    fn create(&self, data: &Table) -> Result<Histogram> {
        let column = data.column(&self.column)?;
        self.descriptor.check_column(column)?;
        let mut result = self.zero();
        for row in data.rows() {
            if self.rate < 1.0 && !keep_row(row, self.rate, self.seed) {
                continue;
            }
            if column.is_missing(row) {
                result.missing += 1;
                continue;
            }
            match self.descriptor.index_of_row(column, row) {
                Some(index) => result.buckets[index] += 1,
                None => result.out_of_range += 1,
            }
        }
        Ok(result)
    }

    fn add(&self, left: &Histogram, right: &Histogram) -> Result<Histogram> {
        left.add(right)
    }

    fn describe(&self) -> Result<OpSpec> {
        self.spec()
    }
}

impl Remotable for HistogramSketch {
    const NAME: &'static str = "histogram";
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::sketch::add_all;
    use crate::table::Column;
    use test_case::test_case;

    fn table() -> Table {
        Table::builder()
            .column(Column::doubles(
                "x",
                vec![Some(0.0), Some(1.5), None, Some(9.0), Some(10.0), Some(12.0), Some(f64::NAN)],
            ))
            .build()
            .unwrap()
    }

    fn sketch() -> HistogramSketch {
        HistogramSketch::new("x", BucketDescriptor::equal_width(0.0, 10.0, 5).unwrap())
    }

    #[test]
    fn test_counts() {
        let h = sketch().create(&table()).unwrap();
        assert_eq!(h.buckets(), &[2, 0, 0, 0, 2][..]);
        assert_eq!(h.missing(), 2);
        assert_eq!(h.out_of_range(), 1);
        assert_eq!(h.rows_scanned(), 7);
        assert_eq!(h.cdf(), vec![2, 2, 2, 2, 4]);
    }

    #[test_case(1)]
    #[test_case(2)]
    #[test_case(3)]
    #[test_case(7)]
    fn test_partition_invariance(parts: usize) {
        let t = table();
        let s = sketch();
        let whole = s.create(&t).unwrap();
        let merged = add_all(&s, t.split(parts).unwrap().iter().map(|p| s.create(p).unwrap())).unwrap();
        assert_eq!(whole, merged);
    }

    #[test]
    fn test_zero_is_identity() {
        let s = sketch();
        let h = s.create(&table()).unwrap();
        assert_eq!(s.add(&s.zero(), &h).unwrap(), h);
        assert_eq!(s.add(&h, &s.zero()).unwrap(), h);
    }

    #[test]
    fn test_mismatched_descriptors() {
        let other = HistogramSketch::new("x", BucketDescriptor::equal_width(0.0, 10.0, 4).unwrap());
        let result = sketch().zero().add(&other.zero());
        assert_eq!(result, Err(Error::BucketsMismatch));
    }

    #[test]
    fn test_bucket_count_mismatch() {
        let s = sketch();
        let full = s.create(&table()).unwrap();
        let mut short = full.clone();
        short.buckets.truncate(1);
        assert_eq!(full.add(&short), Err(Error::BucketsMismatch));
        assert_eq!(short.add(&full), Err(Error::BucketsMismatch));
    }

    #[test]
    fn test_sampled_rescale() {
        let t = Table::builder().integers("x", 0..100_000).build().unwrap();
        let s = HistogramSketch::new("x", BucketDescriptor::equal_width(0.0, 100_000.0, 4).unwrap())
            .sampled(0.1, 17)
            .unwrap();
        let h = s.create(&t).unwrap();
        assert!(h.rows_scanned() < 12_000 && h.rows_scanned() > 8_000);
        for estimate in h.estimated_buckets() {
            assert!((estimate - 25_000.0).abs() < 2_500.0, "{estimate}");
        }
        assert_eq!(s.create(&t).unwrap(), h);
    }

    #[test_case(0.0)]
    #[test_case(1.5)]
    #[test_case(f64::NAN)]
    fn test_invalid_rate(rate: f64) {
        assert!(sketch().sampled(rate, 0).is_err());
    }

    #[test]
    fn test_describe_roundtrip() {
        let s = sketch().sampled(0.5, 3).unwrap();
        let spec = s.describe().unwrap();
        assert_eq!(spec.name, "histogram");
        assert_eq!(spec.decode::<HistogramSketch>().unwrap(), s);
    }

    #[test]
    fn test_wrong_column_kind() {
        let t = Table::builder().strings("x", ["a", "b"]).build().unwrap();
        assert!(matches!(sketch().create(&t), Err(Error::ColumnKind { .. })));
    }
}
