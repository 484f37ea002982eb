//! ## Column statistics
//! Present and missing counts, min, max and the first `moments` normalized
//! moments (`mean(x^i)`) of a numeric column. Moments are running means, so
//! two results merge by weighting each side with its share of present values.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::row::Datum;
use crate::sketch::{OpSpec, Remotable, Sketch};
use crate::table::Table;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BasicColStats {
    present: u64,
    missing: u64,
    min: Option<Datum>,
    max: Option<Datum>,
    moments: Vec<f64>,
}

impl BasicColStats {
    pub fn empty(moments: usize) -> Self {
        Self {
            present: 0,
            missing: 0,
            min: None,
            max: None,
            moments: vec![0.0; moments],
        }
    }

    pub fn present(&self) -> u64 {
        self.present
    }

    pub fn missing(&self) -> u64 {
        self.missing
    }

    pub fn row_count(&self) -> u64 {
        self.present + self.missing
    }

    pub fn min(&self) -> Option<&Datum> {
        self.min.as_ref()
    }

    pub fn max(&self) -> Option<&Datum> {
        self.max.as_ref()
    }

    /// The `i`-th moment, numbered from 1.
    pub fn moment(&self, i: usize) -> Option<f64> {
        i.checked_sub(1).and_then(|i| self.moments.get(i)).copied()
    }

    pub fn mean(&self) -> Option<f64> {
        self.moment(1).filter(|_| self.present > 0)
    }

    pub fn variance(&self) -> Option<f64> {
        let mean = self.mean()?;
        Some(self.moment(2)? - mean * mean)
    }

    #[inline]
    fn push(&mut self, datum: Datum, value: f64) {
        if self.min.as_ref().map_or(true, |m| datum < *m) {
            self.min = Some(datum.clone());
        }
        if self.max.as_ref().map_or(true, |m| datum > *m) {
            self.max = Some(datum);
        }
        let alpha = self.present as f64 / (self.present + 1) as f64;
        let beta = 1.0 - alpha;
        let mut power = 1.0;
        for m in self.moments.iter_mut() {
            power *= value;
            *m = alpha * *m + beta * power;
        }
        self.present += 1;
    }

    pub fn add(&self, other: &BasicColStats) -> Result<BasicColStats> {
        if self.moments.len() != other.moments.len() {
            return Err(Error::IncompatibleResults(format!(
                "statistics with {} and {} moments",
                self.moments.len(),
                other.moments.len()
            )));
        }
        let present = self.present + other.present;
        let alpha = if present == 0 { 0.0 } else { self.present as f64 / present as f64 };
        let beta = 1.0 - alpha;
        Ok(BasicColStats {
            present,
            missing: self.missing + other.missing,
            min: match (&self.min, &other.min) {
                (Some(a), Some(b)) => Some(a.min(b).clone()),
                (a, b) => a.clone().or_else(|| b.clone()),
            },
            max: match (&self.max, &other.max) {
                (Some(a), Some(b)) => Some(a.max(b).clone()),
                (a, b) => a.clone().or_else(|| b.clone()),
            },
            moments: self
                .moments
                .iter()
                .zip(&other.moments)
                .map(|(l, r)| alpha * l + beta * r)
                .collect(),
        })
    }
}

/// [`BasicColStats`] of a numeric column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicColStatSketch {
    column: String,
    moments: usize,
}

impl BasicColStatSketch {
    pub fn new(column: impl Into<String>, moments: usize) -> Self {
        Self {
            column: column.into(),
            moments,
        }
    }
}

impl Sketch<Table> for BasicColStatSketch {
    type Output = BasicColStats;

    fn zero(&self) -> BasicColStats {
        BasicColStats::empty(self.moments)
    }

    fn create(&self, data: &Table) -> Result<BasicColStats> {
        let column = data.column(&self.column)?;
        column.expect_numeric()?;
        let mut stats = self.zero();
        for row in data.rows() {
            match column.as_f64(row) {
                Some(value) => stats.push(column.datum(row), value),
                None => stats.missing += 1,
            }
        }
        Ok(stats)
    }

    fn add(&self, left: &BasicColStats, right: &BasicColStats) -> Result<BasicColStats> {
        left.add(right)
    }

    fn describe(&self) -> Result<OpSpec> {
        self.spec()
    }
}

impl Remotable for BasicColStatSketch {
    const NAME: &'static str = "basic_col_stats";
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::sketch::add_all;
    use crate::table::Column;
    use test_case::test_case;

    #[test]
    fn test_moments() {
        let t = Table::builder()
            .column(Column::doubles("x", vec![Some(1.0), Some(2.0), None, Some(3.0), Some(6.0)]))
            .build()
            .unwrap();
        let stats = BasicColStatSketch::new("x", 2).create(&t).unwrap();
        assert_eq!((stats.present(), stats.missing(), stats.row_count()), (4, 1, 5));
        assert_eq!(stats.min(), Some(&Datum::from(1.0)));
        assert_eq!(stats.max(), Some(&Datum::from(6.0)));
        assert!((stats.mean().unwrap() - 3.0).abs() < 1e-12);
        assert!((stats.moment(2).unwrap() - 12.5).abs() < 1e-12);
        assert!((stats.variance().unwrap() - 3.5).abs() < 1e-12);
        assert_eq!(stats.moment(0), None);
        assert_eq!(stats.moment(3), None);
    }

    #[test_case(1)]
    #[test_case(4)]
    #[test_case(13)]
    fn test_partition_invariance(parts: usize) {
        let t = Table::builder().integers("x", (0..10_000).map(|i| (i * 37) % 1_001)).build().unwrap();
        let s = BasicColStatSketch::new("x", 3);
        let whole = s.create(&t).unwrap();
        let merged = add_all(&s, t.split(parts).unwrap().iter().map(|p| s.create(p).unwrap())).unwrap();
        assert_eq!((merged.present(), merged.min(), merged.max()), (whole.present(), whole.min(), whole.max()));
        for i in 1..=3 {
            let (a, b) = (whole.moment(i).unwrap(), merged.moment(i).unwrap());
            assert!(((a - b) / a).abs() < 1e-9, "moment {i}: {a} vs {b}");
        }
    }

    #[test]
    fn test_zero_and_mismatch() {
        let s = BasicColStatSketch::new("x", 2);
        let t = Table::builder().integers("x", [4, 8]).build().unwrap();
        let stats = s.create(&t).unwrap();
        assert_eq!(s.add(&s.zero(), &stats).unwrap(), stats);
        assert_eq!(s.add(&stats, &s.zero()).unwrap(), stats);
        assert!(stats.add(&BasicColStats::empty(3)).is_err());
        assert_eq!(s.zero().mean(), None);
    }
}
