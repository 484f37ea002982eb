//! ## Sampled quantiles
//! Rows are sampled at rate `n^2 / data_size` with `n = max(resolution, 100)`,
//! so the expected sample holds `n^2` rows and quantiles are accurate to about
//! `1 / n`. Each partition's sample is sorted by a [`RecordOrder`]; samples are
//! combined with a linear merge of two sorted lists.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::row::{RecordOrder, RowSnapshot};
use crate::sketch::{OpSpec, Remotable, Sketch};
use crate::table::Table;

/// Sample rows sorted by the sketch's record order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleList {
    rows: Vec<RowSnapshot>,
}

impl SampleList {
    pub fn rows(&self) -> &[RowSnapshot] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `resolution - 1` evenly spaced rows splitting the sample into
    /// `resolution` groups of equal size.
    pub fn quantiles(&self, resolution: usize) -> Vec<RowSnapshot> {
        if self.rows.is_empty() || resolution < 2 {
            return Vec::new();
        }
        (1..resolution)
            .map(|i| self.rows[(i * self.rows.len() / resolution).min(self.rows.len() - 1)].clone())
            .collect()
    }

    /// Sampled row at fraction `q` of the order.
    pub fn quantile(&self, q: f64) -> Option<&RowSnapshot> {
        if self.rows.is_empty() {
            return None;
        }
        let index = (q.clamp(0.0, 1.0) * (self.rows.len() - 1) as f64).round() as usize;
        self.rows.get(index)
    }
}

/// Which list each output position of a merge is taken from.
pub(crate) fn merge_order<T>(left: &[T], right: &[T], mut compare: impl FnMut(&T, &T) -> Ordering) -> Vec<bool> {
    let mut order = Vec::with_capacity(left.len() + right.len());
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        if compare(&left[i], &right[j]) != Ordering::Greater {
            order.push(true);
            i += 1;
        } else {
            order.push(false);
            j += 1;
        }
    }
    order.extend(std::iter::repeat(true).take(left.len() - i));
    order.extend(std::iter::repeat(false).take(right.len() - j));
    order
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "crate::serde::SampleQuantileRepr")]
pub struct SampleQuantileSketch {
    pub(crate) order: RecordOrder,
    pub(crate) rate: f64,
    pub(crate) seed: u64,
}

impl SampleQuantileSketch {
    pub fn new(order: RecordOrder, resolution: usize, data_size: u64, seed: u64) -> Result<Self> {
        if order.is_empty() {
            return Err(Error::invalid("order", "record order has no columns"));
        }
        if resolution == 0 {
            return Err(Error::invalid("resolution", "must be positive"));
        }
        let n = resolution.max(100) as f64;
        let rate = if data_size == 0 { 1.0 } else { (n * n / data_size as f64).min(1.0) };
        Ok(Self { order, rate, seed })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl Sketch<Table> for SampleQuantileSketch {
    type Output = SampleList;

    fn zero(&self) -> SampleList {
        SampleList::default()
    }

    fn create(&self, data: &Table) -> Result<SampleList> {
        let columns = self.order.columns(data)?;
        let sample = data.sample(self.rate, self.seed);
        let mut rows: Vec<RowSnapshot> = sample.rows().map(|r| RowSnapshot::from_columns(&columns, r)).collect();
        rows.sort_by(|a, b| self.order.compare(a, b));
        Ok(SampleList { rows })
    }

    fn add(&self, left: &SampleList, right: &SampleList) -> Result<SampleList> {
        let order = merge_order(&left.rows, &right.rows, |a, b| self.order.compare(a, b));
        let (mut l, mut r) = (left.rows.iter(), right.rows.iter());
        let rows = order
            .into_iter()
            .filter_map(|from_left| if from_left { l.next() } else { r.next() })
            .cloned()
            .collect();
        Ok(SampleList { rows })
    }

    fn describe(&self) -> Result<OpSpec> {
        self.spec()
    }
}

impl Remotable for SampleQuantileSketch {
    const NAME: &'static str = "sample_quantile";
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::row::Datum;
    use crate::sketch::add_all;
    use test_case::test_case;

    #[test_case(&[1, 3, 5], &[2, 4] => vec![true, false, true, false, true])]
    #[test_case(&[], &[2, 4] => vec![false, false])]
    #[test_case(&[1, 1], &[1] => vec![true, true, false]; "ties favor the left")]
    fn test_merge_order(left: &[i32], right: &[i32]) -> Vec<bool> {
        merge_order(left, right, |a, b| a.cmp(b))
    }

    fn table() -> Table {
        let values: Vec<i64> = (0..200_000).map(|i| (i * 7_919) % 200_000).collect();
        Table::builder().integers("x", values).build().unwrap()
    }

    #[test_case(1)]
    #[test_case(5)]
    fn test_quantiles_are_partition_invariant(parts: usize) {
        let t = table();
        let order = RecordOrder::new().then("x", true);
        let s = SampleQuantileSketch::new(order, 100, 200_000, 4).unwrap();
        let whole = s.create(&t).unwrap();
        let merged = add_all(&s, t.split(parts).unwrap().iter().map(|p| s.create(p).unwrap())).unwrap();
        assert_eq!(whole, merged);
        assert!(whole.len() > 9_000 && whole.len() < 11_000, "{}", whole.len());
        let deciles = whole.quantiles(10);
        assert_eq!(deciles.len(), 9);
        for (i, d) in deciles.iter().enumerate() {
            let Datum::Integer(v) = d.values()[0] else { panic!("{d}") };
            let expected = (i as i64 + 1) * 20_000;
            assert!((v - expected).abs() < 2_000, "decile {i}: {v}");
        }
    }

    #[test]
    fn test_descending_order() {
        let t = Table::builder().integers("x", 0..100).build().unwrap();
        let s = SampleQuantileSketch::new(RecordOrder::new().then("x", false), 10, 100, 0).unwrap();
        assert_eq!(s.rate(), 1.0);
        let list = s.create(&t).unwrap();
        assert_eq!(list.quantile(0.0), Some(&RowSnapshot::new(vec![Datum::Integer(99)])));
        assert_eq!(list.quantile(1.0), Some(&RowSnapshot::new(vec![Datum::Integer(0)])));
    }

    #[test]
    fn test_invalid() {
        assert!(SampleQuantileSketch::new(RecordOrder::new(), 10, 10, 0).is_err());
        assert!(SampleQuantileSketch::new(RecordOrder::new().then("x", true), 0, 10, 0).is_err());
    }
}
