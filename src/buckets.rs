//! ## Bucket descriptors
//! Map a cell value to a bucket index in `[0..bucket_count)`, or to no bucket
//! when the value falls outside the described range.
//!
//! Supported descriptors:
//! - `EqualWidth`: `count` buckets of equal width over `[min, max]`; `max`
//!   belongs to the last bucket.
//! - `Explicit`: sorted numeric left boundaries with an optional exclusive
//!   upper bound; values at or past the last boundary (and below the upper
//!   bound) land in the last bucket.
//! - `Strings`: the same over string left boundaries, compared
//!   lexicographically.
//!
//! Descriptors are pure; two histograms can only be added when built over
//! equal descriptors.

use std::borrow::Borrow;

use enum_dispatch::enum_dispatch;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::row::Datum;
use crate::table::Column;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[enum_dispatch]
pub enum BucketDescriptor {
    EqualWidth(EqualWidthBuckets),
    Explicit(ExplicitBuckets<OrderedFloat<f64>>),
    Strings(ExplicitBuckets<String>),
}

/// Bucket lookup implemented by every descriptor.
#[enum_dispatch(BucketDescriptor)]
pub trait BucketsTrait {
    fn bucket_count(&self) -> usize;

    /// Bucket of a value; `None` when out of range or of the wrong kind.
    fn index_of(&self, value: &Datum) -> Option<usize>;

    /// Bucket of a present table cell.
    fn index_of_row(&self, column: &Column, row: usize) -> Option<usize> {
        self.index_of(&column.datum(row))
    }
}

impl BucketDescriptor {
    pub fn equal_width(min: f64, max: f64, count: usize) -> Result<Self> {
        Ok(EqualWidthBuckets::new(min, max, count)?.into())
    }

    pub fn explicit(left_boundaries: Vec<f64>, max: Option<f64>) -> Result<Self> {
        if left_boundaries.iter().chain(max.iter()).any(|v| !v.is_finite()) {
            return Err(Error::invalid("boundaries", "must be finite"));
        }
        let boundaries = left_boundaries.into_iter().map(OrderedFloat).collect();
        Ok(ExplicitBuckets::new(boundaries, max.map(OrderedFloat))?.into())
    }

    pub fn strings(left_boundaries: Vec<String>, max: Option<String>) -> Result<Self> {
        Ok(ExplicitBuckets::new(left_boundaries, max)?.into())
    }

    /// Fail when the column kind cannot be bucketed by this descriptor.
    pub fn check_column(&self, column: &Column) -> Result<()> {
        let numeric = !matches!(self, BucketDescriptor::Strings(_));
        if column.kind().is_numeric() == numeric {
            return Ok(());
        }
        Err(Error::ColumnKind {
            column: column.name().to_string(),
            actual: column.kind().to_string(),
            expected: if numeric { "Integer or Double" } else { "String" }.to_string(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "crate::serde::EqualWidthBucketsRepr")]
pub struct EqualWidthBuckets {
    min: f64,
    max: f64,
    count: usize,
}

impl EqualWidthBuckets {
    pub fn new(min: f64, max: f64, count: usize) -> Result<Self> {
        if count == 0 {
            return Err(Error::invalid("count", "bucket count must be positive"));
        }
        if !min.is_finite() || !max.is_finite() {
            return Err(Error::invalid("range", "bounds must be finite"));
        }
        if min > max {
            return Err(Error::invalid("range", format!("min {min} is above max {max}")));
        }
        Ok(Self { min, max, count })
    }

    #[inline]
    pub fn index_of_value(&self, value: f64) -> Option<usize> {
        if value.is_nan() || value < self.min || value > self.max {
            return None;
        }
        if self.max == self.min {
            return Some(0);
        }
        if value >= self.max {
            return Some(self.count - 1);
        }
        let scaled = (value - self.min) * self.count as f64 / (self.max - self.min);
        Some((scaled as usize).min(self.count - 1))
    }

    pub fn left_boundary(&self, index: usize) -> f64 {
        self.min + (self.max - self.min) * index as f64 / self.count as f64
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

impl BucketsTrait for EqualWidthBuckets {
    #[inline]
    fn bucket_count(&self) -> usize {
        self.count
    }

    #[inline]
    fn index_of(&self, value: &Datum) -> Option<usize> {
        self.index_of_value(value.as_f64()?)
    }

    #[inline]
    fn index_of_row(&self, column: &Column, row: usize) -> Option<usize> {
        self.index_of_value(column.as_f64(row)?)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "crate::serde::ExplicitBucketsRepr<V>",
    bound(deserialize = "V: Ord + Deserialize<'de>")
)]
pub struct ExplicitBuckets<V> {
    left_boundaries: Vec<V>,
    max: Option<V>,
}

impl<V: Ord> ExplicitBuckets<V> {
    pub fn new(left_boundaries: Vec<V>, max: Option<V>) -> Result<Self> {
        if left_boundaries.is_empty() {
            return Err(Error::invalid("boundaries", "bucket boundaries cannot be empty"));
        }
        if left_boundaries.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::invalid("boundaries", "boundaries must be strictly increasing"));
        }
        if let (Some(max), Some(last)) = (&max, left_boundaries.last()) {
            if max <= last {
                return Err(Error::invalid("max", "upper bound must exceed the last boundary"));
            }
        }
        Ok(Self {
            left_boundaries,
            max,
        })
    }

    pub fn left_boundaries(&self) -> &[V] {
        &self.left_boundaries
    }

    /// Binary search for the last boundary not above `item`.
    #[inline]
    fn position<Q>(&self, item: &Q) -> Option<usize>
    where
        Q: Ord + ?Sized,
        V: Borrow<Q>,
    {
        let first = self.left_boundaries.first()?;
        if item < first.borrow() {
            return None;
        }
        if let Some(max) = &self.max {
            if item >= max.borrow() {
                return None;
            }
        }
        Some(self.left_boundaries.partition_point(|b| b.borrow() <= item) - 1)
    }
}

impl BucketsTrait for ExplicitBuckets<OrderedFloat<f64>> {
    fn bucket_count(&self) -> usize {
        self.left_boundaries.len()
    }

    fn index_of(&self, value: &Datum) -> Option<usize> {
        self.position(&OrderedFloat(value.as_f64()?))
    }

    fn index_of_row(&self, column: &Column, row: usize) -> Option<usize> {
        self.position(&OrderedFloat(column.as_f64(row)?))
    }
}

impl BucketsTrait for ExplicitBuckets<String> {
    fn bucket_count(&self) -> usize {
        self.left_boundaries.len()
    }

    fn index_of(&self, value: &Datum) -> Option<usize> {
        self.position(value.as_str()?)
    }

    fn index_of_row(&self, column: &Column, row: usize) -> Option<usize> {
        self.position(column.as_str(row)?)
    }
}
