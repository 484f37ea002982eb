//! ## Bottom-k sampling
//! Keeps the `K` distinct values of a column whose seeded hashes are the
//! smallest, a uniform sample of the distinct values that merges exactly: the
//! `K` smallest hashes of a union are the `K` smallest of the two bottom-k
//! sets. Exact present/missing counts and min/max are kept alongside.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::buckets::BucketDescriptor;
use crate::error::{Error, Result};
use crate::row::Datum;
use crate::sketch::{OpSpec, Remotable, Sketch};
use crate::table::Table;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "crate::serde::MinKSetRepr")]
pub struct MinKSet {
    pub(crate) max_size: usize,
    pub(crate) seed: u64,
    /// Hash to sampled value, at most `max_size` entries.
    pub(crate) data: BTreeMap<u64, Datum>,
    pub(crate) min: Option<Datum>,
    pub(crate) max: Option<Datum>,
    pub(crate) present: u64,
    pub(crate) missing: u64,
}

impl MinKSet {
    pub fn empty(max_size: usize, seed: u64) -> Self {
        Self {
            max_size,
            seed,
            data: BTreeMap::new(),
            min: None,
            max: None,
            present: 0,
            missing: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn present(&self) -> u64 {
        self.present
    }

    pub fn missing(&self) -> u64 {
        self.missing
    }

    pub fn min(&self) -> Option<&Datum> {
        self.min.as_ref()
    }

    pub fn max(&self) -> Option<&Datum> {
        self.max.as_ref()
    }

    /// Sampled values in ascending order.
    pub fn samples(&self) -> Vec<Datum> {
        let mut samples: Vec<Datum> = self.data.values().cloned().collect();
        samples.sort_unstable();
        samples
    }

    /// True when the sample holds every distinct value and there are at
    /// most `buckets` of them.
    pub fn all_values_known(&self, buckets: usize) -> bool {
        self.data.len() < self.max_size && self.data.len() <= buckets
    }

    /// Distinct value estimate from the `K`-th smallest hash.
    pub fn estimated_distinct(&self) -> f64 {
        if self.data.len() < self.max_size {
            return self.data.len() as f64;
        }
        match self.data.keys().next_back() {
            Some(&kth) => (self.max_size as f64 - 1.0) * 18_446_744_073_709_551_616.0 / (kth as f64 + 1.0),
            None => 0.0,
        }
    }

    /// At most `max_buckets` distinct, equally spaced left boundaries over
    /// the sample, starting at the minimum.
    pub fn left_boundaries(&self, max_buckets: usize) -> Vec<Datum> {
        let Some(min) = &self.min else {
            return Vec::new();
        };
        let mut samples = self.samples();
        if samples.first() != Some(min) {
            samples.insert(0, min.clone());
        }
        if samples.len() <= max_buckets {
            return samples;
        }
        (0..max_buckets)
            .map(|i| samples[i * samples.len() / max_buckets].clone())
            .collect()
    }

    /// String bucket descriptor over [`MinKSet::left_boundaries`].
    pub fn string_buckets(&self, max_buckets: usize) -> Result<BucketDescriptor> {
        let boundaries = self
            .left_boundaries(max_buckets)
            .into_iter()
            .map(|d| match d {
                Datum::String(s) => Ok(s),
                other => Err(Error::invalid("boundaries", format!("{other} is not a string"))),
            })
            .collect::<Result<Vec<_>>>()?;
        BucketDescriptor::strings(boundaries, None)
    }

    #[inline]
    fn insert(&mut self, hash: u64, value: Datum) {
        if self.data.len() >= self.max_size {
            match self.data.keys().next_back() {
                Some(&largest) if hash < largest => {}
                _ => return,
            }
        }
        self.data.insert(hash, value);
        if self.data.len() > self.max_size {
            self.data.pop_last();
        }
    }

    pub fn add(&self, other: &MinKSet) -> Result<MinKSet> {
        if self.max_size != other.max_size || self.seed != other.seed {
            return Err(Error::IncompatibleResults(format!(
                "bottom-k sets with size {} seed {} and size {} seed {}",
                self.max_size, self.seed, other.max_size, other.seed
            )));
        }
        let mut result = self.clone();
        for (&hash, value) in &other.data {
            result.insert(hash, value.clone());
        }
        result.min = min_of(self.min.as_ref(), other.min.as_ref());
        result.max = max_of(self.max.as_ref(), other.max.as_ref());
        result.present += other.present;
        result.missing += other.missing;
        Ok(result)
    }
}

fn min_of(a: Option<&Datum>, b: Option<&Datum>) -> Option<Datum> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b).clone()),
        (a, b) => a.or(b).cloned(),
    }
}

fn max_of(a: Option<&Datum>, b: Option<&Datum>) -> Option<Datum> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b).clone()),
        (a, b) => a.or(b).cloned(),
    }
}

/// Bottom-k sample of the distinct values of one column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "crate::serde::MinKSketchRepr")]
pub struct MinKSketch {
    column: String,
    max_size: usize,
    seed: u64,
}

impl MinKSketch {
    pub fn new(column: impl Into<String>, max_size: usize, seed: u64) -> Result<Self> {
        if max_size == 0 {
            return Err(Error::invalid("max_size", "must be positive"));
        }
        Ok(Self {
            column: column.into(),
            max_size,
            seed,
        })
    }
}

impl Sketch<Table> for MinKSketch {
    type Output = MinKSet;

    fn zero(&self) -> MinKSet {
        MinKSet::empty(self.max_size, self.seed)
    }

    fn create(&self, data: &Table) -> Result<MinKSet> {
        let column = data.column(&self.column)?;
        let mut result = self.zero();
        for row in data.rows() {
            let value = column.datum(row);
            if value.is_missing() {
                result.missing += 1;
                continue;
            }
            result.present += 1;
            if result.min.as_ref().map_or(true, |m| &value < m) {
                result.min = Some(value.clone());
            }
            if result.max.as_ref().map_or(true, |m| &value > m) {
                result.max = Some(value.clone());
            }
            let hash = value.hash64(self.seed);
            result.insert(hash, value);
        }
        Ok(result)
    }

    fn add(&self, left: &MinKSet, right: &MinKSet) -> Result<MinKSet> {
        left.add(right)
    }

    fn describe(&self) -> Result<OpSpec> {
        self.spec()
    }
}

impl Remotable for MinKSketch {
    const NAME: &'static str = "min_k";
}
