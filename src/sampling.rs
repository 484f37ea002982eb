//! ## Reservoir sampling
//! [`SampleSet`] holds a uniform sample of the numeric values of a column
//! together with exact count, missing count, min and max.
//!
//! A partition is sampled with Algorithm L: instead of drawing a random number
//! per row, the [`Reservoir`] draws how many rows to skip before the next
//! replacement, carrying `(next, w)` across rows of the scan. Randomness comes
//! from a `ChaCha8Rng` seeded by the sketch seed and the partition's first
//! row, so repeated scans of the same partitioning give identical samples.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sketch::{OpSpec, Remotable, Sketch};
use crate::table::Table;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "crate::serde::SampleSetRepr")]
pub struct SampleSet {
    pub(crate) capacity: usize,
    pub(crate) seed: u64,
    /// First `min(count, capacity)` values sampled uniformly.
    pub(crate) samples: Vec<f64>,
    pub(crate) count: u64,
    pub(crate) missing: u64,
    pub(crate) min: Option<f64>,
    pub(crate) max: Option<f64>,
}

impl SampleSet {
    pub fn empty(capacity: usize, seed: u64) -> Self {
        Self {
            capacity,
            seed,
            samples: Vec::new(),
            count: 0,
            missing: 0,
            min: None,
            max: None,
        }
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Number of non-missing values seen.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn missing(&self) -> u64 {
        self.missing
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    /// `expected` empirical quantiles, evenly spaced and skipping the 0-th.
    ///
    /// With fewer values than `expected`, every sample is returned sorted.
    pub fn quantiles(&self, expected: usize) -> Vec<f64> {
        let mut sorted = self.samples.clone();
        sorted.sort_unstable_by(f64::total_cmp);
        if sorted.len() <= expected {
            return sorted;
        }
        (1..=expected)
            .map(|i| sorted[(i * sorted.len() / (expected + 1)).min(sorted.len() - 1)])
            .collect()
    }

    fn observe(&mut self, value: f64) {
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        self.count += 1;
    }

    /// Combine two sample sets.
    ///
    /// While one side is not full its values are streamed into the other as
    /// the continuation of that reservoir; when both are full each slot is
    /// taken from either side with probability proportional to its count.
    pub fn add(&self, other: &SampleSet) -> Result<SampleSet> {
        if self.capacity != other.capacity || self.seed != other.seed {
            return Err(Error::IncompatibleResults(format!(
                "sample sets with capacity {} seed {} and capacity {} seed {}",
                self.capacity, self.seed, other.capacity, other.seed
            )));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ self.count.rotate_left(32) ^ other.count);
        let samples = if !self.is_full() {
            stream_into(&mut rng, self.capacity, other, &self.samples)
        } else if !other.is_full() {
            stream_into(&mut rng, self.capacity, self, &other.samples)
        } else {
            let p = self.count as f64 / (self.count + other.count) as f64;
            self.samples
                .iter()
                .zip(&other.samples)
                .map(|(&l, &r)| if rng.gen::<f64>() < p { l } else { r })
                .collect()
        };
        Ok(SampleSet {
            capacity: self.capacity,
            seed: self.seed,
            samples,
            count: self.count + other.count,
            missing: self.missing + other.missing,
            min: merge_bound(self.min, other.min, f64::min),
            max: merge_bound(self.max, other.max, f64::max),
        })
    }
}

fn merge_bound(a: Option<f64>, b: Option<f64>, pick: fn(f64, f64) -> f64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(pick(a, b)),
        (a, b) => a.or(b),
    }
}

/// Continue `big`'s reservoir with the values of a non-full `small` sample.
fn stream_into(rng: &mut ChaCha8Rng, capacity: usize, big: &SampleSet, small: &[f64]) -> Vec<f64> {
    let mut dest = big.samples.clone();
    let mut seen = big.count;
    for &value in small {
        seen += 1;
        if dest.len() < capacity {
            dest.push(value);
        } else {
            let index = rng.gen_range(0..seen);
            if let Some(slot) = dest.get_mut(index as usize) {
                *slot = value;
            }
        }
    }
    dest
}

/// Algorithm L sampling state for one scan.
pub(crate) struct Reservoir {
    capacity: usize,
    rng: ChaCha8Rng,
    /// Values seen so far.
    seen: u64,
    /// Index of the next value that replaces a slot.
    next: u64,
    w: f64,
}

impl Reservoir {
    pub(crate) fn new(capacity: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let w = (rng.gen::<f64>().ln() / capacity as f64).exp();
        let mut reservoir = Self {
            capacity,
            rng,
            seen: 0,
            next: capacity as u64,
            w,
        };
        reservoir.advance();
        reservoir
    }

    fn advance(&mut self) {
        let u: f64 = self.rng.gen();
        let skip = (u.ln() / (1.0 - self.w).ln()).floor();
        self.next += if skip.is_finite() { skip as u64 } else { u64::MAX / 2 };
        self.next += 1;
        self.w *= (self.rng.gen::<f64>().ln() / self.capacity as f64).exp();
    }

    /// Slot for the next value, if it is sampled.
    #[inline]
    pub(crate) fn sample_index(&mut self) -> Option<usize> {
        let index = self.seen;
        self.seen += 1;
        if index < self.capacity as u64 {
            return Some(index as usize);
        }
        if index + 1 < self.next {
            return None;
        }
        let slot = self.rng.gen_range(0..self.capacity);
        self.advance();
        Some(slot)
    }
}

/// Uniform sample of the numeric values of one column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "crate::serde::SampleSetSketchRepr")]
pub struct SampleSetSketch {
    column: String,
    capacity: usize,
    seed: u64,
}

impl SampleSetSketch {
    pub fn new(column: impl Into<String>, capacity: usize, seed: u64) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid("capacity", "must be positive"));
        }
        Ok(Self {
            column: column.into(),
            capacity,
            seed,
        })
    }
}

impl Sketch<Table> for SampleSetSketch {
    type Output = SampleSet;

    fn zero(&self) -> SampleSet {
        SampleSet::empty(self.capacity, self.seed)
    }

    fn create(&self, data: &Table) -> Result<SampleSet> {
        let column = data.column(&self.column)?;
        column.expect_numeric()?;
        let first_row = data.rows().next().unwrap_or(0) as u64;
        let mut reservoir = Reservoir::new(self.capacity, self.seed ^ first_row);
        let mut result = self.zero();
        for row in data.rows() {
            let Some(value) = column.as_f64(row) else {
                result.missing += 1;
                continue;
            };
            result.observe(value);
            match reservoir.sample_index() {
                Some(i) if i < result.samples.len() => result.samples[i] = value,
                Some(_) => result.samples.push(value),
                None => {}
            }
        }
        Ok(result)
    }

    fn add(&self, left: &SampleSet, right: &SampleSet) -> Result<SampleSet> {
        left.add(right)
    }

    fn describe(&self) -> Result<OpSpec> {
        self.spec()
    }
}

impl Remotable for SampleSetSketch {
    const NAME: &'static str = "sample_set";
}
