//! ## Heavy hitters
//! Mergeable Misra–Gries counting over row signatures.
//!
//! A [`FreqKList`] keeps at most `K` counters. Any row whose true frequency
//! exceeds `total_rows / (K + 1)` is guaranteed to be present, and every
//! reported count undercounts the truth by at most [`FreqKList::error_bound`].
//! [`ExactFreqSketch`] re-counts a candidate set exactly in a second pass.
//!
//! [`SampleHeavyHittersSketch`] is the sampling alternative: it counts every
//! distinct row of a seeded Bernoulli sample exactly, with a rate chosen so
//! that shares above `epsilon` are resolved with high probability.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::row::RowSnapshot;
use crate::sketch::{OpSpec, Remotable, Sketch};
use crate::table::{keep_row, Column, Table};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "crate::serde::FreqKListRepr")]
pub struct FreqKList {
    pub(crate) max_size: usize,
    pub(crate) total_rows: u64,
    /// Sorted by descending count, then ascending row.
    pub(crate) counts: Vec<(RowSnapshot, u64)>,
}

impl FreqKList {
    pub fn empty(max_size: usize) -> Self {
        Self {
            max_size,
            total_rows: 0,
            counts: Vec::new(),
        }
    }

    fn from_map(max_size: usize, total_rows: u64, map: HashMap<RowSnapshot, u64>) -> Self {
        let mut counts: Vec<_> = map.into_iter().filter(|(_, c)| *c > 0).collect();
        sort_counts(&mut counts);
        Self {
            max_size,
            total_rows,
            counts,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    pub fn counts(&self) -> &[(RowSnapshot, u64)] {
        &self.counts
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn get(&self, row: &RowSnapshot) -> Option<u64> {
        self.counts.iter().find(|(r, _)| r == row).map(|(_, c)| *c)
    }

    /// Upper bound on how much any reported count undercounts the truth.
    pub fn error_bound(&self) -> f64 {
        let reported: u64 = self.counts.iter().map(|(_, c)| c).sum();
        self.total_rows.saturating_sub(reported) as f64 / (self.max_size as f64 + 1.0)
    }

    /// Rows that may occur in more than `epsilon * total_rows` rows.
    ///
    /// Every true heavy hitter is included; false positives are possible and
    /// can be removed with an [`ExactFreqSketch`] pass.
    pub fn heavy_hitters(&self, epsilon: f64) -> Vec<(RowSnapshot, u64)> {
        let threshold = epsilon * self.total_rows as f64 - self.error_bound();
        self.counts
            .iter()
            .filter(|(_, c)| *c as f64 >= threshold)
            .cloned()
            .collect()
    }

    /// Merge by summing shared counters and, above `K` entries, subtracting
    /// the `(K + 1)`-th largest count from every survivor.
    pub fn add(&self, other: &FreqKList) -> Result<FreqKList> {
        if self.max_size != other.max_size {
            return Err(Error::IncompatibleResults(format!(
                "heavy hitter lists with {} and {} counters",
                self.max_size, other.max_size
            )));
        }
        let mut merged: HashMap<RowSnapshot, u64> = HashMap::with_capacity(self.counts.len() + other.counts.len());
        for (row, count) in self.counts.iter().chain(&other.counts) {
            *merged.entry(row.clone()).or_default() += count;
        }
        let mut counts: Vec<_> = merged.into_iter().collect();
        sort_counts(&mut counts);
        if counts.len() > self.max_size {
            let cutoff = counts[self.max_size].1;
            counts.truncate(self.max_size);
            counts.retain_mut(|(_, c)| {
                *c -= cutoff;
                *c > 0
            });
        }
        Ok(FreqKList {
            max_size: self.max_size,
            total_rows: self.total_rows + other.total_rows,
            counts,
        })
    }
}

fn sort_counts(counts: &mut [(RowSnapshot, u64)]) {
    counts.sort_unstable_by(|(ra, ca), (rb, cb)| cb.cmp(ca).then_with(|| ra.cmp(rb)));
}

fn resolve<'t>(table: &'t Table, names: &[String]) -> Result<Vec<&'t Column>> {
    if names.is_empty() {
        return Err(Error::invalid("columns", "at least one column is required"));
    }
    names.iter().map(|n| table.column(n)).collect()
}

/// Bounded counter table with batched decrements.
///
/// Stored values are offset by `pending`: the effective count of an entry is
/// `stored - pending`.
struct Counters {
    max_size: usize,
    map: HashMap<RowSnapshot, u64>,
    pending: u64,
    min_stored: u64,
}

impl Counters {
    fn new(max_size: usize) -> Self {
        Self {
            max_size,
            map: HashMap::with_capacity(max_size),
            pending: 0,
            min_stored: 0,
        }
    }

    #[inline]
    fn push(&mut self, row: RowSnapshot) {
        if let Some(count) = self.map.get_mut(&row) {
            *count += 1;
            return;
        }
        if self.map.len() < self.max_size {
            self.map.insert(row, self.pending + 1);
            self.min_stored = self.min_stored.min(self.pending + 1);
            return;
        }
        self.pending += 1;
        if self.pending >= self.min_stored {
            self.apply();
        }
    }

    fn apply(&mut self) {
        let pending = self.pending;
        self.map.retain(|_, c| *c > pending);
        let mut min = u64::MAX;
        for c in self.map.values_mut() {
            *c -= pending;
            min = min.min(*c);
        }
        self.pending = 0;
        self.min_stored = if self.map.len() < self.max_size { 0 } else { min };
    }

    fn finish(mut self, total_rows: u64) -> FreqKList {
        self.apply();
        FreqKList::from_map(self.max_size, total_rows, self.map)
    }
}

/// Misra–Gries heavy hitters over the values of a list of columns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "crate::serde::MisraGriesRepr")]
pub struct MisraGriesSketch {
    pub(crate) columns: Vec<String>,
    pub(crate) max_size: usize,
}

impl MisraGriesSketch {
    pub fn new(columns: Vec<String>, max_size: usize) -> Result<Self> {
        if columns.is_empty() {
            return Err(Error::invalid("columns", "at least one column is required"));
        }
        if max_size == 0 {
            return Err(Error::invalid("max_size", "must be positive"));
        }
        Ok(Self { columns, max_size })
    }

    /// Enough counters to find every row above an `epsilon` share of the rows.
    pub fn with_epsilon(columns: Vec<String>, epsilon: f64) -> Result<Self> {
        if !(epsilon > 0.0 && epsilon < 1.0) {
            return Err(Error::invalid("epsilon", format!("{epsilon} is not in (0, 1)")));
        }
        Self::new(columns, (5.0 / epsilon).ceil() as usize)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl Sketch<Table> for MisraGriesSketch {
    type Output = FreqKList;

    fn zero(&self) -> FreqKList {
        FreqKList::empty(self.max_size)
    }

    fn create(&self, data: &Table) -> Result<FreqKList> {
        let columns = resolve(data, &self.columns)?;
        let mut counters = Counters::new(self.max_size);
        let mut total_rows = 0;
        for row in data.rows() {
            counters.push(RowSnapshot::from_columns(&columns, row));
            total_rows += 1;
        }
        Ok(counters.finish(total_rows))
    }

    fn add(&self, left: &FreqKList, right: &FreqKList) -> Result<FreqKList> {
        left.add(right)
    }

    fn describe(&self) -> Result<OpSpec> {
        self.spec()
    }
}

impl Remotable for MisraGriesSketch {
    const NAME: &'static str = "misra_gries";
}

/// Exact counts of the rows of a sample, with the sampling rate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "crate::serde::SampledFreqRepr")]
pub struct SampledFreq {
    pub(crate) rate: f64,
    pub(crate) total_rows: u64,
    pub(crate) sampled_rows: u64,
    /// Sorted by descending count, then ascending row.
    pub(crate) counts: Vec<(RowSnapshot, u64)>,
}

impl SampledFreq {
    pub fn empty(rate: f64) -> Self {
        Self {
            rate,
            total_rows: 0,
            sampled_rows: 0,
            counts: Vec::new(),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    pub fn sampled_rows(&self) -> u64 {
        self.sampled_rows
    }

    pub fn counts(&self) -> &[(RowSnapshot, u64)] {
        &self.counts
    }

    /// Count of `row` scaled back to the whole population.
    pub fn estimate(&self, row: &RowSnapshot) -> Option<f64> {
        self.counts
            .iter()
            .find(|(r, _)| r == row)
            .map(|(_, c)| *c as f64 / self.rate)
    }

    /// Rows whose share of the sample is at least `epsilon`, with their
    /// estimated population counts.
    pub fn heavy_hitters(&self, epsilon: f64) -> Vec<(RowSnapshot, f64)> {
        let threshold = epsilon * self.sampled_rows as f64;
        self.counts
            .iter()
            .filter(|(_, c)| *c as f64 >= threshold)
            .map(|(r, c)| (r.clone(), *c as f64 / self.rate))
            .collect()
    }

    pub fn add(&self, other: &SampledFreq) -> Result<SampledFreq> {
        if self.rate != other.rate {
            return Err(Error::IncompatibleResults(format!(
                "heavy hitter samples at rates {} and {}",
                self.rate, other.rate
            )));
        }
        let mut merged: HashMap<RowSnapshot, u64> = HashMap::with_capacity(self.counts.len() + other.counts.len());
        for (row, count) in self.counts.iter().chain(&other.counts) {
            *merged.entry(row.clone()).or_default() += count;
        }
        let mut counts: Vec<_> = merged.into_iter().collect();
        sort_counts(&mut counts);
        Ok(SampledFreq {
            rate: self.rate,
            total_rows: self.total_rows + other.total_rows,
            sampled_rows: self.sampled_rows + other.sampled_rows,
            counts,
        })
    }
}

/// Heavy hitters over a seeded sample of the rows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "crate::serde::SampleHeavyHittersRepr")]
pub struct SampleHeavyHittersSketch {
    pub(crate) columns: Vec<String>,
    pub(crate) epsilon: f64,
    pub(crate) rate: f64,
    pub(crate) seed: u64,
}

impl SampleHeavyHittersSketch {
    /// Sample at `max(1 / (n * epsilon^2), 20000 / n)`, capped at 1, where
    /// `n` is the expected number of rows.
    pub fn new(columns: Vec<String>, epsilon: f64, total_rows: u64, seed: u64) -> Result<Self> {
        let rate = if total_rows == 0 {
            1.0
        } else {
            let n = total_rows as f64;
            (1.0 / (n * epsilon * epsilon)).max(20_000.0 / n).min(1.0)
        };
        Self::with_rate(columns, epsilon, rate, seed)
    }

    pub fn with_rate(columns: Vec<String>, epsilon: f64, rate: f64, seed: u64) -> Result<Self> {
        if columns.is_empty() {
            return Err(Error::invalid("columns", "at least one column is required"));
        }
        if !(epsilon > 0.0 && epsilon < 1.0) {
            return Err(Error::invalid("epsilon", format!("{epsilon} is not in (0, 1)")));
        }
        if !(rate > 0.0 && rate <= 1.0) {
            return Err(Error::invalid("rate", format!("{rate} is not in (0, 1]")));
        }
        Ok(Self {
            columns,
            epsilon,
            rate,
            seed,
        })
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl Sketch<Table> for SampleHeavyHittersSketch {
    type Output = SampledFreq;

    fn zero(&self) -> SampledFreq {
        SampledFreq::empty(self.rate)
    }

    fn create(&self, data: &Table) -> Result<SampledFreq> {
        let columns = resolve(data, &self.columns)?;
        let mut counts: HashMap<RowSnapshot, u64> = HashMap::new();
        let mut result = self.zero();
        for row in data.rows() {
            result.total_rows += 1;
            if self.rate < 1.0 && !keep_row(row, self.rate, self.seed) {
                continue;
            }
            result.sampled_rows += 1;
            *counts.entry(RowSnapshot::from_columns(&columns, row)).or_default() += 1;
        }
        result.counts = counts.into_iter().collect();
        sort_counts(&mut result.counts);
        Ok(result)
    }

    fn add(&self, left: &SampledFreq, right: &SampledFreq) -> Result<SampledFreq> {
        left.add(right)
    }

    fn describe(&self) -> Result<OpSpec> {
        self.spec()
    }
}

impl Remotable for SampleHeavyHittersSketch {
    const NAME: &'static str = "sample_heavy_hitters";
}

/// Exact counts of a fixed list of rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExactFreq {
    total_rows: u64,
    counts: Vec<(RowSnapshot, u64)>,
}

impl ExactFreq {
    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    pub fn counts(&self) -> &[(RowSnapshot, u64)] {
        &self.counts
    }

    /// Rows occurring in more than `epsilon * total_rows` rows.
    pub fn heavy_hitters(&self, epsilon: f64) -> Vec<(RowSnapshot, u64)> {
        let threshold = epsilon * self.total_rows as f64;
        let mut hitters: Vec<_> = self
            .counts
            .iter()
            .filter(|(_, c)| *c as f64 > threshold)
            .cloned()
            .collect();
        sort_counts(&mut hitters);
        hitters
    }
}

/// Second pass of heavy hitter detection: count the candidates exactly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExactFreqSketch {
    columns: Vec<String>,
    candidates: Vec<RowSnapshot>,
}

impl ExactFreqSketch {
    pub fn new(columns: Vec<String>, candidates: Vec<RowSnapshot>) -> Self {
        Self { columns, candidates }
    }

    /// Candidates found in a sample at the sketch's `epsilon`.
    pub fn from_sample(sketch: &SampleHeavyHittersSketch, sample: &SampledFreq) -> Self {
        let candidates = sample.heavy_hitters(sketch.epsilon).into_iter().map(|(r, _)| r).collect();
        Self::new(sketch.columns.clone(), candidates)
    }

    /// Candidates left by a Misra–Gries pass at the same `epsilon`.
    pub fn from_candidates(sketch: &MisraGriesSketch, list: &FreqKList, epsilon: f64) -> Self {
        let candidates = list.heavy_hitters(epsilon).into_iter().map(|(r, _)| r).collect();
        Self::new(sketch.columns.clone(), candidates)
    }
}

impl Sketch<Table> for ExactFreqSketch {
    type Output = ExactFreq;

    fn zero(&self) -> ExactFreq {
        ExactFreq {
            total_rows: 0,
            counts: self.candidates.iter().map(|r| (r.clone(), 0)).collect(),
        }
    }

    fn create(&self, data: &Table) -> Result<ExactFreq> {
        let columns = resolve(data, &self.columns)?;
        let index: HashMap<&RowSnapshot, usize> = self.candidates.iter().enumerate().map(|(i, r)| (r, i)).collect();
        let mut result = self.zero();
        for row in data.rows() {
            result.total_rows += 1;
            if let Some(&i) = index.get(&RowSnapshot::from_columns(&columns, row)) {
                result.counts[i].1 += 1;
            }
        }
        Ok(result)
    }

    fn add(&self, left: &ExactFreq, right: &ExactFreq) -> Result<ExactFreq> {
        if left.counts.len() != right.counts.len() {
            return Err(Error::IncompatibleResults("exact counts over different candidates".into()));
        }
        let counts = left
            .counts
            .iter()
            .zip(&right.counts)
            .map(|((row, a), (_, b))| (row.clone(), a + b))
            .collect();
        Ok(ExactFreq {
            total_rows: left.total_rows + right.total_rows,
            counts,
        })
    }

    fn describe(&self) -> Result<OpSpec> {
        self.spec()
    }
}

impl Remotable for ExactFreqSketch {
    const NAME: &'static str = "exact_freq";
}
