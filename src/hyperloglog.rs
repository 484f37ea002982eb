//! ## HyperLogLog
//! Estimates the number of distinct non-missing values of a column with `M = 2^P`
//! one-byte registers, for precision `P` in `[4..16]`.
//!
//! [Original HyperLogLog paper](http://algo.inria.fr/flajolet/Publications/FlFuGaMe07.pdf)
//!
//! Each value is hashed to 64 bits with a seeded `wyhash`:
//! - the low `P` bits select a register;
//! - the remaining `64 - P` bits give the rank: position of the leftmost set bit.
//!
//! Registers keep the maximum rank observed, so merging two sketches built
//! with the same precision and seed is an exact per-register maximum; the only
//! approximation is in [`HyperLogLog::estimate`], whose standard error is about
//! `1.04 / sqrt(M)`.

use std::fmt::{Debug, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sketch::{OpSpec, Remotable, Sketch};
use crate::table::Table;

pub const MIN_PRECISION: u8 = 4;
pub const MAX_PRECISION: u8 = 16;

/// `2^64`, the size of the hash space.
const HASH_SPACE: f64 = 18_446_744_073_709_551_616.0;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "crate::serde::HyperLogLogRepr")]
pub struct HyperLogLog {
    pub(crate) precision: u8,
    pub(crate) seed: u64,
    pub(crate) registers: Vec<u8>,
}

impl HyperLogLog {
    pub fn new(precision: u8, seed: u64) -> Result<Self> {
        validate_precision(precision)?;
        Ok(Self {
            precision,
            seed,
            registers: vec![0; 1 << precision],
        })
    }

    #[inline]
    pub fn precision(&self) -> u8 {
        self.precision
    }

    #[inline]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn registers(&self) -> &[u8] {
        &self.registers
    }

    /// Insert a 64-bit hash produced with this sketch's seed.
    #[inline]
    pub fn insert_hash(&mut self, h: u64) {
        let p = u32::from(self.precision);
        let idx = (h & ((1 << p) - 1)) as usize;
        let rest = h >> p;
        // leading zeros of `rest` include the `p` bits shifted out
        let rank = (rest.leading_zeros() - p + 1) as u8;
        let register = &mut self.registers[idx];
        if rank > *register {
            *register = rank;
        }
    }

    /// Per-register maximum; both sides must share precision and seed.
    pub fn merge(&mut self, rhs: &HyperLogLog) -> Result<()> {
        if self.precision != rhs.precision || self.seed != rhs.seed {
            return Err(Error::IncompatibleResults(format!(
                "HyperLogLog with precision {} seed {} and precision {} seed {}",
                self.precision, self.seed, rhs.precision, rhs.seed
            )));
        }
        for (lhs, &rhs) in self.registers.iter_mut().zip(&rhs.registers) {
            *lhs = (*lhs).max(rhs);
        }
        Ok(())
    }

    /// Return cardinality estimate.
    pub fn estimate(&self) -> usize {
        let m = self.registers.len() as f64;
        let mut zeros = 0usize;
        let mut sum = 0.0;
        for &r in &self.registers {
            if r == 0 {
                zeros += 1;
            }
            sum += 1.0 / (1u64 << r) as f64;
        }
        let raw = alpha(self.registers.len()) * m * m / sum;
        let estimate = if raw <= 2.5 * m && zeros > 0 {
            // linear counting
            m * (m / zeros as f64).ln()
        } else if raw > HASH_SPACE / 30.0 {
            -HASH_SPACE * (1.0 - raw / HASH_SPACE).ln()
        } else {
            raw
        };
        (estimate + 0.5) as usize
    }

    /// Expected relative standard error at this precision.
    pub fn relative_error(&self) -> f64 {
        1.04 / (self.registers.len() as f64).sqrt()
    }
}

impl Debug for HyperLogLog {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "HyperLogLog {{ precision: {}, seed: {}, estimate: {} }}",
            self.precision,
            self.seed,
            self.estimate()
        )
    }
}

pub(crate) fn validate_precision(precision: u8) -> Result<()> {
    if (MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
        Ok(())
    } else {
        Err(Error::invalid(
            "precision",
            format!("{precision} is not in [{MIN_PRECISION}, {MAX_PRECISION}]"),
        ))
    }
}

/// Parameter for bias correction
#[inline]
fn alpha(m: usize) -> f64 {
    match m {
        16 => 0.673,
        32 => 0.697,
        64 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / (m as f64)),
    }
}

/// Distinct count of one column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "crate::serde::HllSketchRepr")]
pub struct HllSketch {
    pub(crate) column: String,
    pub(crate) precision: u8,
    pub(crate) seed: u64,
}

impl HllSketch {
    pub fn new(column: impl Into<String>, precision: u8, seed: u64) -> Result<Self> {
        validate_precision(precision)?;
        Ok(Self {
            column: column.into(),
            precision,
            seed,
        })
    }

    fn empty(&self) -> HyperLogLog {
        HyperLogLog {
            precision: self.precision,
            seed: self.seed,
            registers: vec![0; 1 << self.precision],
        }
    }
}

impl Sketch<Table> for HllSketch {
    type Output = HyperLogLog;

    fn zero(&self) -> HyperLogLog {
        self.empty()
    }

    fn create(&self, data: &Table) -> Result<HyperLogLog> {
        let column = data.column(&self.column)?;
        let mut hll = self.empty();
        for row in data.rows() {
            let value = column.datum(row);
            if !value.is_missing() {
                hll.insert_hash(value.hash64(self.seed));
            }
        }
        Ok(hll)
    }

    fn add(&self, left: &HyperLogLog, right: &HyperLogLog) -> Result<HyperLogLog> {
        let mut result = left.clone();
        result.merge(right)?;
        Ok(result)
    }

    fn describe(&self) -> Result<OpSpec> {
        self.spec()
    }
}

impl Remotable for HllSketch {
    const NAME: &'static str = "hll";
}
