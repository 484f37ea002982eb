//! ## Sampled correlation
//! Pairwise Pearson correlation of a list of numeric columns, computed from
//! the sums and cross products of a seeded row sample. Both are plain sums,
//! so results merge by addition. Rows with a missing value in any of the
//! columns are counted apart and left out of the sums.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sketch::{OpSpec, Remotable, Sketch};
use crate::table::{keep_row, Table};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "crate::serde::CorrMatrixRepr")]
pub struct CorrMatrix {
    pub(crate) columns: Vec<String>,
    /// Sampled rows with every column present.
    pub(crate) count: u64,
    /// Sampled rows with at least one missing column.
    pub(crate) incomplete: u64,
    pub(crate) sums: Vec<f64>,
    /// Row-major `columns x columns` cross products.
    pub(crate) products: Vec<f64>,
}

impl CorrMatrix {
    pub fn empty(columns: Vec<String>) -> Self {
        let n = columns.len();
        Self {
            columns,
            count: 0,
            incomplete: 0,
            sums: vec![0.0; n],
            products: vec![0.0; n * n],
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn incomplete(&self) -> u64 {
        self.incomplete
    }

    pub fn mean(&self, i: usize) -> Option<f64> {
        let sum = self.sums.get(i)?;
        (self.count > 0).then(|| sum / self.count as f64)
    }

    /// Correlation of columns `i` and `j`; `None` when either has no
    /// variance in the sample.
    pub fn correlation(&self, i: usize, j: usize) -> Option<f64> {
        let n = self.columns.len();
        if i >= n || j >= n || self.count == 0 {
            return None;
        }
        let c = self.count as f64;
        let cov = c * self.products[i * n + j] - self.sums[i] * self.sums[j];
        let var_i = c * self.products[i * n + i] - self.sums[i] * self.sums[i];
        let var_j = c * self.products[j * n + j] - self.sums[j] * self.sums[j];
        if var_i <= 0.0 || var_j <= 0.0 {
            return None;
        }
        Some((cov / (var_i * var_j).sqrt()).clamp(-1.0, 1.0))
    }

    pub fn add(&self, other: &CorrMatrix) -> Result<CorrMatrix> {
        if self.columns != other.columns {
            return Err(Error::IncompatibleResults(format!(
                "correlations over {:?} and {:?}",
                self.columns, other.columns
            )));
        }
        Ok(CorrMatrix {
            columns: self.columns.clone(),
            count: self.count + other.count,
            incomplete: self.incomplete + other.incomplete,
            sums: self.sums.iter().zip(&other.sums).map(|(a, b)| a + b).collect(),
            products: self
                .products
                .iter()
                .zip(&other.products)
                .map(|(a, b)| a + b)
                .collect(),
        })
    }
}

/// Correlations between numeric columns over a seeded row sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "crate::serde::CorrelationRepr")]
pub struct CorrelationSketch {
    pub(crate) columns: Vec<String>,
    pub(crate) rate: f64,
    pub(crate) seed: u64,
}

impl CorrelationSketch {
    pub fn new(columns: Vec<String>, rate: f64, seed: u64) -> Result<Self> {
        if columns.len() < 2 {
            return Err(Error::invalid("columns", "at least two columns are required"));
        }
        if !(rate > 0.0 && rate <= 1.0) {
            return Err(Error::invalid("rate", format!("{rate} is not in (0, 1]")));
        }
        Ok(Self { columns, rate, seed })
    }
}

impl Sketch<Table> for CorrelationSketch {
    type Output = CorrMatrix;

    fn zero(&self) -> CorrMatrix {
        CorrMatrix::empty(self.columns.clone())
    }

    fn create(&self, data: &Table) -> Result<CorrMatrix> {
        let columns = self
            .columns
            .iter()
            .map(|name| {
                let column = data.column(name)?;
                column.expect_numeric()?;
                Ok(column)
            })
            .collect::<Result<Vec<_>>>()?;
        let n = columns.len();
        let mut result = self.zero();
        let mut values = vec![0.0; n];
        'rows: for row in data.rows() {
            if self.rate < 1.0 && !keep_row(row, self.rate, self.seed) {
                continue;
            }
            for (slot, column) in values.iter_mut().zip(&columns) {
                match column.as_f64(row) {
                    Some(v) => *slot = v,
                    None => {
                        result.incomplete += 1;
                        continue 'rows;
                    }
                }
            }
            result.count += 1;
            for i in 0..n {
                result.sums[i] += values[i];
                for j in 0..n {
                    result.products[i * n + j] += values[i] * values[j];
                }
            }
        }
        Ok(result)
    }

    fn add(&self, left: &CorrMatrix, right: &CorrMatrix) -> Result<CorrMatrix> {
        left.add(right)
    }

    fn describe(&self) -> Result<OpSpec> {
        self.spec()
    }
}

impl Remotable for CorrelationSketch {
    const NAME: &'static str = "correlation";
}
