//! In-memory columnar table consumed by the sketches.
//!
//! A `Table` is a schema, a shared set of columns and a `Membership` selecting
//! which rows of those columns belong to this partition. Partitions produced
//! by [`Table::split`] or [`Table::sample`] share the column storage, and row
//! indices stay global so seeded per-row decisions do not depend on how the
//! table was partitioned.

use std::fmt::{Display, Formatter};
use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::row::Datum;
use crate::sketch::{Map, OpSpec, Remotable};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKind {
    Integer,
    Double,
    String,
}

impl ColumnKind {
    #[inline]
    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnKind::Integer | ColumnKind::Double)
    }
}

impl Display for ColumnKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnKind::Integer => "Integer",
            ColumnKind::Double => "Double",
            ColumnKind::String => "String",
        };
        f.write_str(name)
    }
}

/// Ordered column name to kind mapping.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<(String, ColumnKind)>,
}

impl Schema {
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn kind_of(&self, name: &str) -> Option<ColumnKind> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, kind)| *kind)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
enum ColumnData {
    Integer(Vec<Option<i64>>),
    Double(Vec<Option<f64>>),
    String(Vec<Option<String>>),
}

/// Typed column values; `None` marks a missing cell.
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    name: String,
    data: ColumnData,
}

impl Column {
    pub fn integers(name: impl Into<String>, values: Vec<Option<i64>>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Integer(values),
        }
    }

    pub fn doubles(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Double(values),
        }
    }

    pub fn strings(name: impl Into<String>, values: Vec<Option<String>>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::String(values),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ColumnKind {
        match self.data {
            ColumnData::Integer(_) => ColumnKind::Integer,
            ColumnData::Double(_) => ColumnKind::Double,
            ColumnData::String(_) => ColumnKind::String,
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            ColumnData::Integer(v) => v.len(),
            ColumnData::Double(v) => v.len(),
            ColumnData::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True for missing cells and for rows past the end of the column.
    #[inline]
    pub fn is_missing(&self, row: usize) -> bool {
        match &self.data {
            ColumnData::Integer(v) => !matches!(v.get(row), Some(Some(_))),
            ColumnData::Double(v) => !matches!(v.get(row), Some(Some(x)) if !x.is_nan()),
            ColumnData::String(v) => !matches!(v.get(row), Some(Some(_))),
        }
    }

    /// Numeric value of a cell; `None` when missing or not numeric.
    #[inline]
    pub fn as_f64(&self, row: usize) -> Option<f64> {
        match &self.data {
            ColumnData::Integer(v) => v.get(row).copied().flatten().map(|x| x as f64),
            ColumnData::Double(v) => v.get(row).copied().flatten().filter(|x| !x.is_nan()),
            ColumnData::String(_) => None,
        }
    }

    #[inline]
    pub fn as_str(&self, row: usize) -> Option<&str> {
        match &self.data {
            ColumnData::String(v) => v.get(row).and_then(|s| s.as_deref()),
            _ => None,
        }
    }

    /// Owned copy of a cell.
    pub fn datum(&self, row: usize) -> Datum {
        match &self.data {
            ColumnData::Integer(v) => match v.get(row) {
                Some(Some(x)) => Datum::Integer(*x),
                _ => Datum::Missing,
            },
            ColumnData::Double(_) => match self.as_f64(row) {
                Some(x) => Datum::from(x),
                None => Datum::Missing,
            },
            ColumnData::String(v) => match v.get(row) {
                Some(Some(s)) => Datum::String(s.clone()),
                _ => Datum::Missing,
            },
        }
    }

    /// Fail unless the column is numeric.
    pub fn expect_numeric(&self) -> Result<()> {
        if self.kind().is_numeric() {
            Ok(())
        } else {
            Err(Error::ColumnKind {
                column: self.name.clone(),
                actual: self.kind().to_string(),
                expected: "Integer or Double".to_string(),
            })
        }
    }
}

/// Set of row indices of the underlying columns that belong to a table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Membership {
    /// Contiguous range of rows.
    Full(Range<usize>),
    /// Sorted list of rows.
    Sparse(Arc<Vec<usize>>),
}

impl Membership {
    pub fn full(rows: usize) -> Self {
        Membership::Full(0..rows)
    }

    pub fn size(&self) -> usize {
        match self {
            Membership::Full(r) => r.len(),
            Membership::Sparse(rows) => rows.len(),
        }
    }

    pub fn iter(&self) -> MembershipIter<'_> {
        match self {
            Membership::Full(r) => MembershipIter::Full(r.clone()),
            Membership::Sparse(rows) => MembershipIter::Sparse(rows.iter()),
        }
    }

    /// Rows kept independently with probability `rate`.
    ///
    /// The decision only depends on the global row index and `seed`, so the
    /// same rows survive however the table is partitioned.
    pub fn sample(&self, rate: f64, seed: u64) -> Self {
        if rate >= 1.0 {
            return self.clone();
        }
        let rows = self.iter().filter(|&row| keep_row(row, rate, seed)).collect();
        Membership::Sparse(Arc::new(rows))
    }

    /// Split into `parts` contiguous, nearly equal pieces.
    fn split(&self, parts: usize) -> Vec<Membership> {
        let size = self.size();
        let bounds = (0..=parts).map(|i| i * size / parts).collect::<Vec<_>>();
        bounds
            .windows(2)
            .map(|w| match self {
                Membership::Full(r) => Membership::Full(r.start + w[0]..r.start + w[1]),
                Membership::Sparse(rows) => Membership::Sparse(Arc::new(rows[w[0]..w[1]].to_vec())),
            })
            .collect()
    }
}

pub enum MembershipIter<'a> {
    Full(Range<usize>),
    Sparse(std::slice::Iter<'a, usize>),
}

impl Iterator for MembershipIter<'_> {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        match self {
            MembershipIter::Full(r) => r.next(),
            MembershipIter::Sparse(it) => it.next().copied(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            MembershipIter::Full(r) => r.size_hint(),
            MembershipIter::Sparse(it) => it.size_hint(),
        }
    }
}

/// Seeded, reproducible Bernoulli decision for one row.
#[inline]
pub(crate) fn keep_row(row: usize, rate: f64, seed: u64) -> bool {
    let h = wyhash::wyhash(&(row as u64).to_le_bytes(), seed);
    (h as f64) < rate * 18_446_744_073_709_551_616.0
}

#[derive(Clone, Debug)]
pub struct Table {
    schema: Arc<Schema>,
    columns: Arc<Vec<Column>>,
    members: Membership,
}

impl Table {
    pub fn builder() -> TableBuilder {
        TableBuilder::default()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Number of rows in this partition.
    pub fn num_rows(&self) -> usize {
        self.members.size()
    }

    pub fn members(&self) -> &Membership {
        &self.members
    }

    /// Row indices of this partition.
    pub fn rows(&self) -> MembershipIter<'_> {
        self.members.iter()
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::UnknownColumn(name.to_string()))
    }

    pub fn with_membership(&self, members: Membership) -> Table {
        Table {
            schema: self.schema.clone(),
            columns: self.columns.clone(),
            members,
        }
    }

    /// Bernoulli sample of the rows; see [`Membership::sample`].
    pub fn sample(&self, rate: f64, seed: u64) -> Table {
        self.with_membership(self.members.sample(rate, seed))
    }

    /// Split into `parts` contiguous partitions sharing the column storage.
    pub fn split(&self, parts: usize) -> Result<Vec<Table>> {
        if parts == 0 {
            return Err(Error::invalid("parts", "must be positive"));
        }
        Ok(self
            .members
            .split(parts)
            .into_iter()
            .map(|m| self.with_membership(m))
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct TableBuilder {
    columns: Vec<Column>,
}

impl TableBuilder {
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn integers(self, name: &str, values: impl IntoIterator<Item = i64>) -> Self {
        self.column(Column::integers(name, values.into_iter().map(Some).collect()))
    }

    pub fn doubles(self, name: &str, values: impl IntoIterator<Item = f64>) -> Self {
        self.column(Column::doubles(name, values.into_iter().map(Some).collect()))
    }

    pub fn strings<S: Into<String>>(self, name: &str, values: impl IntoIterator<Item = S>) -> Self {
        self.column(Column::strings(
            name,
            values.into_iter().map(|s| Some(s.into())).collect(),
        ))
    }

    /// Validate column names and lengths and build a table over all rows.
    pub fn build(self) -> Result<Table> {
        let rows = self.columns.first().map_or(0, Column::len);
        let mut columns = Vec::with_capacity(self.columns.len());
        for c in &self.columns {
            if columns.iter().any(|(n, _): &(String, ColumnKind)| n == &c.name) {
                return Err(Error::invalid("column", format!("duplicate name `{}`", c.name)));
            }
            if c.len() != rows {
                return Err(Error::ShapeMismatch(format!(
                    "column `{}` has {} rows, expected {rows}",
                    c.name,
                    c.len()
                )));
            }
            columns.push((c.name.clone(), c.kind()));
        }
        Ok(Table {
            schema: Arc::new(Schema { columns }),
            columns: Arc::new(self.columns),
            members: Membership::full(rows),
        })
    }
}

/// Map replacing each partition by a seeded Bernoulli sample of its rows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "crate::serde::SampleMapRepr")]
pub struct SampleMap {
    rate: f64,
    seed: u64,
}

impl SampleMap {
    pub fn new(rate: f64, seed: u64) -> Result<Self> {
        if !(rate > 0.0 && rate <= 1.0) {
            return Err(Error::invalid("rate", format!("{rate} is not in (0, 1]")));
        }
        Ok(Self { rate, seed })
    }
}

impl Map<Table> for SampleMap {
    type Output = Table;

    fn apply(&self, data: &Table) -> Result<Table> {
        Ok(data.sample(self.rate, self.seed))
    }

    fn describe(&self) -> Result<OpSpec> {
        self.spec()
    }
}

impl Remotable for SampleMap {
    const NAME: &'static str = "sample";
}

/// Flat map splitting each partition into `parts` contiguous partitions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitMap {
    parts: usize,
}

impl SplitMap {
    pub fn new(parts: usize) -> Result<Self> {
        if parts == 0 {
            return Err(Error::invalid("parts", "must be positive"));
        }
        Ok(Self { parts })
    }
}

impl Map<Table> for SplitMap {
    type Output = Vec<Table>;

    fn apply(&self, data: &Table) -> Result<Vec<Table>> {
        data.split(self.parts)
    }

    fn describe(&self) -> Result<OpSpec> {
        self.spec()
    }
}

impl Remotable for SplitMap {
    const NAME: &'static str = "split";
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use test_case::test_case;

    fn table(n: i64) -> Table {
        Table::builder()
            .integers("x", 0..n)
            .strings("s", (0..n).map(|i| format!("v{}", i % 3)))
            .build()
            .unwrap()
    }

    #[test_case(10, 1 => vec![10])]
    #[test_case(10, 3 => vec![3, 3, 4])]
    #[test_case(2, 4 => vec![0, 1, 0, 1])]
    fn test_split_sizes(rows: i64, parts: usize) -> Vec<usize> {
        table(rows)
            .split(parts)
            .unwrap()
            .iter()
            .map(Table::num_rows)
            .collect()
    }

    #[test]
    fn test_split_covers_all_rows() {
        let t = table(100);
        let rows: Vec<usize> = t.split(7).unwrap().iter().flat_map(|p| p.rows().collect::<Vec<_>>()).collect();
        assert_eq!(rows, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_sample_is_partition_invariant() {
        let t = table(1000);
        let whole: Vec<usize> = t.sample(0.3, 42).rows().collect();
        let parts: Vec<usize> = t
            .split(4)
            .unwrap()
            .iter()
            .flat_map(|p| p.sample(0.3, 42).rows().collect::<Vec<_>>())
            .collect();
        assert_eq!(whole, parts);
        assert!(whole.len() > 200 && whole.len() < 400);
    }

    #[test]
    fn test_missing_values() {
        let t = Table::builder()
            .column(Column::doubles("d", vec![Some(1.0), None, Some(f64::NAN)]))
            .build()
            .unwrap();
        let d = t.column("d").unwrap();
        assert_eq!(
            (0..3).map(|r| d.is_missing(r)).collect::<Vec<_>>(),
            vec![false, true, true]
        );
        assert_eq!(d.datum(2), Datum::Missing);
    }

    #[test]
    fn test_build_errors() {
        let dup = Table::builder().integers("a", [1]).integers("a", [2]).build();
        assert!(matches!(dup, Err(Error::InvalidParameter { .. })));
        let ragged = Table::builder().integers("a", [1]).integers("b", [1, 2]).build();
        assert!(matches!(ragged, Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_unknown_column_and_kind() {
        let t = table(3);
        assert_eq!(t.column("y").err(), Some(Error::UnknownColumn("y".into())));
        assert!(t.column("s").unwrap().expect_numeric().is_err());
        assert_eq!(t.schema().kind_of("x"), Some(ColumnKind::Integer));
    }

    #[test]
    fn test_table_maps() {
        let t = table(100);
        let sampled = SampleMap::new(0.5, 3).unwrap().apply(&t).unwrap();
        assert_eq!(sampled.rows().collect::<Vec<_>>(), t.sample(0.5, 3).rows().collect::<Vec<_>>());
        let parts = SplitMap::new(4).unwrap().apply(&t).unwrap();
        assert_eq!(parts.iter().map(Table::num_rows).sum::<usize>(), 100);
        assert!(SampleMap::new(0.0, 1).is_err());
        assert!(SplitMap::new(0).is_err());
        let spec = SplitMap::new(2).unwrap().describe().unwrap();
        assert_eq!(spec.name, "split");
        assert_eq!(spec.decode::<SplitMap>(), SplitMap::new(2));
    }
}
