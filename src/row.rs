//! Owned cell values and row signatures.
//!
//! `Datum` is the unit every sketch hashes, counts or compares. Its ordering is
//! total: `Missing` sorts first, then integers, doubles and strings.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::Hasher;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use wyhash::WyHash;

use crate::error::{Error, Result};
use crate::table::{Column, Table};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Datum {
    Missing,
    Integer(i64),
    Double(OrderedFloat<f64>),
    String(String),
}

impl Datum {
    #[inline]
    pub fn is_missing(&self) -> bool {
        matches!(self, Datum::Missing)
    }

    /// Numeric view of the value, `None` for strings and missing cells.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Integer(v) => Some(*v as f64),
            Datum::Double(v) => Some(v.0),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::String(s) => Some(s),
            _ => None,
        }
    }

    /// Seeded 64-bit hash of the value.
    #[inline]
    pub fn hash64(&self, seed: u64) -> u64 {
        let mut hasher = WyHash::with_seed(seed);
        self.write_stable(&mut hasher);
        hasher.finish()
    }

    /// Feed a platform independent encoding of the value: a tag byte, then
    /// little-endian payload bytes. Doubles equal as `OrderedFloat` encode
    /// the same.
    pub(crate) fn write_stable<H: Hasher>(&self, hasher: &mut H) {
        match self {
            Datum::Missing => hasher.write(&[0]),
            Datum::Integer(v) => {
                hasher.write(&[1]);
                hasher.write(&v.to_le_bytes());
            }
            Datum::Double(v) => {
                let bits = if v.0.is_nan() {
                    f64::NAN.to_bits()
                } else if v.0 == 0.0 {
                    0
                } else {
                    v.0.to_bits()
                };
                hasher.write(&[2]);
                hasher.write(&bits.to_le_bytes());
            }
            Datum::String(s) => {
                hasher.write(&[3]);
                hasher.write(&(s.len() as u64).to_le_bytes());
                hasher.write(s.as_bytes());
            }
        }
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Datum::Integer(v)
    }
}

impl From<f64> for Datum {
    fn from(v: f64) -> Self {
        Datum::Double(OrderedFloat(v))
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Datum::String(v.to_string())
    }
}

impl Display for Datum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Datum::Missing => f.write_str("null"),
            Datum::Integer(v) => write!(f, "{v}"),
            Datum::Double(v) => write!(f, "{v}"),
            Datum::String(s) => f.write_str(s),
        }
    }
}

/// Values of a fixed list of columns for one row.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowSnapshot(pub Vec<Datum>);

impl RowSnapshot {
    pub fn new(values: Vec<Datum>) -> Self {
        Self(values)
    }

    /// Snapshot of `row` restricted to the given columns, in order.
    pub fn from_columns(columns: &[&Column], row: usize) -> Self {
        Self(columns.iter().map(|c| c.datum(row)).collect())
    }

    #[inline]
    pub fn values(&self) -> &[Datum] {
        &self.0
    }

    pub fn hash64(&self, seed: u64) -> u64 {
        let mut hasher = WyHash::with_seed(seed);
        hasher.write(&(self.0.len() as u64).to_le_bytes());
        for value in &self.0 {
            value.write_stable(&mut hasher);
        }
        hasher.finish()
    }
}

impl Display for RowSnapshot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("[")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{v}")?;
        }
        f.write_str("]")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSortOrientation {
    pub column: String,
    pub ascending: bool,
}

/// Lexicographic order over a list of columns, each ascending or descending.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOrder {
    orientations: Vec<ColumnSortOrientation>,
}

impl RecordOrder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.orientations.push(ColumnSortOrientation {
            column: column.into(),
            ascending,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.orientations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orientations.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.orientations.iter().map(|o| o.column.as_str())
    }

    /// Resolve the ordered columns against a table.
    pub fn columns<'t>(&self, table: &'t Table) -> Result<Vec<&'t Column>> {
        if self.orientations.is_empty() {
            return Err(Error::invalid("order", "record order has no columns"));
        }
        self.orientations
            .iter()
            .map(|o| table.column(&o.column))
            .collect()
    }

    /// Compare two snapshots taken over this order's columns.
    pub fn compare(&self, left: &RowSnapshot, right: &RowSnapshot) -> Ordering {
        for (i, o) in self.orientations.iter().enumerate() {
            let ord = left.0.get(i).cmp(&right.0.get(i));
            let ord = if o.ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Datum::Missing, Datum::Integer(i64::MIN) => Ordering::Less)]
    #[test_case(Datum::Integer(3), Datum::Integer(2) => Ordering::Greater)]
    #[test_case(Datum::from(1.5), Datum::from(1.5) => Ordering::Equal)]
    #[test_case(Datum::from("a"), Datum::from("b") => Ordering::Less)]
    fn test_datum_order(a: Datum, b: Datum) -> Ordering {
        a.cmp(&b)
    }

    #[test]
    fn test_hash_is_seeded_and_stable() {
        let d = Datum::from("hello");
        assert_eq!(d.hash64(7), d.clone().hash64(7));
        assert_ne!(d.hash64(7), d.hash64(8));
    }

    #[test]
    fn test_hash_uses_fixed_encoding() {
        let mut hasher = WyHash::with_seed(7);
        hasher.write(&[1]);
        hasher.write(&42i64.to_le_bytes());
        assert_eq!(Datum::Integer(42).hash64(7), hasher.finish());

        let mut hasher = WyHash::with_seed(7);
        hasher.write(&[3]);
        hasher.write(&2u64.to_le_bytes());
        hasher.write(b"ab");
        assert_eq!(Datum::from("ab").hash64(7), hasher.finish());
    }

    #[test]
    fn test_hash_agrees_with_equality() {
        assert_eq!(Datum::from(0.0).hash64(1), Datum::from(-0.0).hash64(1));
        assert_eq!(Datum::from(f64::NAN).hash64(1), Datum::from(-f64::NAN).hash64(1));
        assert_ne!(Datum::Integer(1).hash64(1), Datum::from(1.0).hash64(1));
        let split = RowSnapshot::new(vec![Datum::from("a"), Datum::from("b")]);
        let joined = RowSnapshot::new(vec![Datum::from("ab")]);
        assert_ne!(split.hash64(1), joined.hash64(1));
    }

    #[test_case(true, false => Ordering::Less; "first ascending decides")]
    #[test_case(false, false => Ordering::Greater; "first descending decides")]
    fn test_record_order(first_ascending: bool, second_ascending: bool) -> Ordering {
        let order = RecordOrder::new()
            .then("a", first_ascending)
            .then("b", second_ascending);
        let left = RowSnapshot::new(vec![Datum::Integer(1), Datum::Integer(9)]);
        let right = RowSnapshot::new(vec![Datum::Integer(2), Datum::Integer(0)]);
        order.compare(&left, &right)
    }

    #[test]
    fn test_record_order_ties() {
        let order = RecordOrder::new().then("a", true).then("b", false);
        let left = RowSnapshot::new(vec![Datum::Integer(1), Datum::Integer(9)]);
        let right = RowSnapshot::new(vec![Datum::Integer(1), Datum::Integer(0)]);
        assert_eq!(order.compare(&left, &right), Ordering::Less);
        assert_eq!(order.compare(&left, &left), Ordering::Equal);
    }

    #[test]
    fn test_snapshot_display() {
        let row = RowSnapshot::new(vec![Datum::from("x"), Datum::Missing, Datum::Integer(4)]);
        assert_eq!(row.to_string(), "[x, null, 4]");
    }
}
