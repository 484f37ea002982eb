//! ## Bounded top-K
//! [`TopK`] keeps the `max_size` smallest distinct keys seen, with a count per
//! key. The largest retained key is the cutoff: a new key is only admitted when
//! the structure has room or the key sorts before the cutoff, in which case the
//! cutoff is evicted.
//!
//! [`NextKSketch`] uses it to find the rows that follow a given row in a
//! [`RecordOrder`], as needed to page through a sorted view of a table.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::row::{RecordOrder, RowSnapshot};
use crate::sketch::{OpSpec, Remotable, Sketch};
use crate::table::Table;

#[derive(Clone, Debug)]
pub struct TopK<K> {
    max_size: usize,
    data: BTreeMap<K, u64>,
}

impl<K: Ord> TopK<K> {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            data: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Largest key currently retained.
    pub fn cutoff(&self) -> Option<&K> {
        self.data.keys().next_back()
    }

    pub fn push(&mut self, key: K) {
        if let Some(count) = self.data.get_mut(&key) {
            *count += 1;
            return;
        }
        if self.data.len() < self.max_size {
            self.data.insert(key, 1);
            return;
        }
        if self.cutoff().is_some_and(|cutoff| &key < cutoff) {
            self.data.insert(key, 1);
            self.data.pop_last();
        }
    }

    /// Retained keys in ascending order with their counts.
    pub fn into_sorted(self) -> impl Iterator<Item = (K, u64)> {
        self.data.into_iter()
    }
}

/// Row compared through a shared record order.
#[derive(Clone, Debug)]
struct OrderedRow {
    row: RowSnapshot,
    order: Arc<RecordOrder>,
}

impl PartialEq for OrderedRow {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedRow {}

impl PartialOrd for OrderedRow {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedRow {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order.compare(&self.row, &other.row)
    }
}

/// The next rows in sort order after a starting row, with their multiplicity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextKList {
    rows: Vec<RowSnapshot>,
    counts: Vec<u64>,
    /// Rows sorting strictly before the starting row.
    start_position: u64,
    rows_scanned: u64,
}

impl NextKList {
    pub fn rows(&self) -> &[RowSnapshot] {
        &self.rows
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn start_position(&self) -> u64 {
        self.start_position
    }

    pub fn rows_scanned(&self) -> u64 {
        self.rows_scanned
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "crate::serde::NextKRepr")]
pub struct NextKSketch {
    order: RecordOrder,
    top_row: Option<RowSnapshot>,
    max_size: usize,
}

impl NextKSketch {
    /// `top_row` of `None` starts from the first row of the order.
    pub fn new(order: RecordOrder, top_row: Option<RowSnapshot>, max_size: usize) -> Result<Self> {
        if order.is_empty() {
            return Err(Error::invalid("order", "record order has no columns"));
        }
        if max_size == 0 {
            return Err(Error::invalid("max_size", "must be positive"));
        }
        if top_row.as_ref().is_some_and(|r| r.values().len() != order.len()) {
            return Err(Error::invalid("top_row", "must have one value per ordered column"));
        }
        Ok(Self {
            order,
            top_row,
            max_size,
        })
    }
}

impl Sketch<Table> for NextKSketch {
    type Output = NextKList;

    fn zero(&self) -> NextKList {
        NextKList::default()
    }

    fn create(&self, data: &Table) -> Result<NextKList> {
        let columns = self.order.columns(data)?;
        let order = Arc::new(self.order.clone());
        let mut top_k = TopK::new(self.max_size);
        let mut start_position = 0;
        let mut rows_scanned = 0;
        for r in data.rows() {
            rows_scanned += 1;
            let row = RowSnapshot::from_columns(&columns, r);
            if let Some(top) = &self.top_row {
                if self.order.compare(top, &row) == Ordering::Greater {
                    start_position += 1;
                    continue;
                }
            }
            top_k.push(OrderedRow {
                row,
                order: order.clone(),
            });
        }
        let (rows, counts) = top_k.into_sorted().map(|(k, c)| (k.row, c)).unzip();
        Ok(NextKList {
            rows,
            counts,
            start_position,
            rows_scanned,
        })
    }

    /// Merge two sorted lists, summing the counts of equal rows.
    fn add(&self, left: &NextKList, right: &NextKList) -> Result<NextKList> {
        let mut rows = Vec::with_capacity(self.max_size.min(left.rows.len() + right.rows.len()));
        let mut counts = Vec::with_capacity(rows.capacity());
        let (mut i, mut j) = (0, 0);
        while rows.len() < self.max_size && (i < left.rows.len() || j < right.rows.len()) {
            let ord = match (left.rows.get(i), right.rows.get(j)) {
                (Some(l), Some(r)) => self.order.compare(l, r),
                (Some(_), None) => Ordering::Less,
                _ => Ordering::Greater,
            };
            match ord {
                Ordering::Less => {
                    rows.push(left.rows[i].clone());
                    counts.push(left.counts[i]);
                    i += 1;
                }
                Ordering::Greater => {
                    rows.push(right.rows[j].clone());
                    counts.push(right.counts[j]);
                    j += 1;
                }
                Ordering::Equal => {
                    rows.push(left.rows[i].clone());
                    counts.push(left.counts[i] + right.counts[j]);
                    i += 1;
                    j += 1;
                }
            }
        }
        Ok(NextKList {
            rows,
            counts,
            start_position: left.start_position + right.start_position,
            rows_scanned: left.rows_scanned + right.rows_scanned,
        })
    }

    fn describe(&self) -> Result<OpSpec> {
        self.spec()
    }
}

impl Remotable for NextKSketch {
    const NAME: &'static str = "next_k";
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::row::Datum;
    use crate::sketch::add_all;
    use test_case::test_case;

    #[test_case(3, &[5, 1, 4, 1, 2, 9, 2] => vec![(1, 2), (2, 2), (4, 1)])]
    #[test_case(2, &[9, 8, 7] => vec![(7, 1), (8, 1)])]
    #[test_case(5, &[3, 3, 3] => vec![(3, 3)])]
    fn test_top_k(max_size: usize, values: &[i32]) -> Vec<(i32, u64)> {
        let mut top_k = TopK::new(max_size);
        for &v in values {
            top_k.push(v);
        }
        top_k.into_sorted().collect()
    }

    #[test]
    fn test_cutoff_updates() {
        let mut top_k = TopK::new(2);
        top_k.push(10);
        top_k.push(20);
        assert_eq!(top_k.cutoff(), Some(&20));
        top_k.push(15);
        assert_eq!(top_k.cutoff(), Some(&15));
        top_k.push(30);
        assert_eq!(top_k.len(), 2);
    }

    fn table() -> Table {
        Table::builder()
            .integers("a", (0..1_000).map(|i| i % 10))
            .strings("b", (0..1_000).map(|i| format!("s{}", i % 4)))
            .build()
            .unwrap()
    }

    fn row(a: i64, b: &str) -> RowSnapshot {
        RowSnapshot::new(vec![Datum::Integer(a), Datum::from(b)])
    }

    #[test_case(1)]
    #[test_case(3)]
    #[test_case(8)]
    fn test_next_k(parts: usize) {
        let t = table();
        let order = RecordOrder::new().then("a", false).then("b", true);
        let s = NextKSketch::new(order, Some(row(7, "s2")), 3).unwrap();
        let whole = s.create(&t).unwrap();
        let merged = add_all(&s, t.split(parts).unwrap().iter().map(|p| s.create(p).unwrap())).unwrap();
        assert_eq!(whole, merged);
        // `a` descending: all of 8 and 9, and (7, s1), sort before the start
        assert_eq!(whole.start_position(), 250);
        assert_eq!(whole.rows(), &[row(7, "s3"), row(6, "s0"), row(6, "s2")][..]);
        assert_eq!(whole.counts(), &[50, 50, 50][..]);
        assert_eq!(whole.rows_scanned(), 1_000);
    }

    #[test]
    fn test_next_k_from_start() {
        let order = RecordOrder::new().then("a", true).then("b", true);
        let s = NextKSketch::new(order, None, 2).unwrap();
        let list = s.create(&table()).unwrap();
        assert_eq!(list.rows(), &[row(0, "s0"), row(0, "s2")][..]);
        assert_eq!(list.counts(), &[50, 50][..]);
        assert_eq!(s.add(&s.zero(), &list).unwrap(), list);
    }

    #[test]
    fn test_invalid_top_row() {
        let order = RecordOrder::new().then("a", true);
        assert!(NextKSketch::new(order, Some(row(1, "x")), 2).is_err());
    }
}
