//! ## Group-by
//! Runs an inner sketch separately on the rows of each bucket of a column,
//! plus one group for missing cells and one for out-of-range cells. Group-by
//! sketches nest: grouping a histogram by a second column yields a heat map.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::buckets::{BucketDescriptor, BucketsTrait};
use crate::error::{Error, Result};
use crate::sketch::{OpSpec, Remotable, Sketch};
use crate::table::{Membership, Table};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Groups<R> {
    buckets: Vec<R>,
    missing: R,
    out_of_range: R,
}

impl<R> Groups<R> {
    pub fn buckets(&self) -> &[R] {
        &self.buckets
    }

    pub fn bucket(&self, index: usize) -> Option<&R> {
        self.buckets.get(index)
    }

    pub fn missing(&self) -> &R {
        &self.missing
    }

    pub fn out_of_range(&self) -> &R {
        &self.out_of_range
    }

    /// Every group, buckets first.
    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.buckets.iter().chain([&self.missing, &self.out_of_range])
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupBySketch<S> {
    column: String,
    descriptor: BucketDescriptor,
    inner: S,
}

impl<S> GroupBySketch<S> {
    pub fn new(column: impl Into<String>, descriptor: BucketDescriptor, inner: S) -> Self {
        Self {
            column: column.into(),
            descriptor,
            inner,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: Sketch<Table>> Sketch<Table> for GroupBySketch<S> {
    type Output = Groups<S::Output>;

    fn zero(&self) -> Self::Output {
        Groups {
            buckets: (0..self.descriptor.bucket_count()).map(|_| self.inner.zero()).collect(),
            missing: self.inner.zero(),
            out_of_range: self.inner.zero(),
        }
    }

    fn create(&self, data: &Table) -> Result<Self::Output> {
        let column = data.column(&self.column)?;
        self.descriptor.check_column(column)?;
        let count = self.descriptor.bucket_count();
        // buckets, then missing, then out of range
        let mut rows = vec![Vec::new(); count + 2];
        for row in data.rows() {
            let group = if column.is_missing(row) {
                count
            } else {
                self.descriptor.index_of_row(column, row).unwrap_or(count + 1)
            };
            rows[group].push(row);
        }
        let mut groups = rows
            .into_iter()
            .map(|r| self.inner.create(&data.with_membership(Membership::Sparse(Arc::new(r)))))
            .collect::<Result<Vec<_>>>()?;
        let out_of_range = groups.pop();
        let missing = groups.pop();
        match (missing, out_of_range) {
            (Some(missing), Some(out_of_range)) => Ok(Groups {
                buckets: groups,
                missing,
                out_of_range,
            }),
            _ => Err(Error::Execution("group-by lost its missing and out-of-range groups".into())),
        }
    }

    fn add(&self, left: &Self::Output, right: &Self::Output) -> Result<Self::Output> {
        if left.buckets.len() != right.buckets.len() {
            return Err(Error::BucketsMismatch);
        }
        Ok(Groups {
            buckets: left
                .buckets
                .iter()
                .zip(&right.buckets)
                .map(|(l, r)| self.inner.add(l, r))
                .collect::<Result<_>>()?,
            missing: self.inner.add(&left.missing, &right.missing)?,
            out_of_range: self.inner.add(&left.out_of_range, &right.out_of_range)?,
        })
    }

    /// Remotable when the inner sketch is.
    fn describe(&self) -> Result<OpSpec> {
        let inner = self.inner.describe()?;
        let mut params = serde_json::Map::new();
        params.insert("column".into(), serde_json::to_value(&self.column)?);
        params.insert("descriptor".into(), serde_json::to_value(&self.descriptor)?);
        params.insert("inner".into(), inner.params);
        Ok(OpSpec {
            name: group_name(&inner.name),
            params: params.into(),
        })
    }
}

fn group_name(inner: &str) -> String {
    format!("group_by({inner})")
}

impl<S: Remotable> Remotable for GroupBySketch<S> {
    const NAME: &'static str = "group_by";

    fn registered_name() -> String {
        group_name(&S::registered_name())
    }
}
