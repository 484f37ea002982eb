//! Datasets: one computation, any partitioning.
//!
//! A [`DataSet`] is a handle over partitions of type `T`. The same `sketch`,
//! `map`, `flat_map` or `zip` call runs over
//! - a [`LocalDataSet`] wrapping a single partition, executed inline or on its
//!   own thread;
//! - a [`ParallelDataSet`] fanning the call out to its children and merging
//!   their streams in child order;
//! - a [`RemoteDataSet`] forwarding the call to a worker and relaying the
//!   worker's stream.
//!
//! Every call returns a [`PartialStream`]. Sketch streams carry increments of
//! the sketch result; map-like streams carry `None` while progressing and end
//! with `Some(dataset)`, the new dataset with the same shape.

mod local;
mod parallel;
mod remote;

use std::sync::Arc;

pub use local::LocalDataSet;
pub use parallel::ParallelDataSet;
pub use remote::RemoteDataSet;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::partial::PartialStream;
use crate::sketch::{Map, Sketch};

/// Stream returned by `map`-like operations.
pub type DataSetStream<S> = PartialStream<Option<DataSet<S>>>;

/// Partition pairs produced by [`DataSet::zip`].
pub type Zipped<T, S> = (Arc<T>, Arc<S>);

pub enum DataSet<T> {
    Local(LocalDataSet<T>),
    Parallel(ParallelDataSet<T>),
    Remote(RemoteDataSet<T>),
}

impl<T> Clone for DataSet<T> {
    fn clone(&self) -> Self {
        match self {
            DataSet::Local(ds) => DataSet::Local(ds.clone()),
            DataSet::Parallel(ds) => DataSet::Parallel(ds.clone()),
            DataSet::Remote(ds) => DataSet::Remote(ds.clone()),
        }
    }
}

impl<T> std::fmt::Debug for DataSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSet::Local(_) => f.write_str("Local"),
            DataSet::Parallel(ds) => f.debug_list().entries(ds.children().iter()).finish(),
            DataSet::Remote(ds) => write!(f, "Remote({})", ds.id()),
        }
    }
}

impl<T: Send + Sync + 'static> DataSet<T> {
    pub fn local(data: T, config: &EngineConfig) -> Self {
        DataSet::Local(LocalDataSet::new(data, config))
    }

    pub fn parallel(children: Vec<DataSet<T>>, config: &EngineConfig) -> Result<Self> {
        Ok(DataSet::Parallel(ParallelDataSet::new(children, config)?))
    }

    /// Parallel dataset with one local leaf per partition.
    pub fn from_partitions(partitions: Vec<T>, config: &EngineConfig) -> Result<Self> {
        let children = partitions
            .into_iter()
            .map(|p| DataSet::local(p, config))
            .collect();
        Self::parallel(children, config)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DataSet::Local(_) => "local",
            DataSet::Parallel(_) => "parallel",
            DataSet::Remote(_) => "remote",
        }
    }

    /// Number of local leaves reachable without crossing a remote boundary.
    pub fn local_partitions(&self) -> usize {
        match self {
            DataSet::Local(_) => 1,
            DataSet::Parallel(ds) => ds.children().iter().map(DataSet::local_partitions).sum(),
            DataSet::Remote(_) => 0,
        }
    }

    /// Release every remote dataset in the tree from its worker.
    pub fn release_remote(&self) -> Result<()> {
        match self {
            DataSet::Local(_) => Ok(()),
            DataSet::Parallel(ds) => ds.children().iter().try_for_each(DataSet::release_remote),
            DataSet::Remote(ds) => ds.release(),
        }
    }

    pub fn sketch<S: Sketch<T>>(&self, sketch: Arc<S>) -> PartialStream<S::Output> {
        match self {
            DataSet::Local(ds) => ds.sketch(sketch),
            DataSet::Parallel(ds) => ds.sketch(sketch),
            DataSet::Remote(ds) => ds.sketch(sketch),
        }
    }

    pub fn map<M: Map<T>>(&self, map: Arc<M>) -> DataSetStream<M::Output> {
        match self {
            DataSet::Local(ds) => ds.map(map),
            DataSet::Parallel(ds) => ds.map(map),
            DataSet::Remote(ds) => ds.map(map),
        }
    }

    /// Map every partition to a list of partitions; each local leaf becomes a
    /// parallel dataset over the pieces it produced.
    pub fn flat_map<M, S>(&self, map: Arc<M>) -> DataSetStream<S>
    where
        M: Map<T, Output = Vec<S>>,
        S: Send + Sync + 'static,
    {
        match self {
            DataSet::Local(ds) => ds.flat_map(map),
            DataSet::Parallel(ds) => ds.flat_map(map),
            DataSet::Remote(ds) => ds.flat_map(map),
        }
    }

    /// Pair partitions positionally; both datasets must have the same shape.
    pub fn zip<S: Send + Sync + 'static>(&self, other: &DataSet<S>) -> DataSetStream<Zipped<T, S>> {
        match self {
            DataSet::Local(ds) => ds.zip(other),
            DataSet::Parallel(ds) => ds.zip(other),
            DataSet::Remote(ds) => ds.zip(other),
        }
    }

    /// Run a sketch and wait for the merged result.
    pub fn blocking_sketch<S: Sketch<T>>(&self, sketch: Arc<S>) -> Result<S::Output> {
        let zero = sketch.zero();
        self.sketch(sketch.clone())
            .reduce(zero, |l, r| sketch.add(l, r))
    }

    pub fn blocking_map<M: Map<T>>(&self, map: Arc<M>) -> Result<DataSet<M::Output>> {
        expect_dataset(self.map(map))
    }

    pub fn blocking_flat_map<M, S>(&self, map: Arc<M>) -> Result<DataSet<S>>
    where
        M: Map<T, Output = Vec<S>>,
        S: Send + Sync + 'static,
    {
        expect_dataset(self.flat_map(map))
    }

    pub fn blocking_zip<S: Send + Sync + 'static>(
        &self,
        other: &DataSet<S>,
    ) -> Result<DataSet<Zipped<T, S>>> {
        expect_dataset(self.zip(other))
    }
}

fn expect_dataset<S>(stream: DataSetStream<S>) -> Result<DataSet<S>> {
    stream
        .last_value()?
        .flatten()
        .ok_or_else(|| Error::Execution("operation finished without a dataset".to_string()))
}

fn shape_of<T>(ds: &DataSet<T>) -> String {
    match ds {
        DataSet::Local(_) => "local".to_string(),
        DataSet::Parallel(p) => format!("parallel({})", p.children().len()),
        DataSet::Remote(_) => "remote".to_string(),
    }
}
