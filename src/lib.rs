//! `sketch-dataset` runs mergeable summaries ("sketches") over partitioned data
//! and streams partial answers while the computation progresses.
//!
//! The same [`Sketch`] runs unchanged over a single local partition, a tree of
//! parallel partitions, or a dataset held by a remote [`Worker`]. Results merge
//! with `add`, so the answer does not depend on how the data was partitioned,
//! and callers may stop at any time by cancelling the [`PartialStream`].
//!
//! Bundled sketches cover histograms, HyperLogLog distinct counts, Misra-Gries
//! heavy hitters, bottom-k samples, reservoir and sampled quantiles, next-k
//! paging, column statistics and group-by.
pub mod buckets;
pub mod col_stats;
pub mod config;
pub mod correlation;
pub mod dataset;
pub mod error;
pub mod group_by;
pub mod heavy_hitters;
pub mod histogram;
pub mod hyperloglog;
pub mod min_k;
pub mod partial;
pub mod protocol;
pub mod quantiles;
pub mod row;
pub mod sampling;
mod serde;
pub mod sketch;
pub mod table;
pub mod top_k;
pub mod worker;

pub use buckets::{BucketDescriptor, BucketsTrait};
pub use col_stats::{BasicColStatSketch, BasicColStats};
pub use config::EngineConfig;
pub use correlation::{CorrMatrix, CorrelationSketch};
pub use dataset::{DataSet, DataSetStream};
pub use error::{Error, Result};
pub use group_by::{GroupBySketch, Groups};
pub use heavy_hitters::{
    ExactFreq, ExactFreqSketch, FreqKList, MisraGriesSketch, SampleHeavyHittersSketch, SampledFreq,
};
pub use histogram::{Histogram, HistogramSketch};
pub use hyperloglog::{HllSketch, HyperLogLog};
pub use min_k::{MinKSet, MinKSketch};
pub use partial::{CancellationToken, PartialResult, PartialStream, Signal};
pub use quantiles::{SampleList, SampleQuantileSketch};
pub use row::{Datum, RecordOrder, RowSnapshot};
pub use sampling::{SampleSet, SampleSetSketch};
pub use sketch::{add_all, to_json_tree, Map, MapFn, OpSpec, Remotable, Sketch};
pub use table::{Column, ColumnKind, SampleMap, SplitMap, Table};
pub use top_k::{NextKList, NextKSketch, TopK};
pub use worker::{Worker, WorkerHandle};
