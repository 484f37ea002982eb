use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use super::{shape_of, DataSet, DataSetStream, ParallelDataSet, Zipped};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::partial::{self, PartialStream};
use crate::sketch::{Map, Sketch};

/// Leaf dataset holding a single partition.
///
/// Each operation is one unit of work: it emits a single partial result
/// covering the whole partition and then completes. With
/// `EngineConfig::local_threads` the work runs on a dedicated thread and the
/// call returns immediately; otherwise it runs on the caller's thread.
pub struct LocalDataSet<T> {
    data: Arc<T>,
    config: EngineConfig,
}

impl<T> Clone for LocalDataSet<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            config: self.config.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> LocalDataSet<T> {
    pub fn new(data: T, config: &EngineConfig) -> Self {
        Self::from_arc(Arc::new(data), config)
    }

    pub fn from_arc(data: Arc<T>, config: &EngineConfig) -> Self {
        Self {
            data,
            config: config.clone(),
        }
    }

    pub fn data(&self) -> &Arc<T> {
        &self.data
    }

    pub fn sketch<S: Sketch<T>>(&self, sketch: Arc<S>) -> PartialStream<S::Output> {
        self.execute("sketch", move |data| sketch.create(data))
    }

    pub fn map<M: Map<T>>(&self, map: Arc<M>) -> DataSetStream<M::Output> {
        let config = self.config.clone();
        self.execute("map", move |data| {
            let mapped = map.apply(data)?;
            Ok(Some(DataSet::local(mapped, &config)))
        })
    }

    pub fn flat_map<M, S>(&self, map: Arc<M>) -> DataSetStream<S>
    where
        M: Map<T, Output = Vec<S>>,
        S: Send + Sync + 'static,
    {
        let config = self.config.clone();
        self.execute("flat_map", move |data| {
            let pieces = map.apply(data)?;
            if pieces.is_empty() {
                return Err(Error::ShapeMismatch(
                    "flat_map produced no partitions".to_string(),
                ));
            }
            let children = pieces
                .into_iter()
                .map(|p| DataSet::local(p, &config))
                .collect();
            Ok(Some(DataSet::Parallel(ParallelDataSet::new(children, &config)?)))
        })
    }

    pub fn zip<S: Send + Sync + 'static>(&self, other: &DataSet<S>) -> DataSetStream<Zipped<T, S>> {
        let DataSet::Local(other) = other else {
            return partial::failed(Error::ShapeMismatch(format!(
                "cannot zip local with {}",
                shape_of(other)
            )));
        };
        let pair = (self.data.clone(), other.data.clone());
        let (emitter, stream) = partial::channel();
        if emitter.partial(1.0, Some(DataSet::local(pair, &self.config))) {
            emitter.complete();
        }
        stream
    }

    /// Run `work` over the partition, inline or on a new thread.
    fn execute<R, F>(&self, op: &'static str, work: F) -> PartialStream<R>
    where
        R: Send + 'static,
        F: FnOnce(&T) -> Result<R> + Send + 'static,
    {
        let (emitter, stream) = partial::channel();
        let data = self.data.clone();
        let job = move || {
            if emitter.is_cancelled() {
                debug!(op, "leaf cancelled before start");
                return;
            }
            debug!(op, "leaf started");
            match panic::catch_unwind(AssertUnwindSafe(|| work(&*data))) {
                Ok(Ok(value)) => {
                    if emitter.partial(1.0, value) {
                        debug!(op, "leaf completed");
                        emitter.complete();
                    }
                }
                Ok(Err(e)) => {
                    warn!(op, error = %e, "leaf failed");
                    emitter.fail(e);
                }
                Err(payload) => {
                    let message = panic_message(payload);
                    warn!(op, %message, "leaf panicked");
                    emitter.fail(Error::Panicked(message));
                }
            }
        };

        if self.config.local_threads {
            let spawned = thread::Builder::new()
                .name(format!("local-{op}"))
                .spawn(job);
            if let Err(e) = spawned {
                // The emitter went down with the closure; the stream reports
                // a disconnect.
                warn!(op, error = %e, "failed to spawn leaf thread");
            }
        } else {
            job();
        }
        stream
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
