use std::marker::PhantomData;
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{unbounded, RecvTimeoutError};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{shape_of, DataSet, DataSetStream, Zipped};
use crate::error::{Error, Result};
use crate::partial::{self, Emitter, PartialStream};
use crate::protocol::{DataSetId, OpId, Reply, Request};
use crate::sketch::{Map, Sketch};
use crate::worker::{zip_kind, WorkerHandle};

/// Proxy for a dataset living on a worker.
///
/// Operations are described with [`Sketch::describe`] / [`Map::describe`]
/// and sent to the worker; a relay thread decodes the worker's replies and
/// republishes them. Operations that cannot describe themselves fail before
/// anything is sent. A dropped connection surfaces as
/// [`Error::Disconnected`] and is not retried.
pub struct RemoteDataSet<T> {
    worker: WorkerHandle,
    id: DataSetId,
    _partition: PhantomData<fn() -> T>,
}

impl<T> Clone for RemoteDataSet<T> {
    fn clone(&self) -> Self {
        Self {
            worker: self.worker.clone(),
            id: self.id,
            _partition: PhantomData,
        }
    }
}

impl<T> RemoteDataSet<T> {
    pub fn id(&self) -> DataSetId {
        self.id
    }
}

impl<T: Send + Sync + 'static> RemoteDataSet<T> {
    pub fn new(worker: WorkerHandle, id: DataSetId) -> Self {
        Self {
            worker,
            id,
            _partition: PhantomData,
        }
    }

    pub fn worker(&self) -> &WorkerHandle {
        &self.worker
    }

    /// Ask the worker to drop this dataset. Other proxies for the same id
    /// fail with an unknown dataset afterwards.
    pub fn release(&self) -> Result<()> {
        debug!(worker = self.worker.name(), dataset = self.id, "releasing");
        self.worker.release(self.id)
    }

    pub fn sketch<S: Sketch<T>>(&self, sketch: Arc<S>) -> PartialStream<S::Output> {
        let spec = match sketch.describe() {
            Ok(spec) => spec,
            Err(e) => return partial::failed(e),
        };
        let op = self.worker.next_op();
        let request = Request::Sketch {
            op,
            dataset: self.id,
            spec,
        };
        self.forward(op, request, |value| Ok(serde_json::from_value(value)?))
    }

    pub fn map<M: Map<T>>(&self, map: Arc<M>) -> DataSetStream<M::Output> {
        let spec = match map.describe() {
            Ok(spec) => spec,
            Err(e) => return partial::failed(e),
        };
        let op = self.worker.next_op();
        let request = Request::Map {
            op,
            dataset: self.id,
            spec,
        };
        let worker = self.worker.clone();
        self.forward(op, request, move |value| remote_dataset(&worker, value))
    }

    pub fn flat_map<M, S>(&self, map: Arc<M>) -> DataSetStream<S>
    where
        M: Map<T, Output = Vec<S>>,
        S: Send + Sync + 'static,
    {
        let spec = match map.describe() {
            Ok(spec) => spec,
            Err(e) => return partial::failed(e),
        };
        let op = self.worker.next_op();
        let request = Request::FlatMap {
            op,
            dataset: self.id,
            spec,
        };
        let worker = self.worker.clone();
        self.forward(op, request, move |value| remote_dataset(&worker, value))
    }

    /// Both operands must live on the same worker.
    pub fn zip<S: Send + Sync + 'static>(&self, other: &DataSet<S>) -> DataSetStream<Zipped<T, S>> {
        let right = match other {
            DataSet::Remote(r) if r.worker.same_worker(&self.worker) => r.id,
            DataSet::Remote(r) => {
                return partial::failed(Error::ShapeMismatch(format!(
                    "cannot zip datasets on workers {} and {}",
                    self.worker.name(),
                    r.worker.name()
                )))
            }
            _ => {
                return partial::failed(Error::ShapeMismatch(format!(
                    "cannot zip remote with {}",
                    shape_of(other)
                )))
            }
        };
        let op = self.worker.next_op();
        let request = Request::Zip {
            op,
            left: self.id,
            right,
            kind: zip_kind::<T, S>(),
        };
        let worker = self.worker.clone();
        self.forward(op, request, move |value| remote_dataset(&worker, value))
    }

    fn forward<R, F>(&self, op: OpId, request: Request, decode: F) -> PartialStream<R>
    where
        R: Send + 'static,
        F: Fn(Value) -> Result<R> + Send + 'static,
    {
        let (emitter, stream) = partial::channel();
        let worker = self.worker.clone();
        info!(worker = worker.name(), op, dataset = self.id, "forwarding request");
        let spawned = thread::Builder::new()
            .name(format!("remote-{op}"))
            .spawn(move || relay(&worker, op, request, emitter, decode));
        if let Err(e) = spawned {
            warn!(op, error = %e, "failed to spawn relay thread");
        }
        stream
    }
}

/// Forward the request and republish the worker's replies until a terminal
/// reply, a disconnect, or cancellation.
fn relay<R, F>(worker: &WorkerHandle, op: OpId, request: Request, emitter: Emitter<R>, decode: F)
where
    F: Fn(Value) -> Result<R>,
{
    let (tx, rx) = unbounded();
    if let Err(e) = worker.submit(&request, tx) {
        emitter.fail(e);
        return;
    }
    let poll = worker.config().poll_interval();
    loop {
        if emitter.is_cancelled() {
            worker.cancel(op);
            return;
        }
        let bytes = match rx.recv_timeout(poll) {
            Ok(bytes) => bytes,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                warn!(worker = worker.name(), op, "worker dropped the operation");
                emitter.fail(Error::Disconnected(format!(
                    "worker {} dropped operation {op}",
                    worker.name()
                )));
                return;
            }
        };
        let reply = match Reply::decode(&bytes) {
            Ok(reply) => reply,
            Err(e) => {
                worker.cancel(op);
                emitter.fail(e);
                return;
            }
        };
        match reply {
            Reply::Partial { done, value, .. } => match decode(value) {
                Ok(value) => {
                    if !emitter.partial(done, value) {
                        worker.cancel(op);
                        return;
                    }
                }
                Err(e) => {
                    worker.cancel(op);
                    emitter.fail(e);
                    return;
                }
            },
            Reply::Completed { .. } => {
                debug!(worker = worker.name(), op, "remote operation completed");
                emitter.complete();
                return;
            }
            Reply::Failed { error, .. } => {
                emitter.fail(Error::Remote(error));
                return;
            }
        }
    }
}

fn remote_dataset<S: Send + Sync + 'static>(worker: &WorkerHandle, value: Value) -> Result<Option<DataSet<S>>> {
    let id: Option<DataSetId> = serde_json::from_value(value)?;
    Ok(id.map(|id| worker.dataset(id)))
}
