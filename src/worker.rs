//! Remote worker.
//!
//! A [`Worker`] owns a [`Registry`] of datasets and explicit handler tables
//! mapping operation names to typed handlers. [`Worker::spawn`] moves it onto
//! its own thread, where it serves [`Request`]s from a bounded mailbox:
//! submitters block while the mailbox is full. Each streaming request runs on
//! a relay thread that encodes the dataset's partial results as [`Reply`]
//! messages on the request's reply channel.
//!
//! Datasets produced by `map`, `flat_map` and `zip` stay on the worker; the
//! reply carries the id they were registered under.

use std::any::{type_name, Any};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use hashbrown::HashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::dataset::{DataSet, DataSetStream, RemoteDataSet};
use crate::error::{Error, Result};
use crate::partial::{CancellationToken, PartialResult, PartialStream, Signal};
use crate::protocol::{DataSetId, OpId, Reply, Request};
use crate::sketch::{Map, OpSpec, Remotable, Sketch};

/// Datasets held by a worker, by id.
#[derive(Clone, Default)]
pub struct Registry {
    next_id: Arc<AtomicU64>,
    entries: Arc<Mutex<HashMap<DataSetId, Arc<dyn Any + Send + Sync>>>>,
}

impl Registry {
    pub fn insert<T: Send + Sync + 'static>(&self, dataset: DataSet<T>) -> Result<DataSetId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.entries)?.insert(id, Arc::new(dataset));
        Ok(id)
    }

    /// The dataset registered under `id`, if it has partitions of type `T`.
    pub fn get<T: Send + Sync + 'static>(&self, id: DataSetId) -> Result<DataSet<T>> {
        let entry = lock(&self.entries)?
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownDataSet(id))?;
        entry
            .downcast_ref::<DataSet<T>>()
            .cloned()
            .ok_or_else(|| {
                Error::IncompatibleResults(format!(
                    "dataset {id} does not hold partitions of type {}",
                    type_name::<T>()
                ))
            })
    }

    pub fn remove(&self, id: DataSetId) -> Result<bool> {
        Ok(lock(&self.entries)?.remove(&id).is_some())
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).map_or(0, |entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock<V>(mutex: &Mutex<V>) -> Result<MutexGuard<'_, V>> {
    mutex
        .lock()
        .map_err(|_| Error::Execution("worker state lock poisoned".to_string()))
}

/// A running operation with its results erased to JSON values.
struct Running {
    token: CancellationToken,
    signals: Box<dyn Iterator<Item = Signal<Value>> + Send>,
}

fn erase_values<R: Serialize + Send + 'static>(mut stream: PartialStream<R>) -> Running {
    let token = stream.token().clone();
    let signals = std::iter::from_fn(move || {
        stream.next_signal().map(|signal| match signal {
            Signal::Partial(p) => match serde_json::to_value(&p.delta_value) {
                Ok(value) => Signal::Partial(PartialResult::new(p.delta_done, value)),
                Err(e) => Signal::Failed(e.into()),
            },
            Signal::Completed => Signal::Completed,
            Signal::Failed(e) => Signal::Failed(e),
        })
    });
    Running {
        token,
        signals: Box::new(signals),
    }
}

/// Register produced datasets and replace them by their ids.
fn erase_datasets<S: Send + Sync + 'static>(mut stream: DataSetStream<S>, registry: Registry) -> Running {
    let token = stream.token().clone();
    let signals = std::iter::from_fn(move || {
        stream.next_signal().map(|signal| match signal {
            Signal::Partial(p) => match p.delta_value {
                None => Signal::Partial(PartialResult::new(p.delta_done, Value::Null)),
                Some(ds) => match registry.insert(ds) {
                    Ok(id) => Signal::Partial(PartialResult::new(p.delta_done, Value::from(id))),
                    Err(e) => Signal::Failed(e),
                },
            },
            Signal::Completed => Signal::Completed,
            Signal::Failed(e) => Signal::Failed(e),
        })
    });
    Running {
        token,
        signals: Box::new(signals),
    }
}

type OpHandler = Box<dyn Fn(&Registry, DataSetId, &OpSpec) -> Result<Running> + Send + Sync>;
type ZipHandler = Box<dyn Fn(&Registry, DataSetId, DataSetId) -> Result<Running> + Send + Sync>;

/// Name a zip handler is registered under.
pub(crate) fn zip_kind<T, S>() -> String {
    format!("{}|{}", type_name::<T>(), type_name::<S>())
}

pub struct Worker {
    name: String,
    config: EngineConfig,
    registry: Registry,
    sketches: HashMap<String, OpHandler>,
    maps: HashMap<String, OpHandler>,
    flat_maps: HashMap<String, OpHandler>,
    zips: HashMap<String, ZipHandler>,
}

impl Worker {
    pub fn new(name: impl Into<String>, config: &EngineConfig) -> Self {
        Self {
            name: name.into(),
            config: config.clone(),
            registry: Registry::default(),
            sketches: HashMap::new(),
            maps: HashMap::new(),
            flat_maps: HashMap::new(),
            zips: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Serve a dataset; returns the id remote proxies address it by.
    pub fn insert<T: Send + Sync + 'static>(&self, dataset: DataSet<T>) -> Result<DataSetId> {
        self.registry.insert(dataset)
    }

    pub fn register_sketch<T, S>(mut self) -> Self
    where
        T: Send + Sync + 'static,
        S: Sketch<T> + Remotable,
    {
        let handler: OpHandler = Box::new(|registry: &Registry, dataset: DataSetId, spec: &OpSpec| {
            let ds = registry.get::<T>(dataset)?;
            let sketch: S = spec.decode()?;
            Ok(erase_values(ds.sketch(Arc::new(sketch))))
        });
        self.sketches.insert(S::registered_name(), handler);
        self
    }

    pub fn register_map<T, M>(mut self) -> Self
    where
        T: Send + Sync + 'static,
        M: Map<T> + Remotable,
    {
        let handler: OpHandler = Box::new(|registry: &Registry, dataset: DataSetId, spec: &OpSpec| {
            let ds = registry.get::<T>(dataset)?;
            let map: M = spec.decode()?;
            Ok(erase_datasets(ds.map(Arc::new(map)), registry.clone()))
        });
        self.maps.insert(M::registered_name(), handler);
        self
    }

    pub fn register_flat_map<T, M, S>(mut self) -> Self
    where
        T: Send + Sync + 'static,
        S: Send + Sync + 'static,
        M: Map<T, Output = Vec<S>> + Remotable,
    {
        let handler: OpHandler = Box::new(|registry: &Registry, dataset: DataSetId, spec: &OpSpec| {
            let ds = registry.get::<T>(dataset)?;
            let map: M = spec.decode()?;
            Ok(erase_datasets(ds.flat_map(Arc::new(map)), registry.clone()))
        });
        self.flat_maps.insert(M::registered_name(), handler);
        self
    }

    pub fn register_zip<T, S>(mut self) -> Self
    where
        T: Send + Sync + 'static,
        S: Send + Sync + 'static,
    {
        let handler: ZipHandler = Box::new(|registry: &Registry, left: DataSetId, right: DataSetId| {
            let left = registry.get::<T>(left)?;
            let right = registry.get::<S>(right)?;
            Ok(erase_datasets(left.zip(&right), registry.clone()))
        });
        self.zips.insert(zip_kind::<T, S>(), handler);
        self
    }

    /// Start serving on a dedicated thread.
    pub fn spawn(self) -> Result<WorkerHandle> {
        let (mailbox, requests) = bounded(self.config.mailbox_capacity);
        let name = self.name.clone();
        let config = self.config.clone();
        let thread = thread::Builder::new()
            .name(format!("worker-{name}"))
            .spawn(move || self.serve(requests))
            .map_err(|e| Error::Execution(format!("cannot spawn worker {name}: {e}")))?;
        Ok(WorkerHandle {
            inner: Arc::new(HandleInner {
                name,
                config,
                mailbox,
                next_op: AtomicU64::new(1),
                thread: Mutex::new(Some(thread)),
            }),
        })
    }

    fn serve(self, requests: Receiver<Envelope>) {
        info!(worker = %self.name, "worker started");
        let active: Arc<Mutex<HashMap<OpId, CancellationToken>>> = Arc::default();
        for envelope in requests.iter() {
            let request = match Request::decode(&envelope.request) {
                Ok(request) => request,
                Err(e) => {
                    warn!(worker = %self.name, error = %e, "undecodable request");
                    if let Some(reply) = &envelope.reply {
                        send_reply(reply, &Reply::Failed { op: 0, error: e.to_string() });
                    }
                    continue;
                }
            };
            let (op, running) = match request {
                Request::Shutdown => break,
                Request::Cancel { op } => {
                    debug!(worker = %self.name, op, "cancel requested");
                    if let Ok(mut active) = lock(&active) {
                        if let Some(token) = active.remove(&op) {
                            token.cancel();
                        }
                    }
                    continue;
                }
                Request::Release { dataset } => {
                    match self.registry.remove(dataset) {
                        Ok(true) => debug!(worker = %self.name, dataset, "released dataset"),
                        Ok(false) => debug!(worker = %self.name, dataset, "release of unknown dataset"),
                        Err(e) => warn!(worker = %self.name, dataset, error = %e, "release failed"),
                    }
                    continue;
                }
                Request::Sketch { op, dataset, spec } => (op, dispatch(&self.sketches, &spec, |h| h(&self.registry, dataset, &spec))),
                Request::Map { op, dataset, spec } => (op, dispatch(&self.maps, &spec, |h| h(&self.registry, dataset, &spec))),
                Request::FlatMap { op, dataset, spec } => (op, dispatch(&self.flat_maps, &spec, |h| h(&self.registry, dataset, &spec))),
                Request::Zip { op, left, right, kind } => (
                    op,
                    self.zips
                        .get(&kind)
                        .ok_or(Error::UnknownOperation(kind))
                        .and_then(|h| h(&self.registry, left, right)),
                ),
            };
            let Some(reply) = envelope.reply else {
                warn!(worker = %self.name, op, "streaming request without a reply channel");
                continue;
            };
            match running {
                Ok(running) => self.relay(op, running, reply, &active),
                Err(e) => {
                    warn!(worker = %self.name, op, error = %e, "request rejected");
                    send_reply(&reply, &Reply::Failed { op, error: e.to_string() });
                }
            }
        }
        if let Ok(mut active) = lock(&active) {
            for (_, token) in active.drain() {
                token.cancel();
            }
        }
        info!(worker = %self.name, "worker stopped");
    }

    /// Stream the operation's signals to `reply` on a dedicated thread.
    fn relay(&self, op: OpId, running: Running, reply: Sender<Vec<u8>>, active: &Arc<Mutex<HashMap<OpId, CancellationToken>>>) {
        let Running { token, signals } = running;
        if let Ok(mut active) = lock(active) {
            active.insert(op, token.clone());
        }
        let active = active.clone();
        let worker = self.name.clone();
        let spawned = thread::Builder::new()
            .name(format!("worker-op-{op}"))
            .spawn(move || {
                for signal in signals {
                    let message = match signal {
                        Signal::Partial(p) => Reply::Partial {
                            op,
                            done: p.delta_done,
                            value: p.delta_value,
                        },
                        Signal::Completed => Reply::Completed { op },
                        Signal::Failed(e) => Reply::Failed { op, error: e.to_string() },
                    };
                    let terminal = !matches!(message, Reply::Partial { .. });
                    if !send_reply(&reply, &message) {
                        debug!(worker = %worker, op, "client went away");
                        token.cancel();
                        break;
                    }
                    if terminal {
                        break;
                    }
                }
                if let Ok(mut active) = lock(&active) {
                    active.remove(&op);
                }
            });
        if let Err(e) = spawned {
            warn!(worker = %self.name, op, error = %e, "failed to spawn relay thread");
        }
    }
}

fn dispatch<F>(handlers: &HashMap<String, OpHandler>, spec: &OpSpec, run: F) -> Result<Running>
where
    F: FnOnce(&OpHandler) -> Result<Running>,
{
    handlers
        .get(&spec.name)
        .ok_or_else(|| Error::UnknownOperation(spec.name.clone()))
        .and_then(run)
}

/// Encode and send one reply; `false` when the receiver is gone.
fn send_reply(reply: &Sender<Vec<u8>>, message: &Reply) -> bool {
    let bytes = match message.encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            let fallback = Reply::Failed {
                op: message.op(),
                error: e.to_string(),
            };
            match fallback.encode() {
                Ok(bytes) => bytes,
                Err(_) => return false,
            }
        }
    };
    reply.send(bytes).is_ok()
}

/// One encoded request and the channel its replies go to.
pub(crate) struct Envelope {
    request: Vec<u8>,
    reply: Option<Sender<Vec<u8>>>,
}

struct HandleInner {
    name: String,
    config: EngineConfig,
    mailbox: Sender<Envelope>,
    next_op: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable client side of a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
    inner: Arc<HandleInner>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Proxy for the dataset registered under `id`.
    pub fn dataset<T: Send + Sync + 'static>(&self, id: DataSetId) -> DataSet<T> {
        DataSet::Remote(RemoteDataSet::new(self.clone(), id))
    }

    pub fn same_worker(&self, other: &WorkerHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn next_op(&self) -> OpId {
        self.inner.next_op.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue a request whose replies go to `reply`; blocks while the mailbox
    /// is full.
    pub fn submit(&self, request: &Request, reply: Sender<Vec<u8>>) -> Result<()> {
        self.post(request.encode()?, Some(reply))
    }

    /// Queue raw request bytes.
    pub fn submit_bytes(&self, request: Vec<u8>, reply: Sender<Vec<u8>>) -> Result<()> {
        self.post(request, Some(reply))
    }

    fn post(&self, request: Vec<u8>, reply: Option<Sender<Vec<u8>>>) -> Result<()> {
        self.inner
            .mailbox
            .send(Envelope { request, reply })
            .map_err(|_| Error::Disconnected(format!("worker {} is not running", self.inner.name)))
    }

    /// Drop dataset `id` from the worker. Queued after any request already
    /// submitted, so earlier operations on it still see the dataset.
    pub fn release(&self, id: DataSetId) -> Result<()> {
        self.post(Request::Release { dataset: id }.encode()?, None)
    }

    /// Best-effort cancellation; dropped when the mailbox is full.
    pub(crate) fn cancel(&self, op: OpId) {
        let Ok(request) = (Request::Cancel { op }).encode() else {
            return;
        };
        match self.inner.mailbox.try_send(Envelope { request, reply: None }) {
            Ok(()) => debug!(worker = %self.inner.name, op, "sent cancel"),
            Err(TrySendError::Full(_)) => warn!(worker = %self.inner.name, op, "mailbox full, cancel dropped"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Stop the worker and wait for its thread. Running operations are
    /// cancelled and their clients see a disconnect.
    pub fn shutdown(&self) -> Result<()> {
        self.post(Request::Shutdown.encode()?, None)?;
        let thread = lock(&self.inner.thread)?.take();
        if let Some(thread) = thread {
            thread
                .join()
                .map_err(|_| Error::Panicked(format!("worker {} thread", self.inner.name)))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle").field("name", &self.inner.name).finish()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::dataset::tests::Sum;
    use crossbeam::channel::unbounded;

    #[test]
    fn test_registry_typed_lookup() {
        let config = EngineConfig::default();
        let registry = Registry::default();
        let id = registry.insert(DataSet::local(vec![1u64], &config)).unwrap();
        assert!(registry.get::<Vec<u64>>(id).is_ok());
        assert!(matches!(
            registry.get::<String>(id),
            Err(Error::IncompatibleResults(_))
        ));
        assert_eq!(registry.get::<Vec<u64>>(id + 1).err(), Some(Error::UnknownDataSet(id + 1)));
        assert_eq!(registry.remove(id), Ok(true));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_operation_and_garbage() {
        let config = EngineConfig::default();
        let worker = Worker::new("w", &config);
        let id = worker.insert(DataSet::local(vec![1u64], &config)).unwrap();
        let handle = worker.spawn().unwrap();

        let (tx, rx) = unbounded();
        let request = Request::Sketch {
            op: 1,
            dataset: id,
            spec: OpSpec::of("nope", &()).unwrap(),
        };
        handle.submit(&request, tx.clone()).unwrap();
        let reply = Reply::decode(&rx.recv().unwrap()).unwrap();
        assert_eq!(
            reply,
            Reply::Failed {
                op: 1,
                error: Error::UnknownOperation("nope".into()).to_string()
            }
        );

        handle.submit_bytes(b"{not json".to_vec(), tx).unwrap();
        assert!(matches!(
            Reply::decode(&rx.recv().unwrap()),
            Ok(Reply::Failed { op: 0, .. })
        ));
        handle.shutdown().unwrap();
    }

    #[test]
    fn test_release_removes_dataset() {
        let config = EngineConfig::default();
        let worker = Worker::new("w", &config);
        let kept = worker.insert(DataSet::local(vec![1u64], &config)).unwrap();
        let released = worker.insert(DataSet::local(vec![2u64], &config)).unwrap();
        let registry = worker.registry().clone();
        let handle = worker.spawn().unwrap();

        handle.release(released).unwrap();
        // mailbox is served in order, so this reply comes after the release
        let (tx, rx) = unbounded();
        let request = Request::Sketch {
            op: 1,
            dataset: kept,
            spec: OpSpec::of("nope", &()).unwrap(),
        };
        handle.submit(&request, tx).unwrap();
        rx.recv().unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get::<Vec<u64>>(kept).is_ok());
        assert_eq!(
            registry.get::<Vec<u64>>(released).err(),
            Some(Error::UnknownDataSet(released))
        );
        handle.shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_disconnects_submitters() {
        let handle = Worker::new("w", &EngineConfig::default()).spawn().unwrap();
        handle.shutdown().unwrap();
        let (tx, _rx) = unbounded();
        assert!(matches!(
            handle.submit(&Request::Cancel { op: 1 }, tx),
            Err(Error::Disconnected(_))
        ));
        let ds = handle.dataset::<Vec<u64>>(0);
        assert!(matches!(
            ds.blocking_sketch(Arc::new(Sum)),
            Err(Error::NotRemotable(_))
        ));
    }
}
