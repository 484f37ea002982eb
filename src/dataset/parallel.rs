use std::mem;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::Select;
use tracing::{debug, warn};

use super::{shape_of, DataSet, DataSetStream, Zipped};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::partial::{self, disconnected, CancellationToken, Emitter, PartialStream, Signal};
use crate::sketch::{Map, Sketch};

/// Composite dataset over an ordered list of children.
///
/// Operations are dispatched to every child at once and the child streams are
/// merged on a dedicated thread. Sketch values are released upstream in child
/// index order: values of a child are held back until every earlier child has
/// completed, so the folded result does not depend on which child finishes
/// first. Progress is forwarded as soon as it arrives, scaled by the child's
/// weight.
pub struct ParallelDataSet<T> {
    children: Arc<Vec<DataSet<T>>>,
    weights: Arc<Vec<f64>>,
    config: EngineConfig,
}

impl<T> Clone for ParallelDataSet<T> {
    fn clone(&self) -> Self {
        Self {
            children: self.children.clone(),
            weights: self.weights.clone(),
            config: self.config.clone(),
        }
    }
}

impl<T> ParallelDataSet<T> {
    pub fn children(&self) -> &[DataSet<T>] {
        &self.children
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

impl<T: Send + Sync + 'static> ParallelDataSet<T> {
    /// Children weigh the same share of the work.
    pub fn new(children: Vec<DataSet<T>>, config: &EngineConfig) -> Result<Self> {
        if children.is_empty() {
            return Err(Error::invalid("children", "a parallel dataset needs at least one child"));
        }
        let share = 1.0 / children.len() as f64;
        Ok(Self {
            weights: Arc::new(vec![share; children.len()]),
            children: Arc::new(children),
            config: config.clone(),
        })
    }

    /// Set each child's share of the total work; weights are normalized.
    pub fn with_weights(mut self, weights: Vec<f64>) -> Result<Self> {
        if weights.len() != self.children.len() {
            return Err(Error::invalid(
                "weights",
                format!("expected {} weights, got {}", self.children.len(), weights.len()),
            ));
        }
        if weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
            return Err(Error::invalid("weights", "weights must be positive and finite"));
        }
        let total: f64 = weights.iter().sum();
        self.weights = Arc::new(weights.into_iter().map(|w| w / total).collect());
        Ok(self)
    }

    pub fn sketch<S: Sketch<T>>(&self, sketch: Arc<S>) -> PartialStream<S::Output> {
        debug!(children = self.children.len(), "dispatching sketch");
        let streams = self
            .children
            .iter()
            .map(|c| c.sketch(sketch.clone()))
            .collect::<Vec<_>>();
        let merge = SketchMerge::new(sketch, self.weights.clone(), self.config.bundle_interval());
        self.spawn_merge("parallel-sketch", streams, merge)
    }

    pub fn map<M: Map<T>>(&self, map: Arc<M>) -> DataSetStream<M::Output> {
        let streams = self.children.iter().map(|c| c.map(map.clone())).collect();
        self.collect_children("parallel-map", streams)
    }

    pub fn flat_map<M, S>(&self, map: Arc<M>) -> DataSetStream<S>
    where
        M: Map<T, Output = Vec<S>>,
        S: Send + Sync + 'static,
    {
        let streams = self.children.iter().map(|c| c.flat_map(map.clone())).collect();
        self.collect_children("parallel-flat-map", streams)
    }

    pub fn zip<S: Send + Sync + 'static>(&self, other: &DataSet<S>) -> DataSetStream<Zipped<T, S>> {
        let others = match other {
            DataSet::Parallel(p) if p.children.len() == self.children.len() => p.children.clone(),
            _ => {
                return partial::failed(Error::ShapeMismatch(format!(
                    "cannot zip parallel({}) with {}",
                    self.children.len(),
                    shape_of(other)
                )))
            }
        };
        let streams = self
            .children
            .iter()
            .zip(others.iter())
            .map(|(l, r)| l.zip(r))
            .collect();
        self.collect_children("parallel-zip", streams)
    }

    /// Gather the datasets produced by each child into a new parallel
    /// dataset with the same weights.
    fn collect_children<S: Send + Sync + 'static>(
        &self,
        name: &'static str,
        streams: Vec<DataSetStream<S>>,
    ) -> DataSetStream<S> {
        let collect = CollectChildren {
            produced: (0..streams.len()).map(|_| None).collect(),
            weights: self.weights.clone(),
            config: self.config.clone(),
        };
        self.spawn_merge(name, streams, collect)
    }

    fn spawn_merge<R, M>(&self, name: &'static str, streams: Vec<PartialStream<R>>, mut merge: M) -> PartialStream<R>
    where
        R: Send + 'static,
        M: Merge<R> + Send + 'static,
    {
        let (emitter, stream) = partial::channel();
        let poll = self.config.poll_interval();
        let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
            let token = emitter.token().clone();
            match fan_in(streams, poll, &token, |event| merge.on_event(event, &emitter)) {
                Outcome::Completed => match merge.finish(&emitter) {
                    Ok(()) => emitter.complete(),
                    Err(e) => emitter.fail(e),
                },
                Outcome::Failed(e) => {
                    warn!(name, error = %e, "child failed");
                    emitter.fail(e);
                }
                Outcome::Cancelled => debug!(name, "cancelled"),
            }
        });
        if let Err(e) = spawned {
            warn!(name, error = %e, "failed to spawn merge thread");
        }
        stream
    }
}

pub(crate) enum Event<R> {
    Signal(usize, Signal<R>),
    /// No child produced anything within the poll interval.
    Tick,
}

pub(crate) enum Flow {
    Continue,
    Fail(Error),
    Cancel,
}

pub(crate) enum Outcome {
    Completed,
    Failed(Error),
    Cancelled,
}

/// Serialize the signals of `children` into `handle` until all completed.
///
/// On failure the remaining children are detached and keep running; on
/// cancellation they are cancelled.
pub(crate) fn fan_in<R, F>(
    children: Vec<PartialStream<R>>,
    poll: Duration,
    token: &CancellationToken,
    mut handle: F,
) -> Outcome
where
    F: FnMut(Event<R>) -> Flow,
{
    let mut live: Vec<Option<PartialStream<R>>> = children.into_iter().map(Some).collect();
    loop {
        if token.is_cancelled() {
            return Outcome::Cancelled;
        }
        let event = {
            let mut select = Select::new();
            let mut slots = Vec::with_capacity(live.len());
            for (i, child) in live.iter().enumerate() {
                if let Some(child) = child {
                    select.recv(child.receiver());
                    slots.push((i, child.receiver()));
                }
            }
            if slots.is_empty() {
                return Outcome::Completed;
            }
            match select.select_timeout(poll) {
                Ok(oper) => {
                    let (i, rx) = slots[oper.index()];
                    let signal = oper.recv(rx).unwrap_or_else(|_| disconnected());
                    Event::Signal(i, signal)
                }
                Err(_) => Event::Tick,
            }
        };
        if let Event::Signal(i, signal) = &event {
            if signal.is_terminal() {
                if let Some(mut child) = live[*i].take() {
                    child.observe(signal);
                }
            }
        }
        match handle(event) {
            Flow::Continue => {}
            Flow::Fail(e) => {
                for child in live.into_iter().flatten() {
                    child.detach();
                }
                return Outcome::Failed(e);
            }
            Flow::Cancel => return Outcome::Cancelled,
        }
    }
}

/// Per-operation merge policy run on the merge thread.
pub(crate) trait Merge<R> {
    fn on_event(&mut self, event: Event<R>, emitter: &Emitter<R>) -> Flow;

    /// Called once after every child completed.
    fn finish(&mut self, emitter: &Emitter<R>) -> Result<()>;
}

struct SketchMerge<T, S: Sketch<T>> {
    sketch: Arc<S>,
    weights: Arc<Vec<f64>>,
    /// Values of children that may not release yet.
    pending: Vec<S::Output>,
    completed: Vec<bool>,
    /// Lowest child that has not completed; only it releases values directly.
    next_turn: usize,
    bundle: Bundle<S::Output>,
    _partition: std::marker::PhantomData<fn(&T)>,
}

impl<T, S: Sketch<T>> SketchMerge<T, S> {
    fn new(sketch: Arc<S>, weights: Arc<Vec<f64>>, interval: Duration) -> Self {
        let n = weights.len();
        Self {
            pending: (0..n).map(|_| sketch.zero()).collect(),
            completed: vec![false; n],
            next_turn: 0,
            bundle: Bundle::new(interval),
            sketch,
            weights,
            _partition: std::marker::PhantomData,
        }
    }

    fn release(&mut self, done: f64, values: Vec<S::Output>, emitter: &Emitter<S::Output>) -> Result<bool> {
        let sketch = &self.sketch;
        let add = |l: &S::Output, r: &S::Output| sketch.add(l, r);
        if values.is_empty() {
            if done > 0.0 {
                return self.bundle.push(done, sketch.zero(), emitter, add);
            }
            return Ok(true);
        }
        let mut done = done;
        for value in values {
            if !self.bundle.push(done, value, emitter, add)? {
                return Ok(false);
            }
            done = 0.0;
        }
        Ok(true)
    }

    fn on_signal(&mut self, child: usize, signal: Signal<S::Output>, emitter: &Emitter<S::Output>) -> Result<Flow> {
        let mut released = Vec::new();
        let mut done = 0.0;
        match signal {
            Signal::Partial(p) => {
                done = p.delta_done * self.weights[child];
                if child == self.next_turn {
                    released.push(p.delta_value);
                } else {
                    self.pending[child] = self.sketch.add(&self.pending[child], &p.delta_value)?;
                }
            }
            Signal::Completed => {
                self.completed[child] = true;
                while self.next_turn < self.completed.len() && self.completed[self.next_turn] {
                    self.next_turn += 1;
                    if self.next_turn < self.pending.len() {
                        let zero = self.sketch.zero();
                        released.push(mem::replace(&mut self.pending[self.next_turn], zero));
                    }
                }
            }
            Signal::Failed(e) => return Ok(Flow::Fail(e)),
        }
        if self.release(done, released, emitter)? {
            Ok(Flow::Continue)
        } else {
            Ok(Flow::Cancel)
        }
    }
}

impl<T, S: Sketch<T>> Merge<S::Output> for SketchMerge<T, S> {
    fn on_event(&mut self, event: Event<S::Output>, emitter: &Emitter<S::Output>) -> Flow {
        let result = match event {
            Event::Signal(child, signal) => self.on_signal(child, signal, emitter),
            Event::Tick if self.bundle.flush_if_due(emitter) => Ok(Flow::Continue),
            Event::Tick => Ok(Flow::Cancel),
        };
        result.unwrap_or_else(Flow::Fail)
    }

    fn finish(&mut self, emitter: &Emitter<S::Output>) -> Result<()> {
        self.bundle.flush(emitter);
        Ok(())
    }
}

/// Coalesces partial results arriving within `interval` of each other.
struct Bundle<R> {
    interval: Duration,
    buffered: Option<(f64, R, Instant)>,
}

impl<R> Bundle<R> {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            buffered: None,
        }
    }

    /// Forward or buffer one partial. Returns `false` once the consumer is gone.
    fn push<F>(&mut self, done: f64, value: R, emitter: &Emitter<R>, add: F) -> Result<bool>
    where
        F: Fn(&R, &R) -> Result<R>,
    {
        if self.interval.is_zero() {
            return Ok(emitter.partial(done, value));
        }
        self.buffered = Some(match self.buffered.take() {
            Some((d, v, since)) => (d + done, add(&v, &value)?, since),
            None => (done, value, Instant::now()),
        });
        Ok(self.flush_if_due(emitter))
    }

    fn flush_if_due(&mut self, emitter: &Emitter<R>) -> bool {
        match &self.buffered {
            Some((_, _, since)) if since.elapsed() >= self.interval => self.flush(emitter),
            _ => !emitter.is_cancelled(),
        }
    }

    fn flush(&mut self, emitter: &Emitter<R>) -> bool {
        match self.buffered.take() {
            Some((done, value, _)) => emitter.partial(done, value),
            None => !emitter.is_cancelled(),
        }
    }
}

struct CollectChildren<S> {
    produced: Vec<Option<DataSet<S>>>,
    weights: Arc<Vec<f64>>,
    config: EngineConfig,
}

impl<S: Send + Sync + 'static> Merge<Option<DataSet<S>>> for CollectChildren<S> {
    fn on_event(&mut self, event: Event<Option<DataSet<S>>>, emitter: &Emitter<Option<DataSet<S>>>) -> Flow {
        match event {
            Event::Signal(child, Signal::Partial(p)) => {
                if let Some(ds) = p.delta_value {
                    self.produced[child] = Some(ds);
                }
                let done = p.delta_done * self.weights[child];
                if done > 0.0 && !emitter.partial(done, None) {
                    return Flow::Cancel;
                }
                Flow::Continue
            }
            Event::Signal(_, Signal::Failed(e)) => Flow::Fail(e),
            Event::Signal(_, Signal::Completed) | Event::Tick => {
                if emitter.is_cancelled() {
                    Flow::Cancel
                } else {
                    Flow::Continue
                }
            }
        }
    }

    fn finish(&mut self, emitter: &Emitter<Option<DataSet<S>>>) -> Result<()> {
        let children = mem::take(&mut self.produced)
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::Execution("a child finished without producing a dataset".to_string()))?;
        let weights = self.weights.to_vec();
        let parallel = ParallelDataSet::new(children, &self.config)?.with_weights(weights)?;
        emitter.partial(0.0, Some(DataSet::Parallel(parallel)));
        Ok(())
    }
}
