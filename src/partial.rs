//! Partial-result streams.
//!
//! Every dataset operation answers with a [`PartialStream`]: an ordered
//! sequence of [`PartialResult`]s terminated by exactly one `Completed` or
//! `Failed` signal. Each partial carries the fraction of the total work it
//! accounts for and an increment that the consumer folds with the sketch's
//! `add` to obtain the running total.
//!
//! Producers hold the matching [`Emitter`]. Cancellation is cooperative: the
//! consumer flips a shared [`CancellationToken`] (explicitly, by dropping the
//! stream, or when a deadline elapses) and producers check it between units
//! of work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PartialResult<R> {
    /// Share of the total work covered by this increment.
    pub delta_done: f64,
    /// Increment of the result; not cumulative.
    pub delta_value: R,
}

impl<R> PartialResult<R> {
    pub fn new(delta_done: f64, delta_value: R) -> Self {
        Self {
            delta_done,
            delta_value,
        }
    }
}

#[derive(Debug)]
pub enum Signal<R> {
    Partial(PartialResult<R>),
    Completed,
    Failed(Error),
}

impl<R> Signal<R> {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Signal::Partial(_))
    }
}

#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Producing side of a partial-result stream.
#[derive(Debug)]
pub struct Emitter<R> {
    tx: Sender<Signal<R>>,
    token: CancellationToken,
}

impl<R> Emitter<R> {
    /// Send a partial result. Returns `false` once the consumer is gone or has
    /// cancelled, in which case the producer should stop.
    pub fn partial(&self, delta_done: f64, delta_value: R) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.tx
            .send(Signal::Partial(PartialResult::new(delta_done, delta_value)))
            .is_ok()
    }

    pub fn complete(self) {
        let _ = self.tx.send(Signal::Completed);
    }

    pub fn fail(self, error: Error) {
        let _ = self.tx.send(Signal::Failed(error));
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Create a connected emitter and stream.
pub fn channel<R>() -> (Emitter<R>, PartialStream<R>) {
    let (tx, rx) = unbounded();
    let token = CancellationToken::new();
    let emitter = Emitter {
        tx,
        token: token.clone(),
    };
    let stream = PartialStream {
        rx,
        token,
        deadline: None,
        finished: false,
        cancel_on_drop: true,
    };
    (emitter, stream)
}

/// Stream that fails immediately, before any work has started.
pub fn failed<R>(error: Error) -> PartialStream<R> {
    let (emitter, stream) = channel();
    emitter.fail(error);
    stream
}

/// Consuming side of a partial-result stream.
///
/// Dropping the stream before it finished cancels the producer.
#[derive(Debug)]
pub struct PartialStream<R> {
    rx: Receiver<Signal<R>>,
    token: CancellationToken,
    deadline: Option<Instant>,
    finished: bool,
    cancel_on_drop: bool,
}

impl<R> PartialStream<R> {
    /// Fail the stream with [`Error::DeadlineExceeded`] and cancel the
    /// producer if it has not finished within `timeout`.
    pub fn with_deadline(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Next signal, blocking until one arrives. `None` after the terminal
    /// signal or once the stream has been cancelled.
    pub fn next_signal(&mut self) -> Option<Signal<R>> {
        if self.finished || self.token.is_cancelled() {
            self.finished = true;
            return None;
        }
        let signal = match self.deadline {
            Some(deadline) => match self.rx.recv_deadline(deadline) {
                Ok(signal) => signal,
                Err(RecvTimeoutError::Timeout) => {
                    self.token.cancel();
                    Signal::Failed(Error::DeadlineExceeded)
                }
                Err(RecvTimeoutError::Disconnected) => disconnected(),
            },
            None => match self.rx.recv() {
                Ok(signal) => signal,
                Err(_) => disconnected(),
            },
        };
        if signal.is_terminal() {
            self.finished = true;
        }
        Some(signal)
    }

    /// Non-blocking variant of [`PartialStream::next_signal`]; `None` also
    /// when nothing is ready yet.
    pub fn try_next_signal(&mut self) -> Option<Signal<R>> {
        if self.finished || self.token.is_cancelled() {
            return None;
        }
        let signal = match self.rx.try_recv() {
            Ok(signal) => signal,
            Err(e) if e.is_disconnected() => disconnected(),
            Err(_) => return None,
        };
        if signal.is_terminal() {
            self.finished = true;
        }
        Some(signal)
    }

    /// Ask the producer to stop. No more signals are returned.
    pub fn cancel(&mut self) {
        self.token.cancel();
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Stop listening without cancelling the producer; it runs to completion
    /// and its results are discarded.
    pub fn detach(mut self) {
        self.cancel_on_drop = false;
    }

    /// Fold every partial value into `zero` with `add` and return the total.
    pub fn reduce<F>(mut self, zero: R, add: F) -> Result<R>
    where
        F: Fn(&R, &R) -> Result<R>,
    {
        let mut acc = zero;
        while let Some(signal) = self.next_signal() {
            match signal {
                Signal::Partial(p) => acc = add(&acc, &p.delta_value)?,
                Signal::Completed => return Ok(acc),
                Signal::Failed(e) => return Err(e),
            }
        }
        Err(Error::Cancelled)
    }

    /// Last value carried by the stream, e.g. the dataset produced by a map.
    pub fn last_value(mut self) -> Result<Option<R>> {
        let mut last = None;
        while let Some(signal) = self.next_signal() {
            match signal {
                Signal::Partial(p) => last = Some(p.delta_value),
                Signal::Completed => return Ok(last),
                Signal::Failed(e) => return Err(e),
            }
        }
        Err(Error::Cancelled)
    }

    pub(crate) fn receiver(&self) -> &Receiver<Signal<R>> {
        &self.rx
    }

    /// Record a signal received directly from [`PartialStream::receiver`].
    pub(crate) fn observe(&mut self, signal: &Signal<R>) {
        if signal.is_terminal() {
            self.finished = true;
        }
    }
}

impl<R> Iterator for PartialStream<R> {
    type Item = Result<PartialResult<R>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_signal()? {
            Signal::Partial(p) => Some(Ok(p)),
            Signal::Completed => None,
            Signal::Failed(e) => Some(Err(e)),
        }
    }
}

impl<R> Drop for PartialStream<R> {
    fn drop(&mut self) {
        if self.cancel_on_drop && !self.finished {
            self.token.cancel();
        }
    }
}

pub(crate) fn disconnected<R>() -> Signal<R> {
    Signal::Failed(Error::Disconnected(
        "producer dropped without a terminal signal".to_string(),
    ))
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_reduce() {
        let (emitter, stream) = channel::<u64>();
        assert!(emitter.partial(0.5, 3));
        assert!(emitter.partial(0.5, 4));
        emitter.complete();
        assert_eq!(stream.reduce(0, |a, b| Ok(a + b)), Ok(7));
    }

    #[test]
    fn test_failure_is_terminal() {
        let (emitter, mut stream) = channel::<u64>();
        emitter.partial(0.25, 1);
        emitter.fail(Error::Execution("boom".into()));
        assert!(matches!(stream.next(), Some(Ok(_))));
        assert_eq!(stream.next(), Some(Err(Error::Execution("boom".into()))));
        assert_eq!(stream.next(), None);
    }

    #[test]
    fn test_dropped_producer_is_disconnected() {
        let (emitter, stream) = channel::<u64>();
        drop(emitter);
        assert!(matches!(
            stream.reduce(0, |a, b| Ok(a + b)),
            Err(Error::Disconnected(_))
        ));
    }

    #[test]
    fn test_cancel_stops_producer() {
        let (emitter, mut stream) = channel::<u64>();
        let producer = thread::spawn(move || {
            let mut sent = 0;
            while sent < 10_000 && emitter.partial(0.0, 1) {
                sent += 1;
                thread::sleep(Duration::from_millis(1));
            }
            sent
        });
        assert!(matches!(stream.next(), Some(Ok(_))));
        stream.cancel();
        assert_eq!(stream.next(), None);
        assert!(producer.join().unwrap() < 10_000);
    }

    #[test]
    fn test_drop_cancels_but_detach_does_not() {
        let (emitter, stream) = channel::<u64>();
        drop(stream);
        assert!(emitter.is_cancelled());

        let (emitter, stream) = channel::<u64>();
        stream.detach();
        assert!(!emitter.is_cancelled());
    }

    #[test]
    fn test_deadline() {
        let (emitter, stream) = channel::<u64>();
        let mut stream = stream.with_deadline(Duration::from_millis(20));
        assert!(matches!(
            stream.next_signal(),
            Some(Signal::Failed(Error::DeadlineExceeded))
        ));
        assert!(emitter.is_cancelled());
        assert!(stream.next_signal().is_none());
    }
}
