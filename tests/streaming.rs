use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sketch_dataset::{
    BasicColStatSketch, DataSet, EngineConfig, Error, PartialStream, Result, Signal, Sketch, Table,
};

fn partitions(parts: usize, rows: i64) -> Vec<Table> {
    Table::builder()
        .integers("x", 0..rows)
        .build()
        .unwrap()
        .split(parts)
        .unwrap()
}

/// Row count of a partition after sleeping `delay` per call; panics or fails
/// on request.
struct Slow {
    delay: Duration,
    panic_on: Option<usize>,
    fail_on: Option<usize>,
}

impl Slow {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            panic_on: None,
            fail_on: None,
        }
    }
}

impl Sketch<Table> for Slow {
    type Output = u64;

    fn zero(&self) -> u64 {
        0
    }

    fn create(&self, data: &Table) -> Result<u64> {
        thread::sleep(self.delay);
        let first = data.rows().next().unwrap_or(0);
        if self.panic_on == Some(first) {
            panic!("partition starting at {first}");
        }
        if self.fail_on == Some(first) {
            return Err(Error::Execution(format!("partition starting at {first}")));
        }
        Ok(data.num_rows() as u64)
    }

    fn add(&self, left: &u64, right: &u64) -> Result<u64> {
        Ok(left + right)
    }
}

fn drain<R>(mut stream: PartialStream<R>) -> (Vec<(f64, R)>, Option<Signal<R>>) {
    let mut partials = Vec::new();
    while let Some(signal) = stream.next_signal() {
        match signal {
            Signal::Partial(p) => partials.push((p.delta_done, p.delta_value)),
            terminal => return (partials, Some(terminal)),
        }
    }
    (partials, None)
}

#[test]
fn test_progress_adds_up() {
    let config = EngineConfig::default();
    let ds = DataSet::from_partitions(partitions(10, 1_000), &config).unwrap();
    let (partials, terminal) = drain(ds.sketch(Arc::new(Slow::new(Duration::ZERO))));
    assert!(partials.len() >= 10);
    let done: f64 = partials.iter().map(|(d, _)| d).sum();
    assert!((done - 1.0).abs() < 1e-9);
    assert_eq!(partials.iter().map(|(_, v)| v).sum::<u64>(), 1_000);
    assert!(matches!(terminal, Some(Signal::Completed)));
}

#[test]
fn test_cancel_after_three_partials() {
    let config = EngineConfig::default();
    let ds = DataSet::from_partitions(partitions(10, 1_000), &config).unwrap();
    let mut stream = ds.sketch(Arc::new(Slow::new(Duration::from_millis(20))));
    let mut received = 0;
    while let Some(signal) = stream.next_signal() {
        match signal {
            Signal::Partial(_) => {
                received += 1;
                if received == 3 {
                    stream.cancel();
                }
            }
            other => panic!("unexpected terminal signal {other:?}"),
        }
    }
    assert_eq!(received, 3);
    assert!(stream.token().is_cancelled());
    assert!(stream.next_signal().is_none());
}

#[test]
fn test_single_leaf_emits_one_partial() {
    let config = EngineConfig::default().with_local_threads(false);
    let ds = DataSet::local(partitions(1, 100).remove(0), &config);
    let (partials, terminal) = drain(ds.sketch(Arc::new(BasicColStatSketch::new("x", 1))));
    assert_eq!(partials.len(), 1);
    assert_eq!(partials[0].0, 1.0);
    assert_eq!(partials[0].1.row_count(), 100);
    assert!(matches!(terminal, Some(Signal::Completed)));
}

#[test]
fn test_failure_and_panic_end_the_stream() {
    let config = EngineConfig::default();
    let ds = DataSet::from_partitions(partitions(4, 400), &config).unwrap();

    let failing = Slow {
        fail_on: Some(200),
        ..Slow::new(Duration::ZERO)
    };
    assert_eq!(
        ds.blocking_sketch(Arc::new(failing)),
        Err(Error::Execution("partition starting at 200".into()))
    );

    let panicking = Slow {
        panic_on: Some(100),
        ..Slow::new(Duration::ZERO)
    };
    assert!(matches!(ds.blocking_sketch(Arc::new(panicking)), Err(Error::Panicked(_))));
}

#[test]
fn test_deadline() {
    let config = EngineConfig::default();
    let ds = DataSet::from_partitions(partitions(2, 10), &config).unwrap();
    let stream = ds
        .sketch(Arc::new(Slow::new(Duration::from_millis(500))))
        .with_deadline(Duration::from_millis(20));
    assert_eq!(stream.reduce(0, |a, b| Ok(a + b)), Err(Error::DeadlineExceeded));
}

#[test]
fn test_unknown_column_fails_before_results() {
    let config = EngineConfig::default();
    let ds = DataSet::from_partitions(partitions(3, 30), &config).unwrap();
    let (partials, terminal) = drain(ds.sketch(Arc::new(BasicColStatSketch::new("missing", 1))));
    assert!(partials.is_empty());
    assert!(matches!(terminal, Some(Signal::Failed(Error::UnknownColumn(c))) if c == "missing"));
}
