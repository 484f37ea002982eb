//! Progressive histogram over a table split between local partitions and a
//! worker, printing the running answer as partial results arrive.
//!
//! Run with `RUST_LOG=debug` to see dataset and worker events.

use std::sync::Arc;

use sketch_dataset::{
    BucketDescriptor, DataSet, EngineConfig, HistogramSketch, HllSketch, Result, Signal, Sketch,
    Table, Worker,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .try_init();

    let config = EngineConfig::from_env()?;
    let rows: i64 = 2_000_000;
    let table = Table::builder()
        .doubles("latency", (0..rows).map(|i| ((i * 7_919) % 10_000) as f64 / 10.0))
        .strings("host", (0..rows).map(|i| format!("host-{}", (i * 31) % 5_000)))
        .build()?;
    let mut parts = table.split(16)?;
    let remote_parts = parts.split_off(8);

    let worker = Worker::new("demo", &config)
        .register_sketch::<Table, HistogramSketch>()
        .register_sketch::<Table, HllSketch>();
    let id = worker.insert(DataSet::from_partitions(remote_parts, &config)?)?;
    let handle = worker.spawn()?;

    let ds = DataSet::parallel(
        vec![DataSet::from_partitions(parts, &config)?, handle.dataset(id)],
        &config,
    )?;

    let sketch = Arc::new(HistogramSketch::new(
        "latency",
        BucketDescriptor::equal_width(0.0, 1_000.0, 10)?,
    ));
    let mut total = sketch.zero();
    let mut done = 0.0;
    let mut stream = ds.sketch(sketch.clone());
    while let Some(signal) = stream.next_signal() {
        match signal {
            Signal::Partial(p) => {
                done += p.delta_done;
                total = sketch.add(&total, &p.delta_value)?;
                println!("{:5.1}% {:?}", done * 100.0, total.buckets());
            }
            Signal::Completed => println!("cdf {:?}", total.cdf()),
            Signal::Failed(e) => return Err(e),
        }
    }

    let hosts = ds.blocking_sketch(Arc::new(HllSketch::new("host", 12, 0)?))?;
    println!("distinct hosts ~ {}", hosts.estimate());
    handle.shutdown()
}
