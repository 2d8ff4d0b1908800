use log::{error, info, warn};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time;

use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::normalize::FlowRecord;
use crate::sink::FlowSink;

/// Period of `FlowSink::tick`.
pub const TICK: Duration = Duration::from_secs(1);

/// Hands records to the sink until every sender is gone, then flushes it.
///
/// The sink is ticked every `tick` whether records arrive or not. A failing sink only
/// loses the record at hand.
pub fn export(mut sink: Box<dyn FlowSink>, mut receiver: mpsc::Receiver<FlowRecord>, metrics: Arc<Metrics>, runtime: Handle, tick: Duration) {
    let mut last_tick = Instant::now();

    loop {
        let wait = tick.saturating_sub(last_tick.elapsed());
        match runtime.block_on(time::timeout(wait, receiver.recv())) {
            Ok(Some(record)) => match sink.emit(record) {
                Ok(()) => Metrics::incr(&metrics.records_emitted),
                Err(e) => {
                    Metrics::incr(&metrics.sink_errors);
                    warn!("{}", Error::Sink(e));
                }
            },
            Ok(None) => break,
            Err(_) => {}
        }

        if last_tick.elapsed() >= tick {
            last_tick = Instant::now();
            if let Err(e) = sink.tick() {
                Metrics::incr(&metrics.sink_errors);
                warn!("{}", Error::Sink(e));
            }
        }
    }

    if let Err(e) = sink.flush() {
        error!("Failed to flush the sink: {}", e);
    }
    info!("Sink closed");
}

/// Runs `export` on its own thread, sinks may block. Must be called from the runtime.
pub fn spawn(sink: Box<dyn FlowSink>, receiver: mpsc::Receiver<FlowRecord>, metrics: Arc<Metrics>) -> Result<thread::JoinHandle<()>> {
    let runtime = Handle::current();
    let handle = thread::Builder::new().name("sink".to_string()).spawn(move || export(sink, receiver, metrics, runtime, TICK))?;
    Ok(handle)
}
