//! One task per exporter.
//!
//! The listener hands every datagram to the worker of its exporter through a bounded
//! queue. A worker owns the template state of its exporter, so packets of one exporter
//! are decoded in arrival order while different exporters decode in parallel.

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time;

use crate::decoder::Decoder;
use crate::entity::datagram::Datagram;
use crate::error::Error;
use crate::flow::ExporterId;
use crate::metrics::Metrics;
use crate::normalize::FlowRecord;
use crate::settings;
use crate::template::ExporterStats;

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub queue_depth: usize,
    pub template_buffer: usize,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl From<&settings::Exporter> for WorkerConfig {
    fn from(s: &settings::Exporter) -> Self {
        WorkerConfig {
            queue_depth: s.queue_depth.max(1),
            template_buffer: s.template_buffer,
            idle_timeout: Duration::from_secs(s.idle_timeout_secs),
            sweep_interval: Duration::from_secs(s.sweep_interval_secs.max(1)),
        }
    }
}

/// Per-exporter figures published by a worker for the maintenance task.
#[derive(Debug, Default)]
pub struct ExporterGauge {
    stats: Mutex<Option<ExporterStats>>,
}

impl ExporterGauge {
    fn update(&self, decoder: &Decoder, exporter: &ExporterId) {
        *self.stats.lock() = decoder.store().stats(exporter);
    }

    /// Latest snapshot, `None` until the first datagram was decoded.
    pub fn stats(&self) -> Option<ExporterStats> {
        self.stats.lock().clone()
    }
}

/// Live workers, locked only when a worker starts or stops and by the maintenance task.
pub type Gauges = Arc<Mutex<HashMap<ExporterId, Arc<ExporterGauge>>>>;

/// Routes datagrams to the worker of their exporter, starting workers on demand.
pub struct Dispatcher {
    config: WorkerConfig,
    workers: HashMap<ExporterId, mpsc::Sender<Datagram>>,
    records: mpsc::Sender<FlowRecord>,
    metrics: Arc<Metrics>,
    gauges: Gauges,
    last_prune: Instant,
}

impl Dispatcher {
    pub fn new(config: WorkerConfig, records: mpsc::Sender<FlowRecord>, metrics: Arc<Metrics>, gauges: Gauges) -> Self {
        Dispatcher { config, workers: HashMap::new(), records, metrics, gauges, last_prune: Instant::now() }
    }

    fn spawn(&self, exporter: ExporterId) -> mpsc::Sender<Datagram> {
        let (sender, inbox) = mpsc::channel(self.config.queue_depth);
        let gauge = Arc::new(ExporterGauge::default());
        self.gauges.lock().insert(exporter, gauge.clone());

        info!("starting worker for exporter {}", exporter);
        tokio::spawn(run(exporter, inbox, self.records.clone(), self.metrics.clone(), gauge, self.gauges.clone(), self.config));
        sender
    }

    /// Queues `datagram` for `exporter` without waiting. Returns false when it was dropped.
    pub fn dispatch(&mut self, exporter: ExporterId, datagram: Datagram) -> bool {
        if self.last_prune.elapsed() >= self.config.sweep_interval {
            self.prune();
        }

        if !self.workers.contains_key(&exporter) {
            let sender = self.spawn(exporter);
            self.workers.insert(exporter, sender);
        }

        let result = match self.workers.get(&exporter) {
            Some(sender) => sender.try_send(datagram),
            None => return false,
        };

        match result {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("queue full for exporter {}, datagram dropped", exporter);
                Metrics::incr(&self.metrics.queue_full_drops);
                false
            }
            // the worker went idle and stopped
            Err(TrySendError::Closed(datagram)) => {
                let sender = self.spawn(exporter);
                let sent = sender.try_send(datagram).is_ok();
                self.workers.insert(exporter, sender);
                sent
            }
        }
    }

    /// Forgets the queues of workers that stopped. Returns how many were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.workers.len();
        self.workers.retain(|_, sender| !sender.is_closed());
        self.last_prune = Instant::now();

        let pruned = before - self.workers.len();
        if pruned > 0 {
            debug!("forgot {} stopped exporter workers", pruned);
        }
        pruned
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }
}

/// Body of a worker task. Ends when its queue is closed or its exporter went idle.
pub async fn run(
    exporter: ExporterId,
    mut inbox: mpsc::Receiver<Datagram>,
    records: mpsc::Sender<FlowRecord>,
    metrics: Arc<Metrics>,
    gauge: Arc<ExporterGauge>,
    gauges: Gauges,
    config: WorkerConfig,
) {
    let mut decoder = Decoder::new(config.template_buffer);
    let mut sweep = time::interval_at(time::Instant::now() + config.sweep_interval, config.sweep_interval);

    loop {
        tokio::select! {
            datagram = inbox.recv() => match datagram {
                Some(datagram) => {
                    if handle(&mut decoder, datagram, &records, &metrics).await.is_err() {
                        warn!("sink closed, stopping worker for exporter {}", exporter);
                        break;
                    }
                    gauge.update(&decoder, &exporter);
                }
                None => break,
            },
            _ = sweep.tick() => {
                decoder.evict_idle(Instant::now(), config.idle_timeout);
                gauge.update(&decoder, &exporter);

                if decoder.store().is_empty() {
                    info!("exporter {} idle, stopping worker", exporter);
                    // datagrams queued before the close are still decoded below
                    inbox.close();
                }
            }
        }
    }

    let mut gauges = gauges.lock();
    if gauges.get(&exporter).map_or(false, |g| Arc::ptr_eq(g, &gauge)) {
        gauges.remove(&exporter);
    }
}

async fn handle(decoder: &mut Decoder, datagram: Datagram, records: &mpsc::Sender<FlowRecord>, metrics: &Metrics) -> Result<(), Error> {
    let report = match decoder.process(&datagram.payload, datagram.from, datagram.received) {
        Ok(report) => report,
        Err(e) => {
            Metrics::incr(&metrics.malformed_packets);
            debug!("{}: {}", datagram.from, Error::MalformedPacket(e));
            return Ok(());
        }
    };

    metrics.apply_decode_stats(&report.stats);

    for record in report.records {
        records.send(record).await.map_err(|_| Error::Sink(crate::error::SinkError::Closed))?;
    }

    Ok(())
}
