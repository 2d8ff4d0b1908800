use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;

use crate::metrics::Metrics;
use crate::threads::worker::Gauges;

/// Logs per-exporter figures and the global counters.
pub fn report(gauges: &Gauges, metrics: &Metrics) {
    let exporters = {
        let gauges = gauges.lock();
        for (exporter, gauge) in gauges.iter() {
            if let Some(stats) = gauge.stats() {
                debug!(
                    "exporter {}: templates active: {}, pending data sets: {}, last sequence: {:?}, idle for {:?}",
                    exporter,
                    stats.templates_active,
                    stats.pending,
                    stats.last_sequence,
                    stats.last_activity.elapsed()
                );
            }
        }
        gauges.len()
    };

    let snapshot = metrics.snapshot();
    info!(
        "exporters: {}, packets: {}, records: {}, malformed: {}, decode errors: {}, unknown template drops: {}, queue full drops: {}, sink errors: {}",
        exporters,
        snapshot["packets_received"],
        snapshot["records_emitted"],
        snapshot["malformed_packets"],
        snapshot["decode_errors"],
        snapshot["unknown_template_drops"],
        snapshot["queue_full_drops"],
        snapshot["sink_errors"]
    );
}

pub async fn run(gauges: Gauges, metrics: Arc<Metrics>, period: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = time::interval_at(time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = ticker.tick() => report(&gauges, &metrics),
            _ = stop.changed() => break,
        }
    }

    report(&gauges, &metrics);
}
