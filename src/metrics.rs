use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::decoder::DecodeStats;

/// Process-wide counters, shared by the listener, the workers and the sink thread.
#[derive(Debug, Default)]
pub struct Metrics {
    pub packets_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub malformed_packets: AtomicU64,
    pub decode_errors: AtomicU64,
    pub unknown_template_drops: AtomicU64,
    pub pending_buffered: AtomicU64,
    pub queue_full_drops: AtomicU64,
    pub records_decoded: AtomicU64,
    pub records_emitted: AtomicU64,
    pub sink_errors: AtomicU64,
    pub sequence_gaps: AtomicU64,
    pub templates_defined: AtomicU64,
    pub templates_withdrawn: AtomicU64,
    pub files_uploaded: AtomicU64,
    pub upload_failures: AtomicU64,
}

impl Metrics {
    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn apply_decode_stats(&self, stats: &DecodeStats) {
        self.records_decoded.fetch_add(stats.records, Ordering::Relaxed);
        self.decode_errors.fetch_add(stats.decode_errors, Ordering::Relaxed);
        self.unknown_template_drops.fetch_add(stats.unknown_template_drops, Ordering::Relaxed);
        self.pending_buffered.fetch_add(stats.pending_buffered, Ordering::Relaxed);
        self.sequence_gaps.fetch_add(stats.sequence_gaps, Ordering::Relaxed);
        self.templates_defined.fetch_add(stats.templates_defined, Ordering::Relaxed);
        self.templates_withdrawn.fetch_add(stats.templates_withdrawn, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HashMap<&'static str, u64> {
        let counters: [(&'static str, &AtomicU64); 15] = [
            ("packets_received", &self.packets_received),
            ("bytes_received", &self.bytes_received),
            ("malformed_packets", &self.malformed_packets),
            ("decode_errors", &self.decode_errors),
            ("unknown_template_drops", &self.unknown_template_drops),
            ("pending_buffered", &self.pending_buffered),
            ("queue_full_drops", &self.queue_full_drops),
            ("records_decoded", &self.records_decoded),
            ("records_emitted", &self.records_emitted),
            ("sink_errors", &self.sink_errors),
            ("sequence_gaps", &self.sequence_gaps),
            ("templates_defined", &self.templates_defined),
            ("templates_withdrawn", &self.templates_withdrawn),
            ("files_uploaded", &self.files_uploaded),
            ("upload_failures", &self.upload_failures),
        ];

        counters.iter().map(|(name, counter)| (*name, counter.load(Ordering::Relaxed))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn apply_stats_and_snapshot() {
        let metrics = Metrics::default();
        let stats = DecodeStats { records: 5, decode_errors: 1, unknown_template_drops: 2, ..Default::default() };

        metrics.apply_decode_stats(&stats);
        metrics.apply_decode_stats(&stats);
        Metrics::incr(&metrics.packets_received);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot["records_decoded"], 10);
        assert_eq!(snapshot["decode_errors"], 2);
        assert_eq!(snapshot["unknown_template_drops"], 4);
        assert_eq!(snapshot["packets_received"], 1);
        assert_eq!(snapshot["queue_full_drops"], 0);
        assert_eq!(snapshot.len(), 15);
    }
}
