use serde::Serialize;
use serde_json::json;

use crate::logging;
use crate::scheduler::FlushReport;

/// Counters accumulated by the engine between throughput reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub messages_routed: usize,
    pub dropped_unrecognized: usize,
    pub dropped_malformed: usize,
    pub dropped_unrouted: usize,
    pub snapshots_applied: usize,
    pub frames_flushed: usize,
    pub deltas_applied: usize,
    pub deltas_ignored: usize,
    pub deltas_discarded_before_ready: usize,
    pub ticks_applied: usize,
    pub ticks_dropped: usize,
    pub overflow_discards: usize,
    pub resyncs_sent: usize,
}

impl EngineStats {
    pub fn record_flush(&mut self, report: &FlushReport) {
        self.deltas_applied = self.deltas_applied.saturating_add(report.deltas_applied);
        self.deltas_ignored = self.deltas_ignored.saturating_add(report.deltas_ignored);
        self.ticks_applied = self.ticks_applied.saturating_add(report.ticks_applied);
        self.ticks_dropped = self.ticks_dropped.saturating_add(report.ticks_dropped);
    }

    pub fn is_idle(&self) -> bool {
        *self == EngineStats::default()
    }

    /// Return the current counters and reset them.
    pub fn take(&mut self) -> EngineStats {
        std::mem::take(self)
    }

    /// Emit one throughput summary log event.
    pub fn log_summary(&self, lists: usize) {
        logging::info(
            "metrics.throughput",
            "engine throughput summary",
            json!({
                "lists": lists,
                "messages_routed": self.messages_routed,
                "dropped": {
                    "unrecognized": self.dropped_unrecognized,
                    "malformed": self.dropped_malformed,
                    "unrouted": self.dropped_unrouted,
                    "before_ready": self.deltas_discarded_before_ready,
                },
                "snapshots_applied": self.snapshots_applied,
                "frames_flushed": self.frames_flushed,
                "deltas_applied": self.deltas_applied,
                "deltas_ignored": self.deltas_ignored,
                "ticks_applied": self.ticks_applied,
                "ticks_dropped": self.ticks_dropped,
                "avg_ticks_per_frame": if self.frames_flushed > 0 {
                    self.ticks_applied as f64 / self.frames_flushed as f64
                } else {
                    0.0
                },
                "overflow_discards": self.overflow_discards,
                "resyncs_sent": self.resyncs_sent,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_resets_counters() {
        let mut stats = EngineStats::default();
        stats.record_flush(&FlushReport {
            deltas_applied: 2,
            deltas_ignored: 1,
            ticks_applied: 5,
            ticks_dropped: 3,
        });
        stats.frames_flushed += 1;

        let taken = stats.take();
        assert_eq!(taken.ticks_applied, 5);
        assert_eq!(taken.ticks_dropped, 3);
        assert!(stats.is_idle());
    }
}
