//! Per-cycle metrics and the hourly accumulator

/// Counters for one cycle (or an accumulation of cycles).
///
/// Every item increments exactly one of `processed`/`errors`;
/// `notifications` counts items for which at least one rule fired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleMetrics {
    pub processed: u64,
    pub errors: u64,
    pub notifications: u64,
}

impl CycleMetrics {
    pub fn merge(&mut self, other: CycleMetrics) {
        self.processed += other.processed;
        self.errors += other.errors;
        self.notifications += other.notifications;
    }
}

/// Rolls cycle metrics into an hourly total and decides when to flush
#[derive(Debug)]
pub struct HourlyAccumulator {
    totals: CycleMetrics,
    cycles: u64,
    report_every: u64,
}

impl HourlyAccumulator {
    pub fn new(report_every: u64) -> Self {
        Self {
            totals: CycleMetrics::default(),
            cycles: 0,
            report_every: report_every.max(1),
        }
    }

    /// Add one cycle; returns the accumulated totals (and resets) when the
    /// report is due
    pub fn roll(&mut self, cycle: CycleMetrics) -> Option<CycleMetrics> {
        self.totals.merge(cycle);
        self.cycles += 1;

        if self.cycles >= self.report_every {
            let totals = self.totals;
            self.totals = CycleMetrics::default();
            self.cycles = 0;
            Some(totals)
        } else {
            None
        }
    }

    /// Render the hourly summary for the report sink
    pub fn format_report(totals: CycleMetrics, poll_interval_secs: u64) -> String {
        format!(
            "📊 Hourly monitoring report\n\n\
             ✅ Items processed: {}\n\
             ❌ Errors: {}\n\
             🔔 Notifications sent: {}\n\n\
             ⏰ Poll interval: {} sec",
            totals.processed, totals.errors, totals.notifications, poll_interval_secs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_after_report_every_cycles() {
        let mut acc = HourlyAccumulator::new(3);
        let cycle = CycleMetrics {
            processed: 10,
            errors: 1,
            notifications: 2,
        };

        assert!(acc.roll(cycle).is_none());
        assert!(acc.roll(cycle).is_none());
        let totals = acc.roll(cycle).unwrap();
        assert_eq!(totals.processed, 30);
        assert_eq!(totals.errors, 3);
        assert_eq!(totals.notifications, 6);

        // reset after flush
        assert!(acc.roll(cycle).is_none());
    }

    #[test]
    fn test_report_every_is_at_least_one() {
        let mut acc = HourlyAccumulator::new(0);
        assert!(acc.roll(CycleMetrics::default()).is_some());
    }
}
