// Registry metrics
//
// Invariant: every speculative record is accounted for. Allocations equal
// installs plus discards, and the live gauge equals installs minus frees.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter metric (monotonically increasing)
#[derive(Debug)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters kept by one personality registry
#[derive(Debug, Default)]
pub struct RegistryMetrics {
    // Resolver
    pub resolutions: Counter,
    pub resolve_steps: Counter,

    // Allocator
    pub records_allocated: Counter,
    pub records_installed: Counter,
    pub records_discarded: Counter,
    pub records_freed: Counter,
    pub allocation_failures: Counter,

    // Transactions
    pub set_applied: Counter,
    pub set_rejected: Counter,
    pub inherit_resets: Counter,

    // Registration sweeps
    pub sweeps: Counter,
}

impl RegistryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installed records not yet freed
    pub fn live_records(&self) -> u64 {
        self.records_installed
            .get()
            .saturating_sub(self.records_freed.get())
    }

    /// Allocated records that were neither installed nor discarded
    pub fn unaccounted_records(&self) -> u64 {
        self.records_allocated.get().saturating_sub(
            self.records_installed.get() + self.records_discarded.get(),
        )
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP jailcompat_resolutions_total Ancestor walks performed\n");
        output.push_str("# TYPE jailcompat_resolutions_total counter\n");
        output.push_str(&format!(
            "jailcompat_resolutions_total {}\n",
            self.resolutions.get()
        ));

        output.push_str("# HELP jailcompat_resolve_steps_total Nodes visited by ancestor walks\n");
        output.push_str("# TYPE jailcompat_resolve_steps_total counter\n");
        output.push_str(&format!(
            "jailcompat_resolve_steps_total {}\n",
            self.resolve_steps.get()
        ));

        output.push_str("# HELP jailcompat_records_total Personality record lifecycle events\n");
        output.push_str("# TYPE jailcompat_records_total counter\n");
        output.push_str(&format!(
            "jailcompat_records_total{{event=\"allocated\"}} {}\n",
            self.records_allocated.get()
        ));
        output.push_str(&format!(
            "jailcompat_records_total{{event=\"installed\"}} {}\n",
            self.records_installed.get()
        ));
        output.push_str(&format!(
            "jailcompat_records_total{{event=\"discarded\"}} {}\n",
            self.records_discarded.get()
        ));
        output.push_str(&format!(
            "jailcompat_records_total{{event=\"freed\"}} {}\n",
            self.records_freed.get()
        ));
        output.push_str(&format!(
            "jailcompat_records_total{{event=\"failed\"}} {}\n",
            self.allocation_failures.get()
        ));

        output.push_str("# HELP jailcompat_live_records Private records currently installed\n");
        output.push_str("# TYPE jailcompat_live_records gauge\n");
        output.push_str(&format!("jailcompat_live_records {}\n", self.live_records()));

        output.push_str("# HELP jailcompat_set_total Set transactions by outcome\n");
        output.push_str("# TYPE jailcompat_set_total counter\n");
        output.push_str(&format!(
            "jailcompat_set_total{{outcome=\"applied\"}} {}\n",
            self.set_applied.get()
        ));
        output.push_str(&format!(
            "jailcompat_set_total{{outcome=\"rejected\"}} {}\n",
            self.set_rejected.get()
        ));
        output.push_str(&format!(
            "jailcompat_set_total{{outcome=\"inherit\"}} {}\n",
            self.inherit_resets.get()
        ));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);

        counter.inc();
        assert_eq!(counter.get(), 1);

        counter.add(5);
        assert_eq!(counter.get(), 6);

        counter.reset();
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_record_accounting() {
        let metrics = RegistryMetrics::new();
        metrics.records_allocated.add(3);
        metrics.records_installed.add(2);
        metrics.records_discarded.inc();
        metrics.records_freed.inc();

        assert_eq!(metrics.unaccounted_records(), 0);
        assert_eq!(metrics.live_records(), 1);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = RegistryMetrics::new();
        metrics.records_allocated.inc();
        metrics.records_installed.inc();
        metrics.set_applied.inc();

        let output = metrics.export_prometheus();
        assert!(output.contains("jailcompat_records_total{event=\"installed\"} 1"));
        assert!(output.contains("jailcompat_live_records 1"));
        assert!(output.contains("jailcompat_set_total{outcome=\"applied\"} 1"));
    }
}
