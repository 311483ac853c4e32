//! Rebase metrics.

use prometheus::{IntCounterVec, Opts, Registry};

/// Counters recorded by rebase operations.
#[derive(Clone)]
pub struct RebaseMetrics {
    /// Rebases by (on_behalf_of_uploader, rebase_chain, allow_conflicts).
    pub count_rebases: IntCounterVec,
}

impl RebaseMetrics {
    /// Create and register rebase metrics.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let count_rebases = IntCounterVec::new(
            Opts::new("change_count_rebases", "Total number of rebases"),
            &["on_behalf_of_uploader", "rebase_chain", "allow_conflicts"],
        )?;
        registry.register(Box::new(count_rebases.clone()))?;

        Ok(Self { count_rebases })
    }

    pub fn record_rebase(&self, on_behalf_of_uploader: bool, rebase_chain: bool, allow_conflicts: bool) {
        self.count_rebases
            .with_label_values(&[
                bool_label(on_behalf_of_uploader),
                bool_label(rebase_chain),
                bool_label(allow_conflicts),
            ])
            .inc();
    }

    /// Current count for one bucket.
    pub fn rebase_count(&self, on_behalf_of_uploader: bool, rebase_chain: bool, allow_conflicts: bool) -> u64 {
        self.count_rebases
            .with_label_values(&[
                bool_label(on_behalf_of_uploader),
                bool_label(rebase_chain),
                bool_label(allow_conflicts),
            ])
            .get()
    }
}

fn bool_label(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_are_independent() {
        let registry = Registry::new();
        let metrics = RebaseMetrics::new(&registry).unwrap();

        metrics.record_rebase(true, true, false);
        metrics.record_rebase(false, true, false);
        metrics.record_rebase(false, true, false);

        assert_eq!(metrics.rebase_count(true, true, false), 1);
        assert_eq!(metrics.rebase_count(false, true, false), 2);
        assert_eq!(metrics.rebase_count(false, false, false), 0);
        assert_eq!(registry.gather().len(), 1);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        RebaseMetrics::new(&registry).unwrap();
        assert!(RebaseMetrics::new(&registry).is_err());
    }
}
