//! Scheduler configuration and policy knobs.

use std::time::Duration;

use taskweave_core::{DEFAULT_REGION_COUNT, DEFAULT_TICK};

/// What the router does when an affinity key has no owning region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnresolvedAffinityPolicy {
    /// Run the work on the global worker instead of dropping it.
    #[default]
    FallbackToGlobal,
    /// Refuse the submission with `SchedulingError::UnresolvedAffinity`.
    Reject,
}

/// What happens to a periodic task after one of its firings fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeriodicFailurePolicy {
    /// Log the failure and keep the period running.
    #[default]
    Continue,
    /// Log the failure and cancel the task.
    Cancel,
}

/// Scheduler-level configuration for the domain router.
///
/// Controls tick granularity, affinity fallback, periodic failure handling,
/// and shutdown behavior.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Name stamped on every task as its owner.
    pub owner: String,
    /// Length of one scheduler tick. Delays and periods are rounded up to it.
    pub tick: Duration,
    /// Number of regions a table built by `SharedRegionTable::from_config`
    /// hashes locations across.
    pub region_count: u32,
    /// Routing behavior for affinity keys that do not resolve.
    pub unresolved_affinity: UnresolvedAffinityPolicy,
    /// Behavior of periodic tasks after a failed firing.
    pub periodic_failure: PeriodicFailurePolicy,
    /// Upper bound on how long `DomainRouter::shutdown_default` waits for workers.
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            owner: "taskweave".to_string(),
            tick: DEFAULT_TICK,
            region_count: DEFAULT_REGION_COUNT,
            unresolved_affinity: UnresolvedAffinityPolicy::default(),
            periodic_failure: PeriodicFailurePolicy::default(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.owner, "taskweave");
        assert_eq!(config.tick, Duration::from_millis(50));
        assert_eq!(config.region_count, 64);
        assert_eq!(config.unresolved_affinity, UnresolvedAffinityPolicy::FallbackToGlobal);
        assert_eq!(config.periodic_failure, PeriodicFailurePolicy::Continue);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }
}
