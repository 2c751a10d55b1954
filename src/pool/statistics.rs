//! Pool Statistics
//!
//! Per-type and aggregate load figures for the resource pool. These are
//! operational visibility only; nothing in the dispatch path branches on
//! them.

use crate::stats::StatPair;

/// Load statistics for one configured type key
#[derive(Debug, Clone, Default)]
pub struct TypePoolStats {
    /// Type key these figures belong to
    pub type_key: String,

    /// Configured instance cap
    pub max_instances: usize,

    /// Instances constructed so far (never exceeds the cap)
    pub constructed: usize,

    /// Instances currently acquired
    pub active: usize,

    /// Instances sitting in the idle set
    pub idle: usize,

    /// Successful acquisitions
    pub total_gets: u64,

    /// Acquisitions that timed out waiting
    pub total_timeouts: u64,

    /// Cumulative time spent waiting in acquire
    pub total_wait_ms: u64,
}

/// Aggregate statistics across all type keys
#[derive(Debug, Clone, Default)]
pub struct PoolStatistics {
    pub per_type: Vec<TypePoolStats>,
    pub active: usize,
    pub idle: usize,
    pub total_gets: u64,
    pub total_timeouts: u64,
    pub total_wait_ms: u64,
}

impl PoolStatistics {
    /// Fold per-type figures into the aggregate fields
    pub fn aggregate(per_type: Vec<TypePoolStats>) -> Self {
        let mut stats = PoolStatistics {
            per_type,
            ..Default::default()
        };
        for t in &stats.per_type {
            stats.active += t.active;
            stats.idle += t.idle;
            stats.total_gets += t.total_gets;
            stats.total_timeouts += t.total_timeouts;
            stats.total_wait_ms += t.total_wait_ms;
        }
        stats
    }

    /// Flatten into the name/value monitoring surface
    pub fn stat_pairs(&self, prefix: &str) -> Vec<StatPair> {
        let mut pairs = vec![
            StatPair::new(format!("{}.active", prefix), self.active),
            StatPair::new(format!("{}.idle", prefix), self.idle),
            StatPair::new(format!("{}.gets", prefix), self.total_gets),
            StatPair::new(format!("{}.timeouts", prefix), self.total_timeouts),
            StatPair::new(format!("{}.waitMs", prefix), self.total_wait_ms),
        ];
        for t in &self.per_type {
            let type_prefix = format!("{}.{}", prefix, t.type_key);
            pairs.push(StatPair::new(format!("{}.active", type_prefix), t.active));
            pairs.push(StatPair::new(format!("{}.idle", type_prefix), t.idle));
            pairs.push(StatPair::new(format!("{}.gets", type_prefix), t.total_gets));
            pairs.push(StatPair::new(
                format!("{}.timeouts", type_prefix),
                t.total_timeouts,
            ));
        }
        pairs
    }
}
