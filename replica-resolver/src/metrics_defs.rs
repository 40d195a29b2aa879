//! Metrics definitions for replica resolution.

use shared::metrics_defs::{MetricDef, MetricType};

pub const REPLICA_CACHE_HIT: MetricDef = MetricDef {
    name: "replica_cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of lookups answered from the replica cache",
};

pub const REPLICA_CACHE_MISS: MetricDef = MetricDef {
    name: "replica_cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of lookups that missed or found an expired entry",
};

pub const REPLICA_CACHE_EVICTED: MetricDef = MetricDef {
    name: "replica_cache.evicted",
    metric_type: MetricType::Counter,
    description: "Number of entries dropped to keep the cache within its bound",
};

pub const REPLICA_CACHE_SIZE: MetricDef = MetricDef {
    name: "replica_cache.size",
    metric_type: MetricType::Gauge,
    description: "Number of tenants currently held in the replica cache",
};

pub const RESOLVE_DURATION: MetricDef = MetricDef {
    name: "replica.resolve.duration",
    metric_type: MetricType::Histogram,
    description: "Time to query the discovery endpoint and select a replica, in seconds",
};

pub const RESOLVE_FAILURE: MetricDef = MetricDef {
    name: "replica.resolve.failure",
    metric_type: MetricType::Counter,
    description: "Number of discovery attempts that returned no replica. Tagged with reason.",
};

// TODO: all metrics must be added here for now, this can be done dynamically with a macro in the future.
pub const ALL_METRICS: &[MetricDef] = &[
    REPLICA_CACHE_HIT,
    REPLICA_CACHE_MISS,
    REPLICA_CACHE_EVICTED,
    REPLICA_CACHE_SIZE,
    RESOLVE_DURATION,
    RESOLVE_FAILURE,
];
