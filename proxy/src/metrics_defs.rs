use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Proxy request duration in seconds, until response headers. Tagged with status.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of requests currently being processed",
};

pub const REPLICA_ROUTING: MetricDef = MetricDef {
    name: "request.replica",
    metric_type: MetricType::Counter,
    description: "Requests by how their replica was chosen. Tagged with source (explicit, resolved, none).",
};

pub const TOKEN_USAGE: MetricDef = MetricDef {
    name: "token.usage",
    metric_type: MetricType::Counter,
    description: "Requests sent with a pooled credential. Tagged with token prefix and host.",
};

// TODO: all metrics must be added here for now, this can be done dynamically with a macro in the future.
pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    REQUESTS_INFLIGHT,
    REPLICA_ROUTING,
    TOKEN_USAGE,
];
