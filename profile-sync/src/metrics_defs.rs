//! Metrics definitions for profile sync.

use shared::metrics_defs::{MetricDef, MetricType};

pub const HTTP_RETRIES: MetricDef = MetricDef {
    name: "cdp.http.retries",
    metric_type: MetricType::Counter,
    description: "Number of CDP requests retried after a transport error or 5xx response",
};

pub const PROFILE_LOOKUP_FAILED_OPEN: MetricDef = MetricDef {
    name: "cdp.profile_lookup.failed_open",
    metric_type: MetricType::Counter,
    description: "Number of failed profile lookups treated as not found",
};

pub const UPSERT_OUTCOME: MetricDef = MetricDef {
    name: "cdp.upsert.outcome",
    metric_type: MetricType::Counter,
    description: "Number of profile upserts, tagged by the subscription branch taken",
};

pub const UPSERT_FAILED: MetricDef = MetricDef {
    name: "cdp.upsert.failed",
    metric_type: MetricType::Counter,
    description: "Number of profile upserts whose write failed",
};

pub const UPSERT_DURATION: MetricDef = MetricDef {
    name: "cdp.upsert.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete a profile upsert in seconds",
};

pub const EVENTS_POSTED: MetricDef = MetricDef {
    name: "cdp.events.posted",
    metric_type: MetricType::Counter,
    description: "Number of events accepted by the CDP events endpoint",
};

pub const ALL_METRICS: &[MetricDef] = &[
    HTTP_RETRIES,
    PROFILE_LOOKUP_FAILED_OPEN,
    UPSERT_OUTCOME,
    UPSERT_FAILED,
    UPSERT_DURATION,
    EVENTS_POSTED,
];
