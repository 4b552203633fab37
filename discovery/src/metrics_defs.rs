//! Metrics definitions for discovery.

use shared::metrics_defs::{MetricDef, MetricType};

pub const SCAN_DURATION: MetricDef = MetricDef {
    name: "discovery.scan.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete a scan cycle in seconds",
};

pub const SCAN_FAILURES: MetricDef = MetricDef {
    name: "discovery.scan.failures",
    metric_type: MetricType::Counter,
    description: "Scan cycles aborted because services could not be listed",
};

pub const DESTINATIONS: MetricDef = MetricDef {
    name: "discovery.destinations",
    metric_type: MetricType::Gauge,
    description: "Number of destinations in the published snapshot",
};

pub const DESTINATION_FAILURES: MetricDef = MetricDef {
    name: "discovery.destination.failures",
    metric_type: MetricType::Counter,
    description: "Destinations whose metadata lookup failed during a scan",
};

pub const ASSET_DOWNLOADS: MetricDef = MetricDef {
    name: "discovery.assets.downloads",
    metric_type: MetricType::Counter,
    description: "Template assets downloaded from object storage",
};

pub const ASSET_FAILURES: MetricDef = MetricDef {
    name: "discovery.assets.failures",
    metric_type: MetricType::Counter,
    description: "Template asset listings or downloads that failed",
};

pub const ALL_METRICS: &[MetricDef] = &[
    SCAN_DURATION,
    SCAN_FAILURES,
    DESTINATIONS,
    DESTINATION_FAILURES,
    ASSET_DOWNLOADS,
    ASSET_FAILURES,
];
