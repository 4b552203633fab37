use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUESTS: MetricDef = MetricDef {
    name: "renderer.requests",
    metric_type: MetricType::Counter,
    description: "Handled requests, tagged by outcome: static, probe, json, introspection, html or aborted",
};

pub const RENDER_DURATION: MetricDef = MetricDef {
    name: "renderer.render.duration",
    metric_type: MetricType::Histogram,
    description: "Time to resolve and render an HTML error page in seconds",
};

pub const ALL_METRICS: &[MetricDef] = &[REQUESTS, RENDER_DURATION];
