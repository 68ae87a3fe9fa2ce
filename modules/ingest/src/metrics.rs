use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Pipeline metrics, exposed in Prometheus text format at `/metrics`.
///
/// `dlq_total` uses coarse reason classes (`decode`, `validation`,
/// `persistence`, `publish`) rather than raw reason strings to keep label
/// cardinality bounded.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    // Counters
    pub ingest_total: IntCounterVec,
    pub ingest_success_total: IntCounterVec,
    pub dlq_total: IntCounterVec,

    // Histograms
    pub event_latency_seconds: Histogram,

    // Gauges
    pub bus_up: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let ingest_total = IntCounterVec::new(
            Opts::new("ingest_total", "Publish attempts accepted by the pipeline"),
            &["topic", "kind"],
        )
        .expect("metric");

        let ingest_success_total = IntCounterVec::new(
            Opts::new(
                "ingest_success_total",
                "Events validated and mirrored (duplicates count as success)",
            ),
            &["topic", "kind"],
        )
        .expect("metric");

        let dlq_total = IntCounterVec::new(
            Opts::new("dlq_total", "Events routed to the dead-letter store"),
            &["topic", "reason"], // reason: decode|validation|persistence|publish
        )
        .expect("metric");

        let event_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "event_latency_seconds",
            "Time from message receipt to mirror-insert completion",
        ))
        .expect("metric");

        let bus_up = IntGauge::new("bus_up", "Transport connection state (1 = connected)")
            .expect("metric");

        registry.register(Box::new(ingest_total.clone())).unwrap();
        registry
            .register(Box::new(ingest_success_total.clone()))
            .unwrap();
        registry.register(Box::new(dlq_total.clone())).unwrap();
        registry
            .register(Box::new(event_latency_seconds.clone()))
            .unwrap();
        registry.register(Box::new(bus_up.clone())).unwrap();

        Self {
            registry,
            ingest_total,
            ingest_success_total,
            dlq_total,
            event_latency_seconds,
            bus_up,
        }
    }

    pub fn render(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&mf, &mut buf).map_err(|e| e.to_string())?;
        String::from_utf8(buf).map_err(|e| e.to_string())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_exposes_counters() {
        let metrics = Metrics::new();
        metrics
            .ingest_total
            .with_label_values(&["tracker.events.projects", "project_created"])
            .inc();
        metrics
            .dlq_total
            .with_label_values(&["tracker.events.projects", "validation"])
            .inc();
        metrics.bus_up.set(1);

        let body = metrics.render().unwrap();
        assert!(body.contains("ingest_total"));
        assert!(body.contains("dlq_total"));
        assert!(body.contains("bus_up 1"));
    }
}
