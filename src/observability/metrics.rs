use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub trip_transitions_total: IntCounterVec,
    pub pending_requests: IntGauge,
    pub notification_signals_total: IntCounter,
    pub poll_ticks_total: IntCounterVec,
    pub snapshot_fallbacks_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let trip_transitions_total = IntCounterVec::new(
            Opts::new("trip_transitions_total", "Trip status transitions by target"),
            &["status"],
        )
        .expect("valid trip_transitions_total metric");

        let pending_requests = IntGauge::new(
            "pending_requests",
            "Pending trip requests currently inside the visibility window",
        )
        .expect("valid pending_requests metric");

        let notification_signals_total = IntCounter::new(
            "notification_signals_total",
            "Notification signals emitted for pending-count increases",
        )
        .expect("valid notification_signals_total metric");

        let poll_ticks_total = IntCounterVec::new(
            Opts::new("poll_ticks_total", "Poll ticks by outcome"),
            &["outcome"],
        )
        .expect("valid poll_ticks_total metric");

        let snapshot_fallbacks_total = IntCounterVec::new(
            Opts::new(
                "snapshot_fallbacks_total",
                "Remote fetches served from the last-good snapshot",
            ),
            &["kind"],
        )
        .expect("valid snapshot_fallbacks_total metric");

        registry
            .register(Box::new(trip_transitions_total.clone()))
            .expect("register trip_transitions_total");
        registry
            .register(Box::new(pending_requests.clone()))
            .expect("register pending_requests");
        registry
            .register(Box::new(notification_signals_total.clone()))
            .expect("register notification_signals_total");
        registry
            .register(Box::new(poll_ticks_total.clone()))
            .expect("register poll_ticks_total");
        registry
            .register(Box::new(snapshot_fallbacks_total.clone()))
            .expect("register snapshot_fallbacks_total");

        Self {
            registry,
            trip_transitions_total,
            pending_requests,
            notification_signals_total,
            poll_ticks_total,
            snapshot_fallbacks_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
