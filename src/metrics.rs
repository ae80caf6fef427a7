use prometheus::register_counter_vec_with_registry;
use prometheus::register_gauge_with_registry;
use prometheus::CounterVec;
use prometheus::Encoder;
use prometheus::Gauge;
use prometheus::Registry;
use prometheus::TextEncoder;

/// Dispatcher/reporter observability counters, named and scoped exactly as
/// in `original_source/src/async_mail_service/prometheus.py`. The exposition
/// route itself (a `/metrics` HTTP endpoint) is out of scope per spec.md §1;
/// this struct and `encode_to_string` are the ambient observability layer a
/// production binary still needs to wire into whatever surface it picks.
pub struct Metrics {
    registry: Registry,
    pub sent_total: CounterVec,
    pub errors_total: CounterVec,
    pub deferred_total: CounterVec,
    pub rate_limited_total: CounterVec,
    pub pending_messages: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let sent_total = register_counter_vec_with_registry!(
            "gmp_sent_total",
            "Messages successfully delivered over SMTP",
            &["account_id"],
            registry
        )
        .expect("metric registration");
        let errors_total = register_counter_vec_with_registry!(
            "gmp_errors_total",
            "Messages terminated with a permanent error",
            &["account_id"],
            registry
        )
        .expect("metric registration");
        let deferred_total = register_counter_vec_with_registry!(
            "gmp_deferred_total",
            "Dispatch attempts deferred for retry or rate-limit backoff",
            &["account_id"],
            registry
        )
        .expect("metric registration");
        let rate_limited_total = register_counter_vec_with_registry!(
            "gmp_rate_limited_total",
            "Dispatch attempts rejected or deferred by the rate limiter",
            &["account_id"],
            registry
        )
        .expect("metric registration");
        let pending_messages = register_gauge_with_registry!(
            "gmp_pending_messages",
            "Messages observed pending at the last fetch_ready_messages call",
            registry
        )
        .expect("metric registration");

        Self {
            registry,
            sent_total,
            errors_total,
            deferred_total,
            rate_limited_total,
            pending_messages,
        }
    }

    pub fn encode_to_string(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .expect("prometheus encoding");
        String::from_utf8(buffer).expect("prometheus output is utf8")
    }
}

impl Default for Metrics {
    fn default() -> Self { Self::new() }
}
