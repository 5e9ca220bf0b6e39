use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static GATE_DECISIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static CONFIRMATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static USAGE_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn register_collector<T>(collector: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    let _ = registry().register(Box::new(collector.clone()));
    collector
}

fn http_requests_total() -> &'static IntCounterVec {
    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new("agegate_http_requests_total", "Gateway HTTP request count."),
                &["route", "method", "status"],
            )
            .expect("create agegate_http_requests_total"),
        )
    })
}

fn http_request_duration_seconds() -> &'static HistogramVec {
    HTTP_REQUEST_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "agegate_http_request_duration_seconds",
                    "Gateway HTTP request duration in seconds.",
                )
                .buckets(vec![
                    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
                ]),
                &["route", "method", "outcome"],
            )
            .expect("create agegate_http_request_duration_seconds"),
        )
    })
}

fn gate_decisions_total() -> &'static IntCounterVec {
    GATE_DECISIONS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "agegate_gate_decisions_total",
                    "Interceptor decisions by request classification.",
                ),
                &["classification", "decision"],
            )
            .expect("create agegate_gate_decisions_total"),
        )
    })
}

fn confirmations_total() -> &'static IntCounterVec {
    CONFIRMATIONS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "agegate_confirmations_total",
                    "Confirmation page outcomes.",
                ),
                &["outcome"],
            )
            .expect("create agegate_confirmations_total"),
        )
    })
}

fn usage_events_total() -> &'static IntCounterVec {
    USAGE_EVENTS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "agegate_usage_events_total",
                    "Calculator usage events relayed to the collector.",
                ),
                &["outcome"],
            )
            .expect("create agegate_usage_events_total"),
        )
    })
}

pub fn observe_http_request(route: &str, method: &str, status: u16, duration: Duration) {
    let status_str = status.to_string();
    http_requests_total()
        .with_label_values(&[route, method, status_str.as_str()])
        .inc();

    let outcome = if (200..400).contains(&status) {
        "success"
    } else {
        "error"
    };
    http_request_duration_seconds()
        .with_label_values(&[route, method, outcome])
        .observe(duration.as_secs_f64());
}

pub fn observe_gate_decision(classification: &str, redirected: bool) {
    let decision = if redirected { "redirect" } else { "allow" };
    gate_decisions_total()
        .with_label_values(&[classification, decision])
        .inc();
}

pub fn observe_confirmation(outcome: &str) {
    confirmations_total().with_label_values(&[outcome]).inc();
}

pub fn observe_usage_event(outcome: &str) {
    usage_events_total().with_label_values(&[outcome]).inc();
}

pub fn render() -> Result<(Vec<u8>, String), prometheus::Error> {
    let _ = gate_decisions_total();
    let _ = confirmations_total();

    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}
