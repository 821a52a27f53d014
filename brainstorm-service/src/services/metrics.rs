//! Prometheus metrics for brainstorm-service.
//!
//! Recording helpers are no-ops until `init_metrics` has run, so library
//! code and tests never depend on the registry being present.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

// Global registry
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

// HTTP
pub static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();

// Turns
pub static TURNS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static PROVIDER_LATENCY_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
pub static TOKENS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static USAGE_REJECTIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

// Realtime
pub static ACTIVE_SOCKETS: OnceLock<IntGauge> = OnceLock::new();

fn counter(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    match IntCounterVec::new(Opts::new(name, help), labels) {
        Ok(metric) => metric,
        Err(e) => {
            tracing::error!("Failed to create {} metric: {}", name, e);
            panic!("Failed to initialize metrics: {}", e);
        }
    }
}

fn histogram(name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    match HistogramVec::new(HistogramOpts::new(name, help), labels) {
        Ok(metric) => metric,
        Err(e) => {
            tracing::error!("Failed to create {} metric: {}", name, e);
            panic!("Failed to initialize metrics: {}", e);
        }
    }
}

fn register<C: prometheus::core::Collector + Clone + 'static>(registry: &Registry, metric: &C) {
    if let Err(e) = registry.register(Box::new(metric.clone())) {
        tracing::error!("Failed to register collector: {}", e);
        panic!("Failed to initialize metrics: {}", e);
    }
}

pub fn init_metrics() {
    if REGISTRY.get().is_some() {
        return;
    }

    let registry = Registry::new();

    let requests_total = counter(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"],
    );
    let request_duration = histogram(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path", "status"],
    );
    let turns_total = counter(
        "brainstorm_turns_total",
        "AI turns attempted, by speaker and outcome",
        &["speaker", "outcome"],
    );
    let provider_latency = histogram(
        "brainstorm_provider_latency_seconds",
        "Completion provider latency in seconds",
        &["speaker"],
    );
    let tokens_total = counter(
        "brainstorm_tokens_total",
        "Tokens consumed, by model",
        &["model"],
    );
    let usage_rejections = counter(
        "brainstorm_usage_rejections_total",
        "Admissions refused by the daily usage limit",
        &["tier"],
    );
    let active_sockets = match IntGauge::new(
        "brainstorm_active_sockets",
        "Currently connected WebSocket clients",
    ) {
        Ok(metric) => metric,
        Err(e) => {
            tracing::error!("Failed to create brainstorm_active_sockets metric: {}", e);
            panic!("Failed to initialize metrics: {}", e);
        }
    };

    register(&registry, &requests_total);
    register(&registry, &request_duration);
    register(&registry, &turns_total);
    register(&registry, &provider_latency);
    register(&registry, &tokens_total);
    register(&registry, &usage_rejections);
    register(&registry, &active_sockets);

    // Initialize globals
    let _ = REGISTRY.set(registry);
    let _ = HTTP_REQUESTS_TOTAL.set(requests_total);
    let _ = HTTP_REQUEST_DURATION_SECONDS.set(request_duration);
    let _ = TURNS_TOTAL.set(turns_total);
    let _ = PROVIDER_LATENCY_SECONDS.set(provider_latency);
    let _ = TOKENS_TOTAL.set(tokens_total);
    let _ = USAGE_REJECTIONS_TOTAL.set(usage_rejections);
    let _ = ACTIVE_SOCKETS.set(active_sockets);
}

pub fn record_turn(speaker: &str, outcome: &str, latency_seconds: f64) {
    if let Some(counter) = TURNS_TOTAL.get() {
        counter.with_label_values(&[speaker, outcome]).inc();
    }
    if let Some(histogram) = PROVIDER_LATENCY_SECONDS.get() {
        histogram
            .with_label_values(&[speaker])
            .observe(latency_seconds);
    }
}

pub fn record_tokens(model: &str, tokens: u64) {
    if let Some(counter) = TOKENS_TOTAL.get() {
        counter.with_label_values(&[model]).inc_by(tokens);
    }
}

pub fn record_usage_rejection(tier: &str) {
    if let Some(counter) = USAGE_REJECTIONS_TOTAL.get() {
        counter.with_label_values(&[tier]).inc();
    }
}

pub fn socket_opened() {
    if let Some(gauge) = ACTIVE_SOCKETS.get() {
        gauge.inc();
    }
}

pub fn socket_closed() {
    if let Some(gauge) = ACTIVE_SOCKETS.get() {
        gauge.dec();
    }
}

pub fn get_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let registry = match REGISTRY.get() {
        Some(r) => r,
        None => {
            tracing::error!("Metrics registry not initialized");
            return "# Metrics registry not initialized\n".to_string();
        }
    };

    let metric_families = registry.gather();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return format!("# Failed to encode metrics: {}\n", e);
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to convert metrics to UTF-8: {}", e);
            format!("# Failed to convert metrics to UTF-8: {}\n", e)
        }
    }
}
