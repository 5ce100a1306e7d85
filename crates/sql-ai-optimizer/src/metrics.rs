use axum::http::StatusCode;
use axum::response::IntoResponse;
use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::sync::{Mutex, OnceLock};

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}

static INIT_LOCK: Mutex<()> = Mutex::new(());
static LLM_REQUESTS: OnceLock<IntCounterVec> = OnceLock::new();
static TOOL_CALLS: OnceLock<IntCounterVec> = OnceLock::new();
static ANALYSES_IN_FLIGHT: OnceLock<IntGauge> = OnceLock::new();
static LLM_REQUEST_SECONDS: OnceLock<Histogram> = OnceLock::new();

/// Create and register all collectors. Safe to call more than once.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if LLM_REQUESTS.get().is_some() {
        return Ok(());
    }

    let llm_requests = IntCounterVec::new(
        prometheus::opts!("llm_requests_total", "LLM provider calls per model and outcome"),
        &["model", "status"],
    )?;
    let tool_calls = IntCounterVec::new(
        prometheus::opts!("tool_calls_total", "Tool invocations requested by models"),
        &["tool"],
    )?;
    let analyses_in_flight = IntGauge::new("analyses_in_flight", "Query analyses currently running")?;
    let llm_request_seconds = Histogram::with_opts(
        HistogramOpts::new("llm_request_seconds", "Latency of a single LLM provider call")
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
    )?;

    REGISTRY.register(Box::new(llm_requests.clone()))?;
    REGISTRY.register(Box::new(tool_calls.clone()))?;
    REGISTRY.register(Box::new(analyses_in_flight.clone()))?;
    REGISTRY.register(Box::new(llm_request_seconds.clone()))?;

    let _ = LLM_REQUESTS.set(llm_requests);
    let _ = TOOL_CALLS.set(tool_calls);
    let _ = ANALYSES_IN_FLIGHT.set(analyses_in_flight);
    let _ = LLM_REQUEST_SECONDS.set(llm_request_seconds);
    Ok(())
}

pub fn inc_llm_request(model: &str, status: &str) {
    if let Some(counter) = LLM_REQUESTS.get() {
        counter.with_label_values(&[model, status]).inc();
    }
}

pub fn inc_tool_call(tool: &str) {
    if let Some(counter) = TOOL_CALLS.get() {
        counter.with_label_values(&[tool]).inc();
    }
}

pub fn inc_analyses() {
    if let Some(gauge) = ANALYSES_IN_FLIGHT.get() {
        gauge.inc();
    }
}

pub fn dec_analyses() {
    if let Some(gauge) = ANALYSES_IN_FLIGHT.get() {
        gauge.dec();
    }
}

pub fn observe_llm_latency(seconds: f64) {
    if let Some(histogram) = LLM_REQUEST_SECONDS.get() {
        histogram.observe(seconds);
    }
}

pub fn render() -> Result<Vec<u8>, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(buffer)
}

pub async fn get_metrics() -> impl IntoResponse {
    match render() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            buffer,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
