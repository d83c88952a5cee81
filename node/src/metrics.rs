//! # Prometheus Metrics
//!
//! Request outcomes and latency for the proxy routes, plus policy reloads.
//! Everything lives in a dedicated [`prometheus::Registry`] under the
//! `keyward` prefix and is scraped from `/metrics` on the metrics port.
//!
//! Outcomes are labelled with [`GatewayError::kind`], so a denied submit
//! shows up as `operation="submit",outcome="denied"` and a successful one
//! as `outcome="ok"`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

use keyward_gateway::GatewayError;

/// Metric handles for the node. Handles are cheap to clone.
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    /// Proxy requests by operation (`submit`, `retry`) and outcome.
    pub requests_total: IntCounterVec,
    /// Proxy request latency by operation, in seconds.
    pub request_duration_seconds: HistogramVec,
    /// SIGHUP policy reloads by outcome (`ok`, `error`).
    pub policy_reloads_total: IntCounterVec,
}

impl GatewayMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("keyward".into()), None)?;

        let requests_total = IntCounterVec::new(
            Opts::new("requests_total", "Proxy requests by operation and outcome"),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "request_duration_seconds",
                "Proxy request latency in seconds, node round-trips included",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["operation"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let policy_reloads_total = IntCounterVec::new(
            Opts::new("policy_reloads_total", "Policy reloads by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(policy_reloads_total.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration_seconds,
            policy_reloads_total,
        })
    }

    /// Records one finished proxy request.
    pub fn observe<T>(
        &self,
        operation: &str,
        result: &Result<T, GatewayError>,
        elapsed: Duration,
    ) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        self.requests_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    pub fn policy_reloaded(&self, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        self.policy_reloads_total.with_label_values(&[outcome]).inc();
    }

    /// Encodes all registered metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<GatewayMetrics>;

/// Renders `/metrics`.
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
