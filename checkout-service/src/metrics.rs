use anyhow::Result;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct CheckoutMetrics {
    registry: Registry,
    ipn_callbacks: IntCounterVec,
    status_queries: IntCounterVec,
    redirect_forms: IntCounter,
    http_errors: IntCounterVec,
}

impl CheckoutMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let ipn_callbacks = IntCounterVec::new(
            Opts::new(
                "checkout_ipn_callbacks_total",
                "Async gateway notifications grouped by outcome",
            ),
            &["result"],
        )?;
        let status_queries = IntCounterVec::new(
            Opts::new(
                "checkout_status_queries_total",
                "Out-of-band status re-checks grouped by result",
            ),
            &["result"],
        )?;
        let redirect_forms = IntCounter::new(
            "checkout_redirect_forms_total",
            "Signed redirect forms issued to the storefront",
        )?;
        let http_errors = IntCounterVec::new(
            Opts::new(
                "http_errors_total",
                "Count of HTTP error responses emitted (status >= 400)",
            ),
            &["code", "status"],
        )?;
        registry.register(Box::new(ipn_callbacks.clone()))?;
        registry.register(Box::new(status_queries.clone()))?;
        registry.register(Box::new(redirect_forms.clone()))?;
        registry.register(Box::new(http_errors.clone()))?;
        Ok(Self {
            registry,
            ipn_callbacks,
            status_queries,
            redirect_forms,
            http_errors,
        })
    }

    pub fn record_ipn(&self, result: &str) {
        self.ipn_callbacks.with_label_values(&[result]).inc();
    }

    pub fn record_status_query(&self, result: &str) {
        self.status_queries.with_label_values(&[result]).inc();
    }

    pub fn record_redirect_form(&self) {
        self.redirect_forms.inc();
    }

    pub fn record_http_error(&self, code: &str, status: &str) {
        self.http_errors.with_label_values(&[code, status]).inc();
    }

    pub fn render(&self) -> Result<Response> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )
            .body(Body::from(buffer))?;
        Ok(response)
    }
}
