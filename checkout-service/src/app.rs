use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderValue, Method, StatusCode,
};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::CheckoutConfig;
use crate::metrics::CheckoutMetrics;
use crate::orders::OrderStore;
use crate::reconcile::{cancel_return, confirm_pay, success_return};
use crate::redirect::checkout_redirect;
use crate::status_client::StatusClient;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn OrderStore>,
    pub status_client: Arc<StatusClient>,
    pub config: Arc<CheckoutConfig>,
    pub metrics: Arc<CheckoutMetrics>,
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn http_error_metrics(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let resp = next.run(req).await;
    let status = resp.status();
    if status.as_u16() >= 400 {
        let code = resp
            .headers()
            .get("X-Error-Code")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown");
        state.metrics.record_http_error(code, status.as_str());
    }
    resp
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(resp) => resp,
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encode error: {err}"),
        )
            .into_response(),
    }
}

pub fn build_router(state: AppState) -> Router {
    let allowed_origins = [
        state.config.store_base_url.as_str(),
        "http://localhost:3000",
        "http://localhost:5173",
    ];
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        ))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([ACCEPT, CONTENT_TYPE]);

    Router::new()
        .route("/healthz", get(health))
        .route("/checkout/:order_id", post(checkout_redirect))
        .route("/callbacks/confirm", post(confirm_pay).get(confirm_pay))
        .route("/callbacks/success", get(success_return).post(success_return))
        .route("/callbacks/cancel", get(cancel_return).post(cancel_return))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn_with_state(state.clone(), http_error_metrics))
        .with_state(state)
        .layer(cors)
}
