//! Outbound side of the protocol: the signed form the customer's browser
//! posts to the gateway's hosted checkout page. No network call happens
//! here; the storefront renders the returned fields as a self-submitting
//! form.

use std::collections::BTreeMap;

use anyhow::anyhow;
use axum::extract::{Path, State};
use axum::Json;
use common_http_errors::{ApiError, ApiResult};
use serde::Serialize;
use uuid::Uuid;

use common_money::to_minor_units;

use crate::app::AppState;
use crate::config::{CheckoutConfig, DEFAULT_ORDER_DESCRIPTION};
use crate::error::GatewayError;
use crate::orders::Order;
use crate::signature::{sign, SignablePayload};

#[derive(Debug, Clone, Serialize)]
pub struct RedirectForm {
    /// Gateway checkout endpoint the form posts to.
    pub action: String,
    pub method: &'static str,
    pub fields: BTreeMap<String, String>,
}

pub fn build_redirect_form(order: &Order, config: &CheckoutConfig) -> Result<RedirectForm, GatewayError> {
    let credentials = config.credentials();
    if !credentials.testing_mode
        && (credentials.merchant_id.is_empty() || credentials.secret_key.is_empty())
    {
        return Err(GatewayError::InvalidConfiguration(
            "merchant credentials are not set".into(),
        ));
    }

    let amount = to_minor_units(&order.total)
        .ok_or_else(|| anyhow!("order total {} does not fit in minor units", order.total))?;

    // The config layer already substitutes the default, but an empty
    // description must never reach the gateway.
    let template = if config.description_template.trim().is_empty() {
        DEFAULT_ORDER_DESCRIPTION
    } else {
        config.description_template.as_str()
    };
    let description = template.replace("$orderId", &order.number.to_string());

    let mut payload = SignablePayload::new();
    payload.insert("merchant_id", credentials.effective_merchant_id());
    payload.insert("order_id", order.id.to_string());
    payload.insert("currency", config.currency.as_str());
    payload.insert("amount", amount.to_string());
    payload.insert("order_desc", description);
    payload.insert("response_url", config.response_url());
    payload.insert("server_callback_url", config.server_callback_url());
    let signature = sign(&payload, &credentials);

    let mut fields = payload.into_fields();
    fields.insert("signature".to_string(), signature);

    Ok(RedirectForm {
        action: config.checkout_url.clone(),
        method: "POST",
        fields,
    })
}

/// Storefront-facing endpoint: look the order up by correlation id and hand
/// back the signed form. Orders that are no longer payable are refused so a
/// stale checkout tab cannot re-post a finished order.
pub async fn checkout_redirect(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> ApiResult<Json<RedirectForm>> {
    let order_id = Uuid::parse_str(order_id.trim())
        .map_err(|_| ApiError::bad_request("invalid_order_id", None))?;
    let order = state
        .store
        .find_by_correlation(order_id)
        .await
        .map_err(|err| ApiError::internal(err, None))?
        .ok_or(ApiError::NotFound { code: "order_not_found", trace_id: None })?;
    if !order.can_mark_paid() {
        return Err(ApiError::Conflict { code: "order_not_payable", trace_id: None });
    }

    let form = build_redirect_form(&order, &state.config)
        .map_err(|err| ApiError::internal(err, None))?;
    state.metrics.record_redirect_form();
    Ok(Json(form))
}
