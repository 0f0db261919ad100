//! Inbound side of the protocol: the authoritative async notification and
//! the two browser-return paths.
//!
//! The async path is the only one allowed to trust payload content, and only
//! after recomputing the signature. The browser returns treat their
//! parameters purely as a hint to re-check the gateway's status endpoint;
//! redirect query strings never drive a financial decision directly.

use axum::body::Bytes;
use axum::extract::{RawQuery, State};
use axum::http::header;
use axum::response::{IntoResponse, Redirect, Response};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::GatewayError;
use crate::orders::{Order, PaymentStatus};
use crate::signature::{verify, SignablePayload};
use crate::status_client::GatewayStatus;

const ORDER_ID_KEY: &str = "order_id";
const SIGNATURE_KEY: &str = "signature";
const ORDER_STATUS_KEY: &str = "order_status";

// Acknowledgment phrases the gateway's retry logic keys on.
const ACK_ORDER_MISSING: &str = "Order cannot be loaded";
const ACK_BAD_DATA: &str = "Invalid order data";
const ACK_PROCESSING_FAILED: &str = "Order processing failed";
const ACK_CANCELED: &str = "The payment has been canceled";
const ACK_PAID: &str = "The order has been paid";

/// Field pairs received on a callback. The gateway may deliver via a
/// form-encoded body or a query string; per-key lookup prefers the body.
struct CallbackFields {
    body: Vec<(String, String)>,
    query: Vec<(String, String)>,
}

impl CallbackFields {
    fn parse(query: Option<&str>, body: &[u8]) -> Self {
        let body = serde_urlencoded::from_bytes(body).unwrap_or_default();
        let query = query
            .map(|q| serde_urlencoded::from_str(q).unwrap_or_default())
            .unwrap_or_default();
        Self { body, query }
    }

    fn value(&self, key: &str) -> Option<&str> {
        lookup(&self.body, key).or_else(|| lookup(&self.query, key))
    }

    /// The field set that was actually transported, which is what the
    /// signature was computed over.
    fn received(&self) -> &[(String, String)] {
        if self.body.is_empty() { &self.query } else { &self.body }
    }
}

fn lookup<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

fn ack(text: &'static str, ok: bool) -> Response {
    if !ok {
        error!("gateway callback rejected: {text}");
    }
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        text,
    )
        .into_response()
}

enum NotificationOutcome {
    /// declined/expired: acknowledged without touching the order; the
    /// browser-return path owns cancellation.
    PaymentCanceled,
    MarkedPaid,
    NoChange,
}

/// Server-to-server notification endpoint. Always answers 200 with a
/// plaintext body; the text, not the HTTP status, tells the gateway whether
/// to stop retrying. Safe to deliver the same payload any number of times.
pub async fn confirm_pay(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let fields = CallbackFields::parse(query.as_deref(), &body);
    match process_notification(&state, &fields).await {
        Ok(NotificationOutcome::PaymentCanceled) => {
            state.metrics.record_ipn("acknowledged_cancel");
            ack(ACK_CANCELED, true)
        }
        Ok(NotificationOutcome::MarkedPaid) => {
            state.metrics.record_ipn("paid");
            ack(ACK_PAID, true)
        }
        Ok(NotificationOutcome::NoChange) => {
            state.metrics.record_ipn("no_change");
            ack(ACK_PAID, true)
        }
        Err(err) => {
            state.metrics.record_ipn(err.code());
            match err {
                GatewayError::OrderNotFound => ack(ACK_ORDER_MISSING, false),
                GatewayError::SignatureMismatch => ack(ACK_BAD_DATA, false),
                other => {
                    error!(error = %other, "notification processing failed");
                    ack(ACK_PROCESSING_FAILED, false)
                }
            }
        }
    }
}

async fn process_notification(
    state: &AppState,
    fields: &CallbackFields,
) -> Result<NotificationOutcome, GatewayError> {
    let order_id = fields.value(ORDER_ID_KEY).unwrap_or_default();
    let supplied_signature = fields.value(SIGNATURE_KEY).unwrap_or_default().to_string();
    let order_status = fields.value(ORDER_STATUS_KEY).unwrap_or_default().to_string();

    let order_id = Uuid::parse_str(order_id).map_err(|_| GatewayError::OrderNotFound)?;
    let order = state
        .store
        .find_by_correlation(order_id)
        .await?
        .ok_or(GatewayError::OrderNotFound)?;

    // Forensic trail first: every received field lands in an internal note
    // before any verification or mutation.
    let mut note = String::from("Gateway notification:\n");
    for (key, value) in fields.received() {
        note.push_str(key);
        note.push_str(": ");
        note.push_str(value);
        note.push('\n');
    }
    if let Err(err) = state.store.append_note(order.id, &note).await {
        warn!(error = %err, order_id = %order.id, "failed to record notification audit note");
    }

    // Recompute over everything received except the signature itself;
    // gateway-added fields we know nothing about still participate.
    let payload: SignablePayload = fields
        .received()
        .iter()
        .filter(|(key, _)| !key.eq_ignore_ascii_case(SIGNATURE_KEY))
        .cloned()
        .collect();
    if !verify(&payload, &supplied_signature, &state.config.credentials()) {
        return Err(GatewayError::SignatureMismatch);
    }

    match GatewayStatus::parse(&order_status) {
        GatewayStatus::Declined | GatewayStatus::Expired => Ok(NotificationOutcome::PaymentCanceled),
        GatewayStatus::Approved if order.can_mark_paid() => {
            if state.store.mark_paid(order.id).await? {
                info!(order_id = %order.id, order_number = order.number, "order marked paid from gateway notification");
                Ok(NotificationOutcome::MarkedPaid)
            } else {
                // Lost the race against a concurrent delivery; the order is
                // paid either way.
                Ok(NotificationOutcome::NoChange)
            }
        }
        _ => Ok(NotificationOutcome::NoChange),
    }
}

/// Browser redirect target after checkout. The order being `Paid` already is
/// the trigger to double-check that state against the gateway before the
/// customer sees a confirmation page.
pub async fn success_return(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let fields = CallbackFields::parse(query.as_deref(), &body);
    let Some(order) = resolve_order(&state, &fields).await else {
        return Redirect::to(&state.config.home_url()).into_response();
    };

    if order.payment_status == PaymentStatus::Paid {
        requery_and_transition(&state, &order).await;
    }

    Redirect::to(&state.config.checkout_completed_url(order.number)).into_response()
}

/// Browser redirect target after an explicit cancellation at the gateway.
pub async fn cancel_return(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let fields = CallbackFields::parse(query.as_deref(), &body);
    let Some(order) = resolve_order(&state, &fields).await else {
        return Redirect::to(&state.config.home_url()).into_response();
    };

    if order.payment_status != PaymentStatus::Voided {
        requery_and_transition(&state, &order).await;
    }

    Redirect::to(&state.config.order_details_url(order.number)).into_response()
}

async fn resolve_order(state: &AppState, fields: &CallbackFields) -> Option<Order> {
    let order_id = Uuid::parse_str(fields.value(ORDER_ID_KEY).unwrap_or_default()).ok()?;
    match state.store.find_by_correlation(order_id).await {
        Ok(order) => order,
        Err(err) => {
            warn!(error = %err, %order_id, "order lookup failed on browser return");
            None
        }
    }
}

async fn requery_and_transition(state: &AppState, order: &Order) {
    match state
        .status_client
        .query(order.id, &state.config.credentials())
        .await
    {
        Ok(remote) => {
            state.metrics.record_status_query(remote.status.as_str());
            apply_remote_transition(state, order, remote.status).await;
        }
        Err(err) => {
            // Transient: leave the order alone and let the redirect proceed;
            // the async notification remains authoritative.
            state.metrics.record_status_query("transport_error");
            warn!(error = %err, order_id = %order.id, "status re-check failed; order state unchanged");
        }
    }
}

/// Shared transition rules for the queried status. Never moves an order
/// backward: cancellation requires a currently Paid/Authorized cancelable
/// order, payment requires eligibility.
async fn apply_remote_transition(state: &AppState, order: &Order, status: GatewayStatus) {
    match status {
        GatewayStatus::Declined | GatewayStatus::Expired => {
            let eligible = matches!(
                order.payment_status,
                PaymentStatus::Paid | PaymentStatus::Authorized
            ) && order.can_cancel();
            if eligible {
                match state.store.cancel(order.id, true).await {
                    Ok(true) => {
                        info!(order_id = %order.id, order_number = order.number, "order cancelled after gateway status re-check")
                    }
                    Ok(false) => {}
                    Err(err) => warn!(error = %err, order_id = %order.id, "failed to cancel order"),
                }
            }
        }
        GatewayStatus::Approved => {
            if order.can_mark_paid() {
                match state.store.mark_paid(order.id).await {
                    Ok(true) => {
                        info!(order_id = %order.id, order_number = order.number, "order marked paid after gateway status re-check")
                    }
                    Ok(false) => {}
                    Err(err) => warn!(error = %err, order_id = %order.id, "failed to mark order paid"),
                }
            }
        }
        GatewayStatus::Ok | GatewayStatus::Unknown => {}
    }
}
