//! Out-of-band re-check against the gateway's order-status endpoint. The
//! browser-return paths call this instead of trusting redirect parameters.

use std::time::Duration;

use reqwest::Client;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::signature::{sign, MerchantCredentials, SignablePayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Approved,
    Declined,
    Expired,
    Ok,
    Unknown,
}

impl GatewayStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "approved" => GatewayStatus::Approved,
            "declined" => GatewayStatus::Declined,
            "expired" => GatewayStatus::Expired,
            "ok" => GatewayStatus::Ok,
            _ => GatewayStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayStatus::Approved => "approved",
            GatewayStatus::Declined => "declined",
            GatewayStatus::Expired => "expired",
            GatewayStatus::Ok => "ok",
            GatewayStatus::Unknown => "unknown",
        }
    }
}

/// Normalized status-endpoint answer. A malformed or incomplete response
/// body parses to `Unknown` with an empty amount; callers must check for the
/// sentinel before acting. Transport failures are errors instead.
#[derive(Debug, Clone)]
pub struct RemoteStatus {
    pub status: GatewayStatus,
    /// Raw amount echoed by the gateway; empty when absent.
    pub amount: String,
}

pub struct StatusClient {
    http: Client,
    endpoint: String,
    timeout: Duration,
}

impl StatusClient {
    pub fn new(http: Client, endpoint: String, timeout: Duration) -> Self {
        Self { http, endpoint, timeout }
    }

    pub async fn query(
        &self,
        order_id: Uuid,
        credentials: &MerchantCredentials,
    ) -> Result<RemoteStatus, GatewayError> {
        let mut payload = SignablePayload::new();
        payload.insert("merchant_id", credentials.effective_merchant_id());
        payload.insert("order_id", order_id.to_string());
        let signature = sign(&payload, credentials);

        let form = [
            ("merchant_id", credentials.effective_merchant_id().to_string()),
            ("order_id", order_id.to_string()),
            ("signature", signature),
        ];
        let response = self
            .http
            .post(&self.endpoint)
            .timeout(self.timeout)
            .form(&form)
            .send()
            .await
            .map_err(|err| GatewayError::RemoteQuery(err.to_string()))?;
        if !response.status().is_success() {
            return Err(GatewayError::RemoteQuery(format!(
                "status endpoint returned {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|err| GatewayError::RemoteQuery(err.to_string()))?;
        Ok(parse_status_body(&body))
    }
}

fn parse_status_body(body: &str) -> RemoteStatus {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(body).unwrap_or_default();
    let field = |key: &str| {
        pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    };
    let status = field("order_status")
        .map(|value| GatewayStatus::parse(&value))
        .unwrap_or(GatewayStatus::Unknown);
    let amount = field("amount").unwrap_or_default();
    RemoteStatus { status, amount }
}
