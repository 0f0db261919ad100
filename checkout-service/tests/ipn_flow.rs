use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use bigdecimal::BigDecimal;
use chrono::Utc;
use tower::ServiceExt;
use uuid::Uuid;

use checkout_service::{
    build_router, sign, AppState, CheckoutConfig, CheckoutMetrics, InMemoryOrderStore,
    MerchantCredentials, Order, PaymentStatus, SignablePayload, StatusClient,
};

const SECRET: &str = "s3cr3t";

fn test_config() -> CheckoutConfig {
    CheckoutConfig {
        merchant_id: "1396424".into(),
        secret_key: SECRET.into(),
        testing_mode: false,
        currency: "USD".into(),
        description_template: "Pay for order #$orderId".into(),
        checkout_url: "https://gateway.test/api/checkout/redirect/".into(),
        status_url: "http://127.0.0.1:1/api/status/order_id".into(),
        public_base_url: "https://pay.shop.test".into(),
        store_base_url: "https://shop.test".into(),
        status_timeout_secs: 1,
    }
}

fn test_app(status: PaymentStatus) -> (Arc<InMemoryOrderStore>, Uuid, Router) {
    let store = Arc::new(InMemoryOrderStore::new());
    let order_id = Uuid::new_v4();
    store.insert(Order {
        id: order_id,
        number: 1001,
        total: BigDecimal::from(10),
        payment_status: status,
        created_at: Utc::now(),
    });
    let config = Arc::new(test_config());
    let state = AppState {
        store: store.clone(),
        status_client: Arc::new(StatusClient::new(
            reqwest::Client::new(),
            config.status_url.clone(),
            Duration::from_secs(1),
        )),
        config,
        metrics: Arc::new(CheckoutMetrics::new().unwrap()),
    };
    (store, order_id, build_router(state))
}

fn creds() -> MerchantCredentials {
    MerchantCredentials {
        merchant_id: "1396424".into(),
        secret_key: SECRET.into(),
        testing_mode: false,
    }
}

fn signed_fields(order_id: Uuid, order_status: &str) -> Vec<(String, String)> {
    let mut fields = vec![
        ("amount".to_string(), "1000".to_string()),
        ("currency".to_string(), "USD".to_string()),
        ("order_id".to_string(), order_id.to_string()),
        ("order_status".to_string(), order_status.to_string()),
    ];
    let payload: SignablePayload = fields.iter().cloned().collect();
    fields.push(("signature".to_string(), sign(&payload, &creds())));
    fields
}

async fn post_ipn(app: &Router, fields: &[(String, String)]) -> (StatusCode, String) {
    let body = serde_urlencoded::to_string(fields).unwrap();
    let req = Request::builder()
        .uri("/callbacks/confirm")
        .method("POST")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn approved_notification_marks_order_paid() {
    let (store, order_id, app) = test_app(PaymentStatus::Pending);
    let fields = signed_fields(order_id, "approved");

    let (status, body) = post_ipn(&app, &fields).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "The order has been paid");
    assert_eq!(store.status_of(order_id), Some(PaymentStatus::Paid));

    // the audit note lands before verification and lists every field
    let notes = store.notes_for(order_id);
    assert_eq!(notes.len(), 1);
    assert!(notes[0].contains("order_status: approved"));
    assert!(notes[0].contains("amount: 1000"));
}

#[tokio::test]
async fn duplicate_delivery_is_idempotent() {
    let (store, order_id, app) = test_app(PaymentStatus::Pending);
    let fields = signed_fields(order_id, "approved");

    let (_, first) = post_ipn(&app, &fields).await;
    let (_, second) = post_ipn(&app, &fields).await;
    assert_eq!(first, "The order has been paid");
    assert_eq!(second, "The order has been paid");
    assert_eq!(store.status_of(order_id), Some(PaymentStatus::Paid));
    // both deliveries were recorded for forensics
    assert_eq!(store.notes_for(order_id).len(), 2);
}

#[tokio::test]
async fn tampered_amount_is_rejected_without_state_change() {
    let (store, order_id, app) = test_app(PaymentStatus::Pending);
    let mut fields = signed_fields(order_id, "approved");
    fields.iter_mut().find(|(k, _)| k == "amount").unwrap().1 = "1001".to_string();

    let (status, body) = post_ipn(&app, &fields).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Invalid order data");
    assert_eq!(store.status_of(order_id), Some(PaymentStatus::Pending));
}

#[tokio::test]
async fn wrong_secret_is_rejected() {
    let (store, order_id, app) = test_app(PaymentStatus::Pending);
    let mut fields: Vec<(String, String)> = vec![
        ("amount".to_string(), "1000".to_string()),
        ("currency".to_string(), "USD".to_string()),
        ("order_id".to_string(), order_id.to_string()),
        ("order_status".to_string(), "approved".to_string()),
    ];
    let payload: SignablePayload = fields.iter().cloned().collect();
    let wrong = MerchantCredentials {
        merchant_id: "1396424".into(),
        secret_key: "wrong".into(),
        testing_mode: false,
    };
    fields.push(("signature".to_string(), sign(&payload, &wrong)));

    let (_, body) = post_ipn(&app, &fields).await;
    assert_eq!(body, "Invalid order data");
    assert_eq!(store.status_of(order_id), Some(PaymentStatus::Pending));
}

#[tokio::test]
async fn gateway_added_fields_participate_in_verification() {
    let (store, order_id, app) = test_app(PaymentStatus::Pending);
    let mut fields = vec![
        ("amount".to_string(), "1000".to_string()),
        ("currency".to_string(), "USD".to_string()),
        ("order_id".to_string(), order_id.to_string()),
        ("order_status".to_string(), "approved".to_string()),
        ("payment_id".to_string(), "7781".to_string()),
    ];
    let payload: SignablePayload = fields.iter().cloned().collect();
    fields.push(("signature".to_string(), sign(&payload, &creds())));

    let (_, body) = post_ipn(&app, &fields).await;
    assert_eq!(body, "The order has been paid");
    assert_eq!(store.status_of(order_id), Some(PaymentStatus::Paid));

    // tampering with the echoed extra field breaks the signature too
    let (store2, order_id2, app2) = test_app(PaymentStatus::Pending);
    let mut tampered = vec![
        ("amount".to_string(), "1000".to_string()),
        ("currency".to_string(), "USD".to_string()),
        ("order_id".to_string(), order_id2.to_string()),
        ("order_status".to_string(), "approved".to_string()),
        ("payment_id".to_string(), "7781".to_string()),
    ];
    let payload: SignablePayload = tampered.iter().cloned().collect();
    let signature = sign(&payload, &creds());
    tampered.iter_mut().find(|(k, _)| k == "payment_id").unwrap().1 = "9999".to_string();
    tampered.push(("signature".to_string(), signature));
    let (_, body) = post_ipn(&app2, &tampered).await;
    assert_eq!(body, "Invalid order data");
    assert_eq!(store2.status_of(order_id2), Some(PaymentStatus::Pending));
}

#[tokio::test]
async fn declined_is_acknowledged_without_cancelling() {
    let (store, order_id, app) = test_app(PaymentStatus::Pending);
    let fields = signed_fields(order_id, "declined");

    let (status, body) = post_ipn(&app, &fields).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "The payment has been canceled");
    // cancellation belongs to the browser-return path
    assert_eq!(store.status_of(order_id), Some(PaymentStatus::Pending));
}

#[tokio::test]
async fn expired_is_acknowledged_like_declined() {
    let (store, order_id, app) = test_app(PaymentStatus::Pending);
    let fields = signed_fields(order_id, "expired");

    let (_, body) = post_ipn(&app, &fields).await;
    assert_eq!(body, "The payment has been canceled");
    assert_eq!(store.status_of(order_id), Some(PaymentStatus::Pending));
}

#[tokio::test]
async fn unknown_order_cannot_be_loaded() {
    let (_store, _order_id, app) = test_app(PaymentStatus::Pending);
    let fields = signed_fields(Uuid::new_v4(), "approved");

    let (status, body) = post_ipn(&app, &fields).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Order cannot be loaded");
}

#[tokio::test]
async fn malformed_order_id_cannot_be_loaded() {
    let (_store, _order_id, app) = test_app(PaymentStatus::Pending);
    let fields = vec![
        ("order_id".to_string(), "not-a-uuid".to_string()),
        ("order_status".to_string(), "approved".to_string()),
        ("signature".to_string(), "deadbeef".to_string()),
    ];
    let (_, body) = post_ipn(&app, &fields).await;
    assert_eq!(body, "Order cannot be loaded");
}

#[tokio::test]
async fn query_string_transport_is_accepted() {
    let (store, order_id, app) = test_app(PaymentStatus::Pending);
    let fields = signed_fields(order_id, "approved");
    let query = serde_urlencoded::to_string(&fields).unwrap();

    let req = Request::builder()
        .uri(format!("/callbacks/confirm?{query}"))
        .method("GET")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
    assert_eq!(String::from_utf8(bytes.to_vec()).unwrap(), "The order has been paid");
    assert_eq!(store.status_of(order_id), Some(PaymentStatus::Paid));
}

#[tokio::test]
async fn ack_content_type_is_html_utf8() {
    let (_store, order_id, app) = test_app(PaymentStatus::Pending);
    let fields = signed_fields(order_id, "approved");
    let body = serde_urlencoded::to_string(&fields).unwrap();
    let req = Request::builder()
        .uri("/callbacks/confirm")
        .method("POST")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
    assert_eq!(content_type, "text/html; charset=utf-8");
}
