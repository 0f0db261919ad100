//! Order lookup and payment-state transitions.
//!
//! Both callback paths may race on the same order (the gateway can deliver
//! the server notification and the browser return concurrently), so the
//! mark-paid / cancel operations are compare-and-set: the store applies the
//! transition only from an eligible state and reports whether it did.
//! Duplicate deliveries collapse to a single transition.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Authorized,
    Paid,
    Voided,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Authorized => "authorized",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Voided => "voided",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<PaymentStatus> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "authorized" => Some(PaymentStatus::Authorized),
            "paid" => Some(PaymentStatus::Paid),
            "voided" => Some(PaymentStatus::Voided),
            "cancelled" => Some(PaymentStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Order {
    /// Correlation id embedded in outbound requests and echoed by callbacks.
    pub id: Uuid,
    /// Human-readable order sequence number shown to the customer.
    pub number: i64,
    pub total: BigDecimal,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn can_mark_paid(&self) -> bool {
        matches!(self.payment_status, PaymentStatus::Pending | PaymentStatus::Authorized)
    }

    pub fn can_cancel(&self) -> bool {
        !matches!(self.payment_status, PaymentStatus::Voided | PaymentStatus::Cancelled)
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_by_correlation(&self, id: Uuid) -> Result<Option<Order>>;
    /// Append an internal (non-customer-visible) note to the order.
    async fn append_note(&self, order_id: Uuid, note: &str) -> Result<()>;
    /// pending/authorized -> paid. Returns whether the transition applied.
    async fn mark_paid(&self, order_id: Uuid) -> Result<bool>;
    /// Any cancelable state -> cancelled. Returns whether the transition applied.
    async fn cancel(&self, order_id: Uuid, notify_customer: bool) -> Result<bool>;
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: i64,
    total: BigDecimal,
    payment_status: String,
    created_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self) -> Result<Order> {
        let payment_status = PaymentStatus::from_str(&self.payment_status)
            .ok_or_else(|| anyhow!("order {} has unknown payment status {:?}", self.id, self.payment_status))?;
        Ok(Order {
            id: self.id,
            number: self.order_number,
            total: self.total,
            payment_status,
            created_at: self.created_at,
        })
    }
}

pub struct PgOrderStore {
    db: PgPool,
}

impl PgOrderStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn find_by_correlation(&self, id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(
            r#"SELECT id, order_number, total, payment_status, created_at
               FROM orders WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(OrderRow::into_order).transpose()
    }

    async fn append_note(&self, order_id: Uuid, note: &str) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO order_notes (order_id, note, display_to_customer)
               VALUES ($1, $2, false)"#,
        )
        .bind(order_id)
        .bind(note)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn mark_paid(&self, order_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE orders SET payment_status = 'paid', updated_at = now()
               WHERE id = $1 AND payment_status IN ('pending', 'authorized')"#,
        )
        .bind(order_id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn cancel(&self, order_id: Uuid, notify_customer: bool) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE orders SET payment_status = 'cancelled', updated_at = now()
               WHERE id = $1 AND payment_status NOT IN ('voided', 'cancelled')"#,
        )
        .bind(order_id)
        .execute(&self.db)
        .await?;
        let cancelled = result.rows_affected() == 1;
        if cancelled && notify_customer {
            self.append_note(order_id, "Order cancelled; customer notified.").await?;
        }
        Ok(cancelled)
    }
}

/// Mutex-guarded map standing in for the store's order service. Used by the
/// integration tests and for DB-less local development.
#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: Mutex<HashMap<Uuid, Order>>,
    notes: Mutex<Vec<(Uuid, String)>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, order: Order) {
        self.orders.lock().unwrap().insert(order.id, order);
    }

    pub fn status_of(&self, id: Uuid) -> Option<PaymentStatus> {
        self.orders.lock().unwrap().get(&id).map(|o| o.payment_status)
    }

    pub fn notes_for(&self, id: Uuid) -> Vec<String> {
        self.notes
            .lock()
            .unwrap()
            .iter()
            .filter(|(order_id, _)| *order_id == id)
            .map(|(_, note)| note.clone())
            .collect()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn find_by_correlation(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.orders.lock().unwrap().get(&id).cloned())
    }

    async fn append_note(&self, order_id: Uuid, note: &str) -> Result<()> {
        self.notes.lock().unwrap().push((order_id, note.to_string()));
        Ok(())
    }

    async fn mark_paid(&self, order_id: Uuid) -> Result<bool> {
        let mut orders = self.orders.lock().unwrap();
        let Some(order) = orders.get_mut(&order_id) else { return Ok(false) };
        if !order.can_mark_paid() {
            return Ok(false);
        }
        order.payment_status = PaymentStatus::Paid;
        Ok(true)
    }

    async fn cancel(&self, order_id: Uuid, notify_customer: bool) -> Result<bool> {
        let cancelled = {
            let mut orders = self.orders.lock().unwrap();
            let Some(order) = orders.get_mut(&order_id) else { return Ok(false) };
            if !order.can_cancel() {
                return Ok(false);
            }
            order.payment_status = PaymentStatus::Cancelled;
            true
        };
        if cancelled && notify_customer {
            self.append_note(order_id, "Order cancelled; customer notified.").await?;
        }
        Ok(cancelled)
    }
}
