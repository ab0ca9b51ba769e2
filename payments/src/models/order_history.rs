// orderflow/payments/src/models/order_history.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::models::order::PaidStatus;

/// Append-only record of a payment-driven change to an order.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderHistory {
  pub id: i64,
  pub order_id: i64,
  pub customer_id: Option<i64>,
  pub message: String,
  pub prev_paid_status: Option<PaidStatus>,
  pub new_paid_status: PaidStatus,
  pub date_created: DateTime<Utc>,
}

impl OrderHistory {
  pub fn new(order_id: i64, customer_id: Option<i64>, message: impl Into<String>) -> Self {
    Self {
      id: 0,
      order_id,
      customer_id,
      message: message.into(),
      prev_paid_status: None,
      new_paid_status: PaidStatus::Unpaid,
      date_created: Utc::now(),
    }
  }
}
