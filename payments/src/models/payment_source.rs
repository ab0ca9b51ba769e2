// orderflow/payments/src/models/payment_source.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::FromRow;

/// A gateway-tokenized payment method saved for a user.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSource {
  pub id: i64,
  pub user_id: i64,
  pub gateway_id: i64,
  #[serde(skip_serializing)]
  pub token: String,
  pub description: String,
  #[serde(skip_serializing)]
  pub response: Value,
  pub date_created: DateTime<Utc>,
}

/// What a gateway hands back when it tokenizes a payment form.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPaymentSource {
  pub user_id: i64,
  pub gateway_id: i64,
  pub token: String,
  pub description: String,
  pub response: Value,
}
