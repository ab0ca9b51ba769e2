// orderflow/payments/src/models/transaction.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, Type as SqlxType};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "transaction_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
  Authorize,
  Purchase,
  Capture,
  Refund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "transaction_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
  Pending,
  Redirect,
  Success,
  Failed,
  Processing,
}

impl TransactionStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(self, TransactionStatus::Success | TransactionStatus::Failed)
  }

  /// pending -> redirect|processing|success|failed, redirect -> processing|success|failed,
  /// processing -> success|failed. Terminal states never change.
  pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
    use TransactionStatus::*;
    match (self, next) {
      (Pending, Redirect | Processing | Success | Failed) => true,
      (Redirect, Processing | Success | Failed) => true,
      (Processing, Success | Failed) => true,
      _ => false,
    }
  }
}

/// One gateway interaction, recorded before the gateway is called.
///
/// Amount fields are fixed at creation; only the outcome fields change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
  pub id: i64,
  pub hash: String,
  pub order_id: i64,
  pub parent_id: Option<i64>,
  pub gateway_id: i64,
  pub user_id: Option<i64>,
  #[serde(rename = "type")]
  pub kind: TransactionType,
  pub status: TransactionStatus,
  pub amount: Decimal,
  pub currency: String,
  pub payment_amount: Decimal,
  pub payment_currency: String,
  pub payment_rate: Decimal,
  pub reference: Option<String>,
  pub code: Option<String>,
  pub message: Option<String>,
  pub note: Option<String>,
  /// Raw gateway payload. Kept out of every client-facing serialization.
  #[serde(skip_serializing)]
  pub response: Value,
  pub date_created: DateTime<Utc>,
  pub date_updated: DateTime<Utc>,
}

impl Transaction {
  /// A pending, unsaved transaction with a fresh unguessable hash.
  pub fn new(order_id: i64, gateway_id: i64, kind: TransactionType) -> Self {
    let now = Utc::now();
    Self {
      id: 0,
      hash: Uuid::new_v4().simple().to_string(),
      order_id,
      parent_id: None,
      gateway_id,
      user_id: None,
      kind,
      status: TransactionStatus::Pending,
      amount: Decimal::ZERO,
      currency: String::new(),
      payment_amount: Decimal::ZERO,
      payment_currency: String::new(),
      payment_rate: Decimal::ONE,
      reference: None,
      code: None,
      message: None,
      note: None,
      response: Value::Null,
      date_created: now,
      date_updated: now,
    }
  }

  pub fn is_successful(&self) -> bool {
    self.status == TransactionStatus::Success
  }

  pub fn is_failed(&self) -> bool {
    self.status == TransactionStatus::Failed
  }

  /// Copies the outcome onto this transaction. Amount fields are left alone.
  pub fn apply_outcome(&mut self, outcome: &TransactionOutcome, now: DateTime<Utc>) {
    self.status = outcome.status;
    if let Some(reference) = &outcome.reference {
      self.reference = Some(reference.clone());
    }
    if let Some(code) = &outcome.code {
      self.code = Some(code.clone());
    }
    if let Some(message) = &outcome.message {
      self.message = Some(message.clone());
    }
    if let Some(response) = &outcome.response {
      self.response = response.clone();
    }
    self.date_updated = now;
  }
}

/// The mutable part of a transaction: what the gateway said about it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOutcome {
  pub status: TransactionStatus,
  pub reference: Option<String>,
  pub code: Option<String>,
  pub message: Option<String>,
  pub response: Option<Value>,
}

impl TransactionOutcome {
  pub fn status(status: TransactionStatus) -> Self {
    Self {
      status,
      reference: None,
      code: None,
      message: None,
      response: None,
    }
  }

  pub fn failed(message: impl Into<String>) -> Self {
    Self {
      message: Some(message.into()),
      ..Self::status(TransactionStatus::Failed)
    }
  }

  pub fn processing(message: impl Into<String>) -> Self {
    Self {
      message: Some(message.into()),
      ..Self::status(TransactionStatus::Processing)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use TransactionStatus::*;

  #[test]
  fn terminal_states_never_transition() {
    for next in [Pending, Redirect, Success, Failed, Processing] {
      assert!(!Success.can_transition_to(next));
      assert!(!Failed.can_transition_to(next));
    }
  }

  #[test]
  fn open_states_move_forward_only() {
    assert!(Pending.can_transition_to(Redirect));
    assert!(Redirect.can_transition_to(Processing));
    assert!(Processing.can_transition_to(Success));
    assert!(!Redirect.can_transition_to(Pending));
    assert!(!Processing.can_transition_to(Redirect));
  }

  #[test]
  fn hashes_are_unique_hex() {
    let a = Transaction::new(1, 1, TransactionType::Purchase);
    let b = Transaction::new(1, 1, TransactionType::Purchase);
    assert_eq!(a.hash.len(), 32);
    assert!(a.hash.chars().all(|c| c.is_ascii_hexdigit()));
    assert_ne!(a.hash, b.hash);
  }

  #[test]
  fn raw_response_is_not_serialized() {
    let mut tx = Transaction::new(1, 1, TransactionType::Purchase);
    tx.response = serde_json::json!({ "card": "4242" });
    let json = serde_json::to_value(&tx).unwrap();
    assert!(json.get("response").is_none());
    assert_eq!(json["type"], "purchase");
  }

  #[test]
  fn outcome_keeps_earlier_reference_when_absent() {
    let mut tx = Transaction::new(1, 1, TransactionType::Purchase);
    tx.reference = Some("ref-1".into());
    tx.apply_outcome(&TransactionOutcome::failed("declined"), Utc::now());
    assert_eq!(tx.status, Failed);
    assert_eq!(tx.reference.as_deref(), Some("ref-1"));
    assert_eq!(tx.message.as_deref(), Some("declined"));
  }
}
