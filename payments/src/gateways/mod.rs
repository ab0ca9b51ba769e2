// orderflow/payments/src/gateways/mod.rs

//! The payment gateway capability interface and the registry gateways are resolved through.

pub mod form;
pub mod mock;

pub use form::PaymentForm;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{NewPaymentSource, Order, Transaction, TransactionOutcome, TransactionStatus, TransactionType};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
  #[error("{0}")]
  Declined(String),

  #[error("The gateway does not support {0}.")]
  NotSupported(&'static str),

  #[error("Gateway request failed: {0}")]
  Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
  Success,
  /// The customer must continue at the given off-site URL.
  Redirect(String),
  Processing,
  Failed,
}

/// What a gateway reports about one interaction. `data` is the raw payload and is only ever
/// stored on the transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
  pub outcome: GatewayOutcome,
  pub reference: Option<String>,
  pub code: Option<String>,
  pub message: Option<String>,
  pub data: Value,
}

impl GatewayResponse {
  fn with_outcome(outcome: GatewayOutcome) -> Self {
    Self {
      outcome,
      reference: None,
      code: None,
      message: None,
      data: Value::Null,
    }
  }

  pub fn success(reference: impl Into<String>) -> Self {
    Self {
      reference: Some(reference.into()),
      ..Self::with_outcome(GatewayOutcome::Success)
    }
  }

  pub fn redirect(url: impl Into<String>, reference: impl Into<String>) -> Self {
    Self {
      reference: Some(reference.into()),
      ..Self::with_outcome(GatewayOutcome::Redirect(url.into()))
    }
  }

  pub fn processing(reference: impl Into<String>) -> Self {
    Self {
      reference: Some(reference.into()),
      ..Self::with_outcome(GatewayOutcome::Processing)
    }
  }

  pub fn failed(message: impl Into<String>) -> Self {
    Self {
      message: Some(message.into()),
      ..Self::with_outcome(GatewayOutcome::Failed)
    }
  }

  pub fn with_code(mut self, code: impl Into<String>) -> Self {
    self.code = Some(code.into());
    self
  }

  pub fn with_data(mut self, data: Value) -> Self {
    self.data = data;
    self
  }

  pub fn redirect_url(&self) -> Option<&str> {
    match &self.outcome {
      GatewayOutcome::Redirect(url) => Some(url),
      _ => None,
    }
  }

  pub fn to_outcome(&self) -> TransactionOutcome {
    let status = match self.outcome {
      GatewayOutcome::Success => TransactionStatus::Success,
      GatewayOutcome::Redirect(_) => TransactionStatus::Redirect,
      GatewayOutcome::Processing => TransactionStatus::Processing,
      GatewayOutcome::Failed => TransactionStatus::Failed,
    };
    TransactionOutcome {
      status,
      reference: self.reference.clone(),
      code: self.code.clone(),
      message: self.message.clone(),
      response: Some(self.data.clone()),
    }
  }
}

/// Where an off-site gateway sends the customer back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackUrls {
  pub return_url: String,
  pub cancel_url: String,
}

#[async_trait]
pub trait Gateway: Send + Sync {
  fn id(&self) -> i64;
  fn handle(&self) -> &str;
  fn name(&self) -> &str;

  /// Whether payments through this gateway authorize first or purchase outright.
  fn payment_type(&self) -> TransactionType;

  fn available_for_use_with_order(&self, _order: &Order) -> bool {
    true
  }

  fn supports_payment_sources(&self) -> bool {
    false
  }

  /// An empty form describing the fields this gateway needs.
  fn payment_form_model(&self) -> PaymentForm;

  async fn process_payment(
    &self,
    order: &Order,
    form: &PaymentForm,
    transaction: &Transaction,
    urls: &CallbackUrls,
  ) -> Result<GatewayResponse, GatewayError>;

  /// Finalizes a payment the customer completed off-site.
  async fn complete_payment(&self, transaction: &Transaction) -> Result<GatewayResponse, GatewayError>;

  async fn create_payment_source(&self, _form: &PaymentForm, _user_id: i64) -> Result<NewPaymentSource, GatewayError> {
    Err(GatewayError::NotSupported("payment sources"))
  }

  async fn capture(&self, _transaction: &Transaction) -> Result<GatewayResponse, GatewayError> {
    Err(GatewayError::NotSupported("capture"))
  }

  async fn refund(&self, _transaction: &Transaction, _amount: Decimal) -> Result<GatewayResponse, GatewayError> {
    Err(GatewayError::NotSupported("refunds"))
  }
}

impl fmt::Debug for dyn Gateway {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Gateway")
      .field("id", &self.id())
      .field("handle", &self.handle())
      .finish()
  }
}

/// Gateways known to the application, keyed by id.
#[derive(Default, Clone)]
pub struct GatewayRegistry {
  gateways: BTreeMap<i64, Arc<dyn Gateway>>,
}

impl GatewayRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, gateway: Arc<dyn Gateway>) {
    tracing::debug!(gateway_id = gateway.id(), handle = gateway.handle(), "Registering gateway");
    self.gateways.insert(gateway.id(), gateway);
  }

  pub fn with(mut self, gateway: Arc<dyn Gateway>) -> Self {
    self.register(gateway);
    self
  }

  pub fn get(&self, id: i64) -> Option<Arc<dyn Gateway>> {
    self.gateways.get(&id).cloned()
  }

  pub fn by_handle(&self, handle: &str) -> Option<Arc<dyn Gateway>> {
    self.gateways.values().find(|g| g.handle() == handle).cloned()
  }

  pub fn ids(&self) -> Vec<i64> {
    self.gateways.keys().copied().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn responses_map_onto_transaction_outcomes() {
    let redirect = GatewayResponse::redirect("https://pay.example/abc", "ref-1");
    assert_eq!(redirect.redirect_url(), Some("https://pay.example/abc"));
    assert_eq!(redirect.to_outcome().status, TransactionStatus::Redirect);

    let failed = GatewayResponse::failed("Card expired").with_code("expired");
    let outcome = failed.to_outcome();
    assert_eq!(outcome.status, TransactionStatus::Failed);
    assert_eq!(outcome.message.as_deref(), Some("Card expired"));
    assert_eq!(outcome.code.as_deref(), Some("expired"));
    assert!(failed.redirect_url().is_none());
  }

  #[test]
  fn registry_resolves_by_id_and_handle() {
    let registry = GatewayRegistry::new()
      .with(Arc::new(mock::DummyGateway::new(1)))
      .with(Arc::new(mock::OffsiteGateway::new(2, "https://pay.example/checkout")));
    assert_eq!(registry.get(2).map(|g| g.handle().to_string()), Some("offsite".to_string()));
    assert_eq!(registry.by_handle("dummy").map(|g| g.id()), Some(1));
    assert!(registry.get(9).is_none());
    assert_eq!(registry.ids(), vec![1, 2]);
  }
}
