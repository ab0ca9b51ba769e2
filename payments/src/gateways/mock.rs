// orderflow/payments/src/gateways/mock.rs

//! Simulated gateways. They follow the interaction shapes of real providers without speaking any
//! provider protocol.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use std::time::Duration;
use tracing::{info, instrument};
use url::form_urlencoded;
use uuid::Uuid;

use super::{CallbackUrls, Gateway, GatewayError, GatewayResponse, PaymentForm};
use crate::models::{NewPaymentSource, Order, Transaction, TransactionType};

/// Card number the dummy gateway always declines.
pub const DECLINED_CARD_NUMBER: &str = "4000000000000002";

const CARD_FIELDS: &[&str] = &["firstName", "lastName", "number", "month", "year", "cvv"];

fn mock_reference(prefix: &str) -> String {
  format!("{}_{}", prefix, Uuid::new_v4().simple())
}

/// On-site card gateway that settles payments immediately.
#[derive(Debug, Clone)]
pub struct DummyGateway {
  id: i64,
  latency: Duration,
}

impl DummyGateway {
  pub fn new(id: i64) -> Self {
    Self {
      id,
      latency: Duration::from_millis(50),
    }
  }

  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  fn card_number<'a>(form: &'a PaymentForm) -> Option<&'a str> {
    form.token.as_deref().and_then(|t| t.strip_prefix("tok_")).or(form.get("number"))
  }
}

#[async_trait]
impl Gateway for DummyGateway {
  fn id(&self) -> i64 {
    self.id
  }

  fn handle(&self) -> &str {
    "dummy"
  }

  fn name(&self) -> &str {
    "Dummy"
  }

  fn payment_type(&self) -> TransactionType {
    TransactionType::Purchase
  }

  fn supports_payment_sources(&self) -> bool {
    true
  }

  fn payment_form_model(&self) -> PaymentForm {
    PaymentForm::new(CARD_FIELDS)
  }

  #[instrument(name = "gateway::dummy::process_payment", skip_all, fields(tx_hash = %transaction.hash, amount = %transaction.payment_amount))]
  async fn process_payment(
    &self,
    _order: &Order,
    form: &PaymentForm,
    transaction: &Transaction,
    _urls: &CallbackUrls,
  ) -> Result<GatewayResponse, GatewayError> {
    tokio::time::sleep(self.latency).await;

    let number = Self::card_number(form).unwrap_or_default();
    if number == DECLINED_CARD_NUMBER {
      info!("Simulated card decline");
      return Ok(GatewayResponse::failed("The card was declined.").with_code("card_declined"));
    }
    let reference = mock_reference("dummy_ch");
    info!(%reference, "Simulated charge succeeded");
    Ok(
      GatewayResponse::success(reference.clone())
        .with_code("approved")
        .with_data(json!({ "id": reference, "amount": transaction.payment_amount, "currency": transaction.payment_currency })),
    )
  }

  async fn complete_payment(&self, _transaction: &Transaction) -> Result<GatewayResponse, GatewayError> {
    Err(GatewayError::NotSupported("off-site completion"))
  }

  #[instrument(name = "gateway::dummy::create_payment_source", skip_all, fields(user_id))]
  async fn create_payment_source(&self, form: &PaymentForm, user_id: i64) -> Result<NewPaymentSource, GatewayError> {
    tokio::time::sleep(self.latency).await;
    let number = form
      .get("number")
      .ok_or_else(|| GatewayError::Declined("A card number is required to save a payment source.".to_string()))?;
    if !number.chars().all(|c| c.is_ascii_digit()) || number.len() < 12 {
      return Err(GatewayError::Declined("The card number is invalid.".to_string()));
    }
    let last4 = &number[number.len() - 4..];
    Ok(NewPaymentSource {
      user_id,
      gateway_id: self.id,
      token: format!("tok_{}", number),
      description: format!("Card ending in {}", last4),
      response: json!({ "last4": last4 }),
    })
  }

  async fn refund(&self, transaction: &Transaction, amount: Decimal) -> Result<GatewayResponse, GatewayError> {
    tokio::time::sleep(self.latency).await;
    let reference = mock_reference("dummy_re");
    Ok(GatewayResponse::success(reference).with_data(json!({ "refunded": amount, "charge": transaction.reference })))
  }
}

/// Redirect-based gateway. The customer pays on the hosted page and comes back through the
/// completion URL.
#[derive(Debug, Clone)]
pub struct OffsiteGateway {
  id: i64,
  checkout_url: String,
  latency: Duration,
}

impl OffsiteGateway {
  pub fn new(id: i64, checkout_url: impl Into<String>) -> Self {
    Self {
      id,
      checkout_url: checkout_url.into(),
      latency: Duration::from_millis(50),
    }
  }

  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  /// The hosted page rejects any amount whose minor units end in 123.
  fn rejects(amount: Decimal) -> bool {
    let minor = (amount * Decimal::ONE_HUNDRED).trunc();
    minor % Decimal::from(1000) == Decimal::from(123)
  }
}

#[async_trait]
impl Gateway for OffsiteGateway {
  fn id(&self) -> i64 {
    self.id
  }

  fn handle(&self) -> &str {
    "offsite"
  }

  fn name(&self) -> &str {
    "Off-site checkout"
  }

  fn payment_type(&self) -> TransactionType {
    TransactionType::Purchase
  }

  fn payment_form_model(&self) -> PaymentForm {
    PaymentForm::new(&[])
  }

  #[instrument(name = "gateway::offsite::process_payment", skip_all, fields(tx_hash = %transaction.hash))]
  async fn process_payment(
    &self,
    _order: &Order,
    _form: &PaymentForm,
    transaction: &Transaction,
    urls: &CallbackUrls,
  ) -> Result<GatewayResponse, GatewayError> {
    tokio::time::sleep(self.latency).await;
    let session = mock_reference("offsite_cs");
    let query = form_urlencoded::Serializer::new(String::new())
      .append_pair("session", &session)
      .append_pair("amount", &transaction.payment_amount.to_string())
      .append_pair("currency", &transaction.payment_currency)
      .append_pair("return", &urls.return_url)
      .append_pair("cancel", &urls.cancel_url)
      .finish();
    let url = format!("{}?{}", self.checkout_url, query);
    info!(%session, "Simulated hosted checkout session created");
    Ok(GatewayResponse::redirect(url, session))
  }

  #[instrument(name = "gateway::offsite::complete_payment", skip_all, fields(tx_hash = %transaction.hash))]
  async fn complete_payment(&self, transaction: &Transaction) -> Result<GatewayResponse, GatewayError> {
    tokio::time::sleep(self.latency * 2).await;
    if Self::rejects(transaction.payment_amount) {
      info!("Simulated hosted payment FAILED");
      return Ok(GatewayResponse::failed("Payment was not completed at the hosted checkout.").with_code("not_paid"));
    }
    let reference = transaction.reference.clone().unwrap_or_else(|| mock_reference("offsite_cs"));
    info!(%reference, "Simulated hosted payment SUCCEEDED");
    Ok(GatewayResponse::success(reference.clone()).with_data(json!({ "session": reference, "paid": true })))
  }
}
