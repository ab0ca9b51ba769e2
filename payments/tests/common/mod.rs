// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use once_cell::sync::Lazy;
use orderflow_payments::config::AppConfig;
use orderflow_payments::gateways::mock::DummyGateway;
use orderflow_payments::gateways::{CallbackUrls, Gateway, GatewayError, GatewayRegistry, GatewayResponse, PaymentForm};
use orderflow_payments::models::{Adjustment, AdjustmentKind, LineItem, NewPaymentSource, Order, Transaction, TransactionType};
use orderflow_payments::services::calculator::{OrderAdjuster, OrderCalculator};
use orderflow_payments::state::AppState;
use orderflow_payments::store::Stores;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

pub const ONSITE_ID: i64 = 1;
pub const OFFSITE_ID: i64 = 2;
pub const DUMMY_ID: i64 = 3;

pub const CUSTOMER_ID: i64 = 10;
pub const CUSTOMER_EMAIL: &str = "buyer@example.com";

static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer()
    .try_init()
    .ok();
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}

/// How a scripted gateway answers.
#[derive(Debug, Clone)]
pub enum Script {
  Succeed,
  Decline(&'static str),
  Redirect,
  Error(&'static str),
  Hang,
  /// Hangs on the first call, succeeds on every later one.
  HangOnce,
}

/// Gateway double that counts its calls and answers from a script.
pub struct ScriptedGateway {
  pub id: i64,
  pub on_process: Script,
  pub on_complete: Script,
  pub latency: Duration,
  pub kind: TransactionType,
  pub process_calls: AtomicUsize,
  pub complete_calls: AtomicUsize,
  pub capture_calls: AtomicUsize,
}

impl ScriptedGateway {
  pub fn new(id: i64, on_process: Script, on_complete: Script) -> Self {
    Self {
      id,
      on_process,
      on_complete,
      latency: Duration::ZERO,
      kind: TransactionType::Purchase,
      process_calls: AtomicUsize::new(0),
      complete_calls: AtomicUsize::new(0),
      capture_calls: AtomicUsize::new(0),
    }
  }

  /// Charges as authorizations that have to be captured later.
  pub fn authorizing(mut self) -> Self {
    self.kind = TransactionType::Authorize;
    self
  }

  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  pub fn process_count(&self) -> usize {
    self.process_calls.load(Ordering::SeqCst)
  }

  pub fn complete_count(&self) -> usize {
    self.complete_calls.load(Ordering::SeqCst)
  }

  pub fn capture_count(&self) -> usize {
    self.capture_calls.load(Ordering::SeqCst)
  }

  async fn answer(
    &self,
    script: &Script,
    call_index: usize,
    tx: &Transaction,
    urls: Option<&CallbackUrls>,
  ) -> Result<GatewayResponse, GatewayError> {
    tokio::time::sleep(self.latency).await;
    match script {
      Script::HangOnce if call_index > 0 => Ok(GatewayResponse::success(format!("ref_{}", tx.hash))),
      Script::Succeed => Ok(GatewayResponse::success(format!("ref_{}", tx.hash)).with_data(json!({ "ok": true }))),
      Script::Decline(message) => Ok(GatewayResponse::failed(*message).with_code("declined")),
      Script::Redirect => {
        let back = urls.map(|u| u.return_url.clone()).unwrap_or_default();
        Ok(GatewayResponse::redirect(
          format!("https://pay.example/checkout?back={}", back),
          format!("sess_{}", tx.hash),
        ))
      }
      Script::Error(message) => Err(GatewayError::Transport(message.to_string())),
      Script::Hang | Script::HangOnce => {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(GatewayResponse::processing("late"))
      }
    }
  }
}

#[async_trait]
impl Gateway for ScriptedGateway {
  fn id(&self) -> i64 {
    self.id
  }

  fn handle(&self) -> &str {
    "scripted"
  }

  fn name(&self) -> &str {
    "Scripted"
  }

  fn payment_type(&self) -> TransactionType {
    self.kind
  }

  fn supports_payment_sources(&self) -> bool {
    true
  }

  fn payment_form_model(&self) -> PaymentForm {
    PaymentForm::new(&[])
  }

  async fn process_payment(
    &self,
    _order: &Order,
    _form: &PaymentForm,
    transaction: &Transaction,
    urls: &CallbackUrls,
  ) -> Result<GatewayResponse, GatewayError> {
    let call_index = self.process_calls.fetch_add(1, Ordering::SeqCst);
    self.answer(&self.on_process, call_index, transaction, Some(urls)).await
  }

  async fn complete_payment(&self, transaction: &Transaction) -> Result<GatewayResponse, GatewayError> {
    let call_index = self.complete_calls.fetch_add(1, Ordering::SeqCst);
    self.answer(&self.on_complete, call_index, transaction, None).await
  }

  async fn capture(&self, transaction: &Transaction) -> Result<GatewayResponse, GatewayError> {
    self.capture_calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(self.latency).await;
    Ok(GatewayResponse::success(format!("cap_{}", transaction.hash)))
  }

  async fn create_payment_source(&self, _form: &PaymentForm, user_id: i64) -> Result<NewPaymentSource, GatewayError> {
    Ok(NewPaymentSource {
      user_id,
      gateway_id: self.id,
      token: format!("tok_scripted_{}", user_id),
      description: "Scripted card".to_string(),
      response: json!({}),
    })
  }
}

/// A promotion that can be switched on or off between pay attempts.
#[derive(Default)]
pub struct SwitchableDiscount {
  pub active: AtomicBool,
  pub amount: Decimal,
}

impl OrderAdjuster for SwitchableDiscount {
  fn handle(&self) -> &str {
    "switchable_discount"
  }

  fn adjust(&self, order: &Order) -> Vec<Adjustment> {
    if !self.active.load(Ordering::SeqCst) || order.is_empty() {
      return Vec::new();
    }
    vec![Adjustment::new(AdjustmentKind::Discount, "Flash sale", -self.amount)]
  }
}

pub struct Harness {
  pub state: AppState,
  pub onsite: Arc<ScriptedGateway>,
  pub offsite: Arc<ScriptedGateway>,
  pub discount: Arc<SwitchableDiscount>,
}

pub fn test_config() -> AppConfig {
  AppConfig {
    app_base_url: "http://shop.test".to_string(),
    gateway_timeout: Duration::from_millis(300),
    processing_lease: Duration::from_millis(400),
    csrf_secret: "test-secret".to_string(),
    ..AppConfig::default()
  }
}

pub fn harness_with(config: AppConfig, onsite: ScriptedGateway, offsite: ScriptedGateway) -> Harness {
  setup_tracing();
  let onsite = Arc::new(onsite);
  let offsite = Arc::new(offsite);
  let discount = Arc::new(SwitchableDiscount {
    active: AtomicBool::new(false),
    amount: dec!(5.00),
  });
  let gateways = GatewayRegistry::new()
    .with(onsite.clone())
    .with(offsite.clone())
    .with(Arc::new(DummyGateway::new(DUMMY_ID).with_latency(Duration::ZERO)));
  let calculator = OrderCalculator::new().with_adjuster(discount.clone());
  let state = AppState::build(config, Stores::in_memory(), gateways, calculator);
  Harness {
    state,
    onsite,
    offsite,
    discount,
  }
}

pub fn harness() -> Harness {
  harness_with(
    test_config(),
    ScriptedGateway::new(ONSITE_ID, Script::Succeed, Script::Succeed),
    ScriptedGateway::new(OFFSITE_ID, Script::Redirect, Script::Succeed),
  )
}

/// Stores an active cart for the test customer worth 2 x 20.00 + 1 x 10.00.
pub async fn insert_cart(state: &AppState) -> Order {
  insert_cart_with(state, vec![
    LineItem::new(1, "Socks", 2, dec!(20.00)),
    LineItem::new(2, "Hat", 1, dec!(10.00)),
  ])
  .await
}

pub async fn insert_cart_with(state: &AppState, items: Vec<LineItem>) -> Order {
  let mut cart = Order::new_cart("USD");
  cart.email = Some(CUSTOMER_EMAIL.to_string());
  cart.customer_id = Some(CUSTOMER_ID);
  cart.line_items = items;
  state.stores.orders.insert(cart).await.unwrap()
}
