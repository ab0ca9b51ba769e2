// orderflow/payments/src/pipelines/contexts.rs

//! Context data the payment pipelines run on. Handlers receive these wrapped in
//! `orderflow::ContextData`.

use std::sync::Arc;

use crate::gateways::{Gateway, PaymentForm};
use crate::models::{Order, PaymentSource, Transaction};
use crate::services::orchestrator::{OrderRef, PayParams};
use crate::services::payments::PaymentAttempt;
use crate::services::requester::RequesterContext;
use crate::state::AppState;

#[derive(Clone)]
pub struct PayCtxData {
  pub app_state: AppState,
  pub order_ref: OrderRef,
  pub params: PayParams,
  pub requester: RequesterContext,

  pub order: Option<Order>,
  /// The resolved order is the active cart of the requester's own session.
  pub is_own_cart: bool,
  pub gateway: Option<Arc<dyn Gateway>>,
  pub payment_source: Option<PaymentSource>,
  pub form: Option<PaymentForm>,
  pub attempt: Option<PaymentAttempt>,
}

impl PayCtxData {
  pub fn new(app_state: AppState, order_ref: OrderRef, params: PayParams, requester: RequesterContext) -> Self {
    Self {
      app_state,
      order_ref,
      params,
      requester,
      order: None,
      is_own_cart: false,
      gateway: None,
      payment_source: None,
      form: None,
      attempt: None,
    }
  }
}

#[derive(Clone)]
pub struct CompletePaymentCtxData {
  pub app_state: AppState,
  pub hash: String,
  pub transaction: Option<Transaction>,
  pub order: Option<Order>,
  /// Set when the stored result was returned without contacting the gateway.
  pub replayed: bool,
}

impl CompletePaymentCtxData {
  pub fn new(app_state: AppState, hash: &str) -> Self {
    Self {
      app_state,
      hash: hash.trim().to_string(),
      transaction: None,
      order: None,
      replayed: false,
    }
  }
}
