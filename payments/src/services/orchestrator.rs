// orderflow/payments/src/services/orchestrator.rs

use orderflow::{ContextData, PipelineResult};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

use crate::errors::{AppError, PaymentError, Result};
use crate::models::{Order, Transaction, TransactionStatus};
use crate::pipelines::contexts::{CompletePaymentCtxData, PayCtxData};
use crate::services::requester::RequesterContext;
use crate::state::AppState;

/// Which order a payment is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderRef {
  Number(String),
  /// The cart carried by the requester's session.
  CurrentCart,
}

/// Parameters of a payment request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayParams {
  pub email: Option<String>,
  pub payment_currency: Option<String>,
  pub gateway_id: Option<i64>,
  pub payment_source_id: Option<i64>,
  pub save_payment_source: bool,
  pub register_user_on_order_complete: Option<bool>,
  /// Return URL template, expanded against the order.
  pub redirect: Option<String>,
  pub cancel_url: Option<String>,
  /// Custom field values to store on the order.
  pub fields: BTreeMap<String, Value>,
  /// Gateway form fields.
  pub payment_form: BTreeMap<String, String>,
}

fn value_as_text(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

fn value_as_bool(value: &Value) -> bool {
  match value {
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
    Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
    _ => false,
  }
}

fn bracketed<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
  key.strip_prefix(prefix)?.strip_prefix('[')?.strip_suffix(']')
}

impl PayParams {
  /// Reads a JSON object or a flattened form body (`fields[name]`, `paymentForm[number]`).
  /// Keys this flow does not know about are handed to the gateway form.
  pub fn from_body(body: &Map<String, Value>) -> Result<(Option<String>, Self)> {
    let mut params = PayParams::default();
    let mut number = None;
    let parse_id = |key: &str, value: &Value| -> Result<Option<i64>> {
      match value_as_text(value) {
        None => Ok(None),
        Some(raw) => raw
          .parse::<i64>()
          .map(Some)
          .map_err(|_| AppError::Validation(format!("{} must be an integer", key))),
      }
    };

    for (key, value) in body {
      match key.as_str() {
        "number" | "orderNumber" => number = value_as_text(value),
        "email" => params.email = value_as_text(value),
        "paymentCurrency" => params.payment_currency = value_as_text(value),
        "gatewayId" => params.gateway_id = parse_id(key, value)?,
        "paymentSourceId" => params.payment_source_id = parse_id(key, value)?,
        "savePaymentSource" => params.save_payment_source = value_as_bool(value),
        "registerUserOnOrderComplete" => params.register_user_on_order_complete = Some(value_as_bool(value)),
        "redirect" => params.redirect = value_as_text(value),
        "cancelUrl" => params.cancel_url = value_as_text(value),
        "fields" => {
          if let Value::Object(fields) = value {
            params.fields.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
          }
        }
        "paymentForm" => {
          if let Value::Object(form) = value {
            for (k, v) in form {
              if let Some(text) = value_as_text(v) {
                params.payment_form.insert(k.clone(), text);
              }
            }
          }
        }
        "csrfToken" | "action" => {}
        other => {
          if let Some(name) = bracketed(other, "fields") {
            params.fields.insert(name.to_string(), value.clone());
          } else if let Some(text) = value_as_text(value) {
            let name = bracketed(other, "paymentForm").unwrap_or(other);
            params.payment_form.insert(name.to_string(), text);
          }
        }
      }
    }
    Ok((number, params))
  }
}

/// Shown when a gateway has taken a payment but not said how it ended.
pub const PENDING_MESSAGE: &str = "Your payment is still being processed. Please check back shortly.";

/// What a payment request ended in. Refusals are values, not errors.
#[derive(Debug, Clone)]
pub enum PayOutcome {
  Succeeded {
    order: Order,
    transaction: Option<Transaction>,
    /// Off-site URL the customer must be sent to.
    redirect: Option<String>,
  },
  /// The gateway did not settle the charge in time. The transaction stays `processing` until a
  /// completion callback resumes it.
  Pending {
    order: Order,
    transaction: Transaction,
  },
  Failed {
    error: PaymentError,
    order: Option<Order>,
    form_errors: BTreeMap<String, Vec<String>>,
    transaction: Option<Transaction>,
  },
}

impl PayOutcome {
  pub fn is_success(&self) -> bool {
    matches!(self, PayOutcome::Succeeded { .. })
  }

  pub fn order(&self) -> Option<&Order> {
    match self {
      PayOutcome::Succeeded { order, .. } | PayOutcome::Pending { order, .. } => Some(order),
      PayOutcome::Failed { order, .. } => order.as_ref(),
    }
  }

  pub fn transaction(&self) -> Option<&Transaction> {
    match self {
      PayOutcome::Succeeded { transaction, .. } | PayOutcome::Failed { transaction, .. } => transaction.as_ref(),
      PayOutcome::Pending { transaction, .. } => Some(transaction),
    }
  }

  pub fn is_pending(&self) -> bool {
    matches!(self, PayOutcome::Pending { .. })
  }

  pub fn error(&self) -> Option<&PaymentError> {
    match self {
      PayOutcome::Succeeded { .. } | PayOutcome::Pending { .. } => None,
      PayOutcome::Failed { error, .. } => Some(error),
    }
  }
}

/// What an off-site completion callback ended in.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOutcome {
  pub success: bool,
  /// Where to send the customer next.
  pub url: String,
  pub error: Option<String>,
  /// The transaction had already been finalized; nothing was sent to the gateway.
  pub replayed: bool,
  pub transaction: Transaction,
}

/// Entry point for the pay and complete-payment flows.
#[derive(Clone)]
pub struct PaymentOrchestrator {
  state: AppState,
}

impl PaymentOrchestrator {
  pub fn new(state: AppState) -> Self {
    Self { state }
  }

  /// Runs the pay pipeline. Payment refusals come back as `PayOutcome::Failed`; only
  /// infrastructure failures are errors.
  #[instrument(name = "orchestrator::pay", skip(self, params, requester), fields(user_id = ?requester.user_id))]
  pub async fn pay(&self, order_ref: OrderRef, params: PayParams, requester: RequesterContext) -> Result<PayOutcome> {
    let ctx = ContextData::new(PayCtxData::new(self.state.clone(), order_ref, params, requester));
    let run = self.state.flow.run(ctx.clone()).await;

    let (order, form_errors, attempt) = {
      let guard = ctx.read();
      (
        guard.order.clone(),
        guard.form.as_ref().map(|f| f.errors.clone()).unwrap_or_default(),
        guard.attempt.clone(),
      )
    };
    let transaction = attempt.as_ref().map(|a| a.transaction.clone());

    match run {
      Ok(_) => {
        let order = order.ok_or_else(|| AppError::Internal("Pay pipeline finished without an order".to_string()))?;
        let order = self.state.stores.orders.find_by_id(order.id).await?.unwrap_or(order);
        if let Some(transaction) = transaction.clone().filter(|t| t.status == TransactionStatus::Processing) {
          warn!(order_id = order.id, tx_id = transaction.id, "Payment handed to the gateway but not settled yet");
          return Ok(PayOutcome::Pending { order, transaction });
        }
        info!(order_id = order.id, paid = order.is_paid(), "Payment request succeeded");
        Ok(PayOutcome::Succeeded {
          order,
          transaction,
          redirect: attempt.and_then(|a| a.redirect),
        })
      }
      Err(AppError::Payment(error)) => {
        warn!(code = error.code(), reason = %error, "Payment request refused");
        Ok(PayOutcome::Failed {
          error,
          order,
          form_errors,
          transaction,
        })
      }
      Err(other) => Err(other),
    }
  }

  /// Finalizes an off-site payment addressed by its transaction hash. Repeated calls for a
  /// finalized transaction replay the stored result.
  #[instrument(name = "orchestrator::complete_payment", skip(self, hash))]
  pub async fn complete_payment(&self, hash: &str) -> Result<CompletionOutcome> {
    let ctx = ContextData::new(CompletePaymentCtxData::new(self.state.clone(), hash));
    let result = self.state.flow.run(ctx.clone()).await?;

    let (transaction, order, replayed) = {
      let guard = ctx.read();
      (guard.transaction.clone(), guard.order.clone(), guard.replayed)
    };
    let transaction =
      transaction.ok_or_else(|| AppError::Internal("Completion finished without a transaction".to_string()))?;
    let order = match order {
      Some(order) => Some(order),
      None => self.state.stores.orders.find_by_id(transaction.order_id).await?,
    };

    let success = transaction.status == TransactionStatus::Success;
    let url = self.completion_target(order.as_ref(), success);
    let error = match transaction.status {
      TransactionStatus::Success => None,
      TransactionStatus::Processing => Some(PENDING_MESSAGE.to_string()),
      _ => Some(
        transaction
          .message
          .clone()
          .unwrap_or_else(|| "Payment has not been completed.".to_string()),
      ),
    };
    info!(tx_id = transaction.id, status = ?transaction.status, replayed, stopped = matches!(result, PipelineResult::Stopped), "Completion handled");
    Ok(CompletionOutcome {
      success,
      url,
      error,
      replayed,
      transaction,
    })
  }

  fn completion_target(&self, order: Option<&Order>, success: bool) -> String {
    let configured = order.and_then(|o| if success { o.return_url.clone() } else { o.cancel_url.clone() });
    match configured {
      Some(url) if url.starts_with("http://") || url.starts_with("https://") => url,
      Some(url) => format!("{}/{}", self.state.config.app_base_url, url.trim_start_matches('/')),
      None => self.state.config.app_base_url.clone(),
    }
  }
}
