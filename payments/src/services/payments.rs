// orderflow/payments/src/services/payments.rs

use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, PaymentError, Result};
use crate::gateways::{CallbackUrls, Gateway, GatewayError, GatewayRegistry, GatewayResponse, PaymentForm};
use crate::models::{
  Order, OrderHistory, PaymentSource, Transaction, TransactionOutcome, TransactionStatus, TransactionType,
};
use crate::services::ledger::{self, TransactionLedger};
use crate::store::{OrderHistoryStore, OrderStore, PaymentSourceStore};

const PAID_INFO_ATTEMPTS: usize = 3;

/// Result of handing one charge to a gateway.
#[derive(Debug, Clone)]
pub struct PaymentAttempt {
  pub transaction: Transaction,
  /// Off-site URL the customer has to visit to finish paying.
  pub redirect: Option<String>,
  /// Gateway message when the charge was refused.
  pub declined: Option<String>,
}

enum GatewayCall {
  Answered(GatewayResponse),
  Errored(GatewayError),
  TimedOut,
}

impl GatewayCall {
  fn outcome(&self) -> TransactionOutcome {
    match self {
      GatewayCall::Answered(response) => response.to_outcome(),
      GatewayCall::Errored(e) => TransactionOutcome::failed(e.to_string()),
      GatewayCall::TimedOut => TransactionOutcome::processing("The gateway did not respond in time."),
    }
  }

  fn declined_message(&self) -> Option<String> {
    match self {
      GatewayCall::Answered(response) if response.to_outcome().status == TransactionStatus::Failed => Some(
        response
          .message
          .clone()
          .unwrap_or_else(|| "The payment could not be processed.".to_string()),
      ),
      GatewayCall::Errored(e) => Some(e.to_string()),
      _ => None,
    }
  }
}

/// Drives gateway interactions and keeps the ledger and the order's paid totals in step with them.
#[derive(Clone)]
pub struct PaymentService {
  orders: Arc<dyn OrderStore>,
  histories: Arc<dyn OrderHistoryStore>,
  payment_sources: Arc<dyn PaymentSourceStore>,
  ledger: TransactionLedger,
  gateways: Arc<GatewayRegistry>,
  config: Arc<AppConfig>,
}

impl PaymentService {
  pub fn new(
    orders: Arc<dyn OrderStore>,
    histories: Arc<dyn OrderHistoryStore>,
    payment_sources: Arc<dyn PaymentSourceStore>,
    ledger: TransactionLedger,
    gateways: Arc<GatewayRegistry>,
    config: Arc<AppConfig>,
  ) -> Self {
    Self {
      orders,
      histories,
      payment_sources,
      ledger,
      gateways,
      config,
    }
  }

  pub fn ledger(&self) -> &TransactionLedger {
    &self.ledger
  }

  fn timeout(&self) -> Duration {
    self.config.gateway_timeout
  }

  async fn call<F>(&self, fut: F) -> GatewayCall
  where
    F: Future<Output = std::result::Result<GatewayResponse, GatewayError>>,
  {
    match tokio::time::timeout(self.timeout(), fut).await {
      Ok(Ok(response)) => GatewayCall::Answered(response),
      Ok(Err(e)) => {
        warn!(gateway_error = %e, "Gateway returned an error");
        GatewayCall::Errored(e)
      }
      Err(_) => {
        error!(timeout_secs = self.timeout().as_secs(), "Gateway call timed out");
        GatewayCall::TimedOut
      }
    }
  }

  /// Writes the call's outcome onto `tx` if it is still in one of `from`. Returns the stored row.
  async fn settle(&self, tx: &Transaction, from: &[TransactionStatus], call: &GatewayCall) -> Result<Transaction> {
    let outcome = call.outcome();
    match self.ledger.record_outcome(tx, from, &outcome).await? {
      Some(updated) => Ok(updated),
      None => self
        .ledger
        .find_by_id(tx.id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("Transaction {} vanished while settling", tx.id))),
    }
  }

  fn callback_urls(&self, order: &Order, tx: &Transaction) -> CallbackUrls {
    let cancel_url = match order.cancel_url.as_deref() {
      Some(url) if url.starts_with("http://") || url.starts_with("https://") => url.to_string(),
      Some(url) => format!("{}/{}", self.config.app_base_url, url.trim_start_matches('/')),
      None => self.config.app_base_url.clone(),
    };
    CallbackUrls {
      return_url: self.config.completion_url(&tx.hash),
      cancel_url,
    }
  }

  /// Records a transaction, charges it and finalizes the row with what the gateway said.
  ///
  /// The row exists before the gateway is called. A timeout leaves it `processing` for a later
  /// completion callback to resume; a gateway error marks it `failed`.
  #[instrument(name = "payments::process_payment", skip_all, fields(order_id = order.id, gateway_id = gateway.id()))]
  pub async fn process_payment(
    &self,
    order: &Order,
    gateway: &dyn Gateway,
    form: &PaymentForm,
    user_id: Option<i64>,
  ) -> Result<PaymentAttempt> {
    let tx = self.ledger.create(order, gateway, gateway.payment_type(), user_id).await?;
    let urls = self.callback_urls(order, &tx);

    let call = self.call(gateway.process_payment(order, form, &tx, &urls)).await;
    let transaction = self.settle(&tx, &[TransactionStatus::Pending], &call).await?;

    let redirect = match &call {
      GatewayCall::Answered(response) => response.redirect_url().map(str::to_string),
      _ => None,
    };
    let declined = call.declined_message();

    if transaction.is_successful() {
      self.update_order_paid_information(order.id).await?;
    }
    info!(tx_id = transaction.id, status = ?transaction.status, redirect = redirect.is_some(), "Payment processed");
    Ok(PaymentAttempt {
      transaction,
      redirect,
      declined,
    })
  }

  /// Asks the gateway to finalize a transaction already claimed as `processing`. Paid totals are
  /// left to the caller.
  #[instrument(name = "payments::complete", skip_all, fields(tx_id = tx.id, gateway_id = tx.gateway_id))]
  pub async fn complete(&self, tx: &Transaction) -> Result<Transaction> {
    let Some(gateway) = self.gateways.get(tx.gateway_id) else {
      error!("Gateway for transaction is no longer registered");
      let outcome = TransactionOutcome::failed("The payment gateway is no longer available.");
      return self
        .ledger
        .record_outcome(tx, &[TransactionStatus::Processing], &outcome)
        .await?
        .ok_or_else(|| AppError::Internal(format!("Transaction {} left processing unexpectedly", tx.id)));
    };

    let call = self.call(gateway.complete_payment(tx)).await;
    if let GatewayCall::Errored(GatewayError::NotSupported(what)) = &call {
      warn!(what = *what, "Gateway can not be asked about this payment; leaving it processing");
      return Ok(tx.clone());
    }
    let outcome = call.outcome();
    if !outcome.status.is_terminal() {
      // Timed out, or the gateway has not settled yet. The row stays processing.
      info!(status = ?outcome.status, "Completion not settled by the gateway");
      return Ok(tx.clone());
    }

    self.settle(tx, &[TransactionStatus::Processing], &call).await
  }

  /// Recomputes the order's paid total from the ledger and completes the order once it is paid.
  #[instrument(name = "payments::update_order_paid_information", skip(self))]
  pub async fn update_order_paid_information(&self, order_id: i64) -> Result<Order> {
    let mut attempt = 0;
    loop {
      attempt += 1;
      let mut order = self
        .orders
        .find_by_id(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Order {} does not exist", order_id)))?;
      let total_paid = self.ledger.total_paid(order_id).await?;
      let prev_status = order.paid_status();
      let now = Utc::now();

      order.total_paid = total_paid;
      let mut history = None;
      if order.is_paid() {
        order.date_paid.get_or_insert(now);
        if !order.is_completed {
          order.mark_as_complete(now);
          history = Some("Order completed after payment.");
        }
      }
      let new_status = order.paid_status();
      if history.is_none() && prev_status != new_status {
        history = Some("Order paid status changed.");
      }

      match self.orders.save(&mut order).await {
        Ok(()) => {
          if let Some(message) = history {
            let mut entry = OrderHistory::new(order.id, order.customer_id, message);
            entry.prev_paid_status = Some(prev_status);
            entry.new_paid_status = new_status;
            self.histories.insert(entry).await?;
          }
          info!(%total_paid, paid_status = ?new_status, completed = order.is_completed, "Order paid information updated");
          return Ok(order);
        }
        Err(AppError::Conflict(detail)) if attempt < PAID_INFO_ATTEMPTS => {
          warn!(%detail, attempt, "Retrying paid information update after concurrent save");
        }
        Err(e) => return Err(e),
      }
    }
  }

  /// Tokenizes the form with the gateway and stores the resulting payment source.
  #[instrument(name = "payments::save_payment_source", skip(self, gateway, form), fields(gateway_id = gateway.id()))]
  pub async fn save_payment_source(&self, gateway: &dyn Gateway, form: &PaymentForm, user_id: i64) -> Result<PaymentSource> {
    let new_source = match tokio::time::timeout(self.timeout(), gateway.create_payment_source(form, user_id)).await {
      Ok(Ok(source)) => source,
      Ok(Err(e)) => return Err(PaymentError::PaymentSourceCreationFailed(e.to_string()).into()),
      Err(_) => {
        return Err(
          PaymentError::PaymentSourceCreationFailed("The gateway did not respond in time.".to_string()).into(),
        )
      }
    };
    let source = self.payment_sources.insert(new_source).await?;
    info!(source_id = source.id, "Payment source saved");
    Ok(source)
  }

  /// Captures a successful authorization in full.
  #[instrument(name = "payments::capture", skip(self))]
  pub async fn capture(&self, tx_id: i64, user_id: Option<i64>) -> Result<Transaction> {
    let parent = self
      .ledger
      .find_by_id(tx_id)
      .await?
      .ok_or_else(|| AppError::NotFound(format!("Transaction {} does not exist", tx_id)))?;
    let rows = self.ledger.for_order(parent.order_id).await?;
    if !ledger::can_capture(&rows, &parent) {
      return Err(PaymentError::TransactionNotCapturable.into());
    }
    let gateway = self
      .gateways
      .get(parent.gateway_id)
      .ok_or(PaymentError::NoGatewayAvailable)?;

    let child = self
      .ledger
      .create_child(&parent, TransactionType::Capture, parent.payment_amount, user_id, None)
      .await?;
    let call = self.call(gateway.capture(&parent)).await;
    let transaction = self.settle(&child, &[TransactionStatus::Pending], &call).await?;
    if transaction.is_successful() {
      self.update_order_paid_information(transaction.order_id).await?;
    } else if let Some(message) = call.declined_message() {
      return Err(PaymentError::PaymentDeclined(message).into());
    }
    Ok(transaction)
  }

  /// Refunds part or all of a purchase or capture. `amount` is in the transaction's payment
  /// currency and defaults to everything still refundable.
  #[instrument(name = "payments::refund", skip(self, note))]
  pub async fn refund(
    &self,
    tx_id: i64,
    amount: Option<Decimal>,
    note: Option<String>,
    user_id: Option<i64>,
  ) -> Result<Transaction> {
    let parent = self
      .ledger
      .find_by_id(tx_id)
      .await?
      .ok_or_else(|| AppError::NotFound(format!("Transaction {} does not exist", tx_id)))?;
    let rows = self.ledger.for_order(parent.order_id).await?;
    if !ledger::can_refund(&rows, &parent) {
      return Err(PaymentError::TransactionNotRefundable("Transaction can not be refunded.".to_string()).into());
    }

    let refundable = ledger::refundable_amount(&rows, &parent);
    let payment_amount = match amount {
      Some(amount) => amount,
      None if refundable == parent.amount => parent.payment_amount,
      None => (refundable / parent.payment_rate).round_dp_with_strategy(2, RoundingStrategy::ToZero),
    };
    if payment_amount * parent.payment_rate > refundable {
      return Err(
        PaymentError::TransactionNotRefundable(format!(
          "Can not refund more than {} {}.",
          refundable, parent.currency
        ))
        .into(),
      );
    }
    let gateway = self
      .gateways
      .get(parent.gateway_id)
      .ok_or(PaymentError::NoGatewayAvailable)?;

    let child = self
      .ledger
      .create_child(&parent, TransactionType::Refund, payment_amount, user_id, note)
      .await?;
    let call = self.call(gateway.refund(&parent, payment_amount)).await;
    let transaction = self.settle(&child, &[TransactionStatus::Pending], &call).await?;
    if transaction.is_successful() {
      self.update_order_paid_information(transaction.order_id).await?;
    } else if let Some(message) = call.declined_message() {
      return Err(PaymentError::PaymentDeclined(message).into());
    }
    Ok(transaction)
  }
}
