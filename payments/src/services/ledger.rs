// orderflow/payments/src/services/ledger.rs

//! Append-only transaction history. Lineage queries are pure functions over an order's rows.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::errors::{AppError, PaymentError, Result};
use crate::gateways::Gateway;
use crate::models::{Order, PaymentCurrency, Transaction, TransactionOutcome, TransactionStatus, TransactionType};
use crate::store::TransactionStore;

pub fn children_of(rows: &[Transaction], id: i64) -> Vec<&Transaction> {
  rows.iter().filter(|t| t.parent_id == Some(id)).collect()
}

/// Every transaction below `tx`, breadth first.
pub fn descendants_of<'a>(rows: &'a [Transaction], tx: &Transaction) -> Vec<&'a Transaction> {
  let mut found = children_of(rows, tx.id);
  let mut cursor = 0;
  while cursor < found.len() {
    let next = children_of(rows, found[cursor].id);
    found.extend(next);
    cursor += 1;
  }
  found
}

/// Parent chain of `tx`, nearest first.
pub fn ancestors_of<'a>(rows: &'a [Transaction], tx: &Transaction) -> Vec<&'a Transaction> {
  let mut chain = Vec::new();
  let mut parent_id = tx.parent_id;
  while let Some(id) = parent_id {
    let Some(parent) = rows.iter().find(|t| t.id == id) else {
      break;
    };
    if chain.iter().any(|seen: &&Transaction| seen.id == parent.id) {
      break;
    }
    chain.push(parent);
    parent_id = parent.parent_id;
  }
  chain
}

pub fn refundable_amount(rows: &[Transaction], tx: &Transaction) -> Decimal {
  let refunded: Decimal = descendants_of(rows, tx)
    .into_iter()
    .filter(|t| t.kind == TransactionType::Refund && t.is_successful())
    .map(|t| t.amount)
    .sum();
  (tx.amount - refunded).max(Decimal::ZERO)
}

/// Refundable amount left once refunds still in flight are counted as spent.
pub fn unreserved_refundable_amount(rows: &[Transaction], tx: &Transaction) -> Decimal {
  let reserved: Decimal = descendants_of(rows, tx)
    .into_iter()
    .filter(|t| t.kind == TransactionType::Refund && !t.is_failed())
    .map(|t| t.amount)
    .sum();
  (tx.amount - reserved).max(Decimal::ZERO)
}

/// A capture that has not failed, settled or still in flight, rules out another one.
pub fn can_capture(rows: &[Transaction], tx: &Transaction) -> bool {
  tx.kind == TransactionType::Authorize
    && tx.is_successful()
    && !descendants_of(rows, tx)
      .into_iter()
      .any(|t| t.kind == TransactionType::Capture && !t.is_failed())
}

/// Whether a child of `kind` worth `amount` (order currency) may be added below `parent_id`,
/// judged against the rows as stored.
fn admits_child(rows: &[Transaction], parent_id: i64, kind: TransactionType, amount: Decimal) -> bool {
  let Some(parent) = rows.iter().find(|t| t.id == parent_id) else {
    return false;
  };
  match kind {
    TransactionType::Capture => can_capture(rows, parent),
    TransactionType::Refund => {
      matches!(parent.kind, TransactionType::Purchase | TransactionType::Capture)
        && parent.is_successful()
        && amount <= unreserved_refundable_amount(rows, parent)
    }
    TransactionType::Authorize | TransactionType::Purchase => false,
  }
}

pub fn can_refund(rows: &[Transaction], tx: &Transaction) -> bool {
  matches!(tx.kind, TransactionType::Purchase | TransactionType::Capture)
    && tx.is_successful()
    && refundable_amount(rows, tx) > Decimal::ZERO
}

/// Successful purchases and captures minus successful refunds.
pub fn total_paid(rows: &[Transaction]) -> Decimal {
  rows
    .iter()
    .filter(|t| t.is_successful())
    .map(|t| match t.kind {
      TransactionType::Purchase | TransactionType::Capture => t.amount,
      TransactionType::Refund => -t.amount,
      TransactionType::Authorize => Decimal::ZERO,
    })
    .sum()
}

#[derive(Clone)]
pub struct TransactionLedger {
  store: Arc<dyn TransactionStore>,
  currencies: Vec<PaymentCurrency>,
}

impl TransactionLedger {
  pub fn new(store: Arc<dyn TransactionStore>, currencies: Vec<PaymentCurrency>) -> Self {
    Self { store, currencies }
  }

  fn currency(&self, iso: &str) -> Result<&PaymentCurrency> {
    self.currencies.iter().find(|c| c.iso == iso).ok_or_else(|| {
      PaymentError::UnsupportedCurrency(format!("No payment currency found with ISO code “{}”.", iso)).into()
    })
  }

  /// Records a pending transaction for the order's outstanding balance, converted to the order's
  /// payment currency. Retrying after a failed attempt of the same kind hangs the new row under it.
  #[instrument(name = "ledger::create", skip(self, order, gateway), fields(order_id = order.id, gateway_id = gateway.id(), ?kind))]
  pub async fn create(
    &self,
    order: &Order,
    gateway: &dyn Gateway,
    kind: TransactionType,
    user_id: Option<i64>,
  ) -> Result<Transaction> {
    let outstanding = order.outstanding_balance();
    if outstanding <= Decimal::ZERO {
      return Err(PaymentError::InvalidPaymentInput("The order has no outstanding balance.".to_string()).into());
    }
    let currency = self.currency(&order.payment_currency)?;
    let payment_amount = currency
      .to_payment_amount(outstanding)
      .ok_or_else(|| AppError::Internal(format!("Could not convert {} to {}", outstanding, currency.iso)))?;
    if payment_amount <= Decimal::ZERO {
      return Err(PaymentError::InvalidPaymentInput("The payment amount must be greater than zero.".to_string()).into());
    }

    let previous = self.store.find_by_order(order.id).await?;
    let parent_id = previous
      .iter()
      .rev()
      .find(|t| t.kind == kind)
      .filter(|t| t.is_failed())
      .map(|t| t.id);

    let mut tx = Transaction::new(order.id, gateway.id(), kind);
    tx.parent_id = parent_id;
    tx.user_id = user_id;
    tx.currency = order.currency.clone();
    tx.payment_currency = currency.iso.clone();
    tx.payment_rate = currency.rate;
    tx.payment_amount = payment_amount;
    tx.amount = payment_amount * currency.rate;

    let tx = self.store.insert(tx).await?;
    info!(tx_id = tx.id, tx_hash = %tx.hash, amount = %tx.amount, payment_amount = %tx.payment_amount, parent_id = ?tx.parent_id, "Transaction recorded");
    Ok(tx)
  }

  /// Records a capture or refund below `parent`. The child inherits the parent's order, gateway
  /// and exchange rate; `payment_amount` is in the parent's payment currency.
  ///
  /// The capture-once and refund ceiling rules are checked by the store together with the
  /// insert, counting children that are still pending.
  #[instrument(name = "ledger::create_child", skip(self, parent, note), fields(parent_id = parent.id, ?kind))]
  pub async fn create_child(
    &self,
    parent: &Transaction,
    kind: TransactionType,
    payment_amount: Decimal,
    user_id: Option<i64>,
    note: Option<String>,
  ) -> Result<Transaction> {
    match kind {
      TransactionType::Capture if parent.kind != TransactionType::Authorize => {
        return Err(PaymentError::TransactionNotCapturable.into());
      }
      TransactionType::Refund if !matches!(parent.kind, TransactionType::Purchase | TransactionType::Capture) => {
        return Err(PaymentError::TransactionNotRefundable("Only purchases and captures can be refunded.".to_string()).into());
      }
      TransactionType::Authorize | TransactionType::Purchase => {
        return Err(AppError::Internal(format!("{:?} transactions can not have a parent", kind)));
      }
      _ => {}
    }
    if payment_amount <= Decimal::ZERO {
      return Err(PaymentError::InvalidPaymentInput("Amount must be greater than zero.".to_string()).into());
    }

    let mut tx = Transaction::new(parent.order_id, parent.gateway_id, kind);
    tx.parent_id = Some(parent.id);
    tx.user_id = user_id;
    tx.note = note;
    tx.currency = parent.currency.clone();
    tx.payment_currency = parent.payment_currency.clone();
    tx.payment_rate = parent.payment_rate;
    tx.payment_amount = payment_amount;
    tx.amount = payment_amount * parent.payment_rate;
    tx.reference = parent.reference.clone();

    let (parent_id, amount) = (parent.id, tx.amount);
    let admit = move |rows: &[Transaction]| admits_child(rows, parent_id, kind, amount);
    let Some(tx) = self.store.insert_child(tx, &admit).await? else {
      info!("Child transaction refused against the current ledger");
      return Err(match kind {
        TransactionType::Capture => PaymentError::TransactionNotCapturable,
        _ => PaymentError::TransactionNotRefundable("The refund exceeds what is left to refund.".to_string()),
      }
      .into());
    };
    info!(tx_id = tx.id, amount = %tx.amount, "Child transaction recorded");
    Ok(tx)
  }

  pub async fn find_by_hash(&self, hash: &str) -> Result<Option<Transaction>> {
    self.store.find_by_hash(hash).await
  }

  pub async fn find_by_id(&self, id: i64) -> Result<Option<Transaction>> {
    self.store.find_by_id(id).await
  }

  pub async fn for_order(&self, order_id: i64) -> Result<Vec<Transaction>> {
    self.store.find_by_order(order_id).await
  }

  pub async fn children_of(&self, tx: &Transaction) -> Result<Vec<Transaction>> {
    let rows = self.for_order(tx.order_id).await?;
    Ok(children_of(&rows, tx.id).into_iter().cloned().collect())
  }

  pub async fn descendants_of(&self, tx: &Transaction) -> Result<Vec<Transaction>> {
    let rows = self.for_order(tx.order_id).await?;
    Ok(descendants_of(&rows, tx).into_iter().cloned().collect())
  }

  pub async fn ancestors_of(&self, tx: &Transaction) -> Result<Vec<Transaction>> {
    let rows = self.for_order(tx.order_id).await?;
    Ok(ancestors_of(&rows, tx).into_iter().cloned().collect())
  }

  pub async fn can_capture(&self, tx: &Transaction) -> Result<bool> {
    let rows = self.for_order(tx.order_id).await?;
    Ok(can_capture(&rows, tx))
  }

  pub async fn can_refund(&self, tx: &Transaction) -> Result<bool> {
    let rows = self.for_order(tx.order_id).await?;
    Ok(can_refund(&rows, tx))
  }

  pub async fn refundable_amount(&self, tx: &Transaction) -> Result<Decimal> {
    let rows = self.for_order(tx.order_id).await?;
    Ok(refundable_amount(&rows, tx))
  }

  pub async fn total_paid(&self, order_id: i64) -> Result<Decimal> {
    let rows = self.for_order(order_id).await?;
    Ok(total_paid(&rows))
  }

  /// Compare-and-set status transition. `None` when the row already left `allowed_from`.
  #[instrument(name = "ledger::record_outcome", skip(self, tx, allowed_from, outcome), fields(tx_id = tx.id, from = ?tx.status, to = ?outcome.status))]
  pub async fn record_outcome(
    &self,
    tx: &Transaction,
    allowed_from: &[TransactionStatus],
    outcome: &TransactionOutcome,
  ) -> Result<Option<Transaction>> {
    let updated = self.store.transition(tx.id, allowed_from, outcome).await?;
    if updated.is_none() {
      info!("Transaction already left the expected state; outcome not recorded");
    }
    Ok(updated)
  }

  /// Takes over `tx` if it has sat in `processing` for longer than `lease`.
  pub async fn reclaim_stale(&self, tx: &Transaction, lease: std::time::Duration) -> Result<Option<Transaction>> {
    let lease = chrono::Duration::from_std(lease)
      .map_err(|e| AppError::Internal(format!("Processing lease out of range: {}", e)))?;
    self.store.reclaim_stale(tx.id, chrono::Utc::now() - lease).await
  }
}
