// orderflow/payments/src/services/price_guard.rs

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{instrument, warn};

use crate::errors::{AppError, PaymentError, Result};
use crate::models::Order;
use crate::services::calculator::OrderCalculator;
use crate::store::OrderStore;

/// A price-relevant aspect of an order that changed during checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PriceField {
  TotalPrice,
  TotalQty,
  TotalAdjustments,
}

impl PriceField {
  pub fn attribute(&self) -> &'static str {
    match self {
      PriceField::TotalPrice => "totalPrice",
      PriceField::TotalQty => "totalQty",
      PriceField::TotalAdjustments => "totalAdjustments",
    }
  }

  pub fn message(&self) -> &'static str {
    match self {
      PriceField::TotalPrice => "The total price of the order changed.",
      PriceField::TotalQty => "The total quantity of items within the order changed.",
      PriceField::TotalAdjustments => "The total number of order adjustments changed.",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceSnapshot {
  pub outstanding_balance: Decimal,
  pub total_qty: i64,
  pub adjustment_count: usize,
}

impl PriceSnapshot {
  pub fn of(order: &Order) -> Self {
    Self {
      outstanding_balance: order.outstanding_balance(),
      total_qty: order.total_qty(),
      adjustment_count: order.adjustments.len(),
    }
  }

  pub fn changed_fields(&self, after: &PriceSnapshot) -> Vec<PriceField> {
    let mut changed = Vec::new();
    if self.outstanding_balance != after.outstanding_balance {
      changed.push(PriceField::TotalPrice);
    }
    if self.total_qty != after.total_qty {
      changed.push(PriceField::TotalQty);
    }
    if self.adjustment_count != after.adjustment_count {
      changed.push(PriceField::TotalAdjustments);
    }
    changed
  }
}

/// Re-prices an order right before it is charged and refuses the charge if anything moved.
#[derive(Clone)]
pub struct OrderPriceGuard {
  calculator: Arc<OrderCalculator>,
  orders: Arc<dyn OrderStore>,
}

impl OrderPriceGuard {
  pub fn new(calculator: Arc<OrderCalculator>, orders: Arc<dyn OrderStore>) -> Self {
    Self { calculator, orders }
  }

  /// Snapshot, recalculate, save, compare. The recalculated order is persisted even when the
  /// comparison fails, so the customer reviews the current prices.
  #[instrument(name = "price_guard::guard", skip(self, order), fields(order_id = order.id, version = order.version))]
  pub async fn guard(&self, order: &mut Order) -> Result<()> {
    let before = PriceSnapshot::of(order);
    self.calculator.recalculate(order);

    match self.orders.save(order).await {
      Ok(()) => {}
      Err(AppError::Conflict(detail)) => {
        warn!(%detail, "Order was saved by another request during checkout");
        order.add_error("order", PaymentError::OrderChangedDuringCheckout(Vec::new()).to_string());
        return Err(PaymentError::OrderChangedDuringCheckout(Vec::new()).into());
      }
      Err(e) => return Err(e),
    }

    let after = PriceSnapshot::of(order);
    let changed = before.changed_fields(&after);
    if changed.is_empty() {
      return Ok(());
    }
    warn!(?changed, before = %before.outstanding_balance, after = %after.outstanding_balance, "Order price changed during checkout");
    for field in &changed {
      order.add_error(field.attribute(), field.message());
    }
    Err(PaymentError::OrderChangedDuringCheckout(changed).into())
  }
}
