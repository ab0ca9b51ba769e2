// orderflow/payments/src/services/calculator.rs

use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use tracing::debug;

use crate::models::{Adjustment, AdjustmentKind, LineItem, Order, RecalculationMode};

/// Contributes adjustments (discounts, tax, shipping) to an order.
///
/// Adjusters run in registration order and see the adjustments produced before them.
pub trait OrderAdjuster: Send + Sync {
  fn handle(&self) -> &str;
  fn adjust(&self, order: &Order) -> Vec<Adjustment>;
}

/// Refreshes a line item against the catalog. Returns `false` when the purchasable is no longer
/// available, in which case the line item is dropped from the order.
pub trait LineItemPricer: Send + Sync {
  fn refresh(&self, item: &mut LineItem) -> bool;
}

#[derive(Default, Clone)]
pub struct OrderCalculator {
  adjusters: Vec<Arc<dyn OrderAdjuster>>,
  pricer: Option<Arc<dyn LineItemPricer>>,
}

impl OrderCalculator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_adjuster(mut self, adjuster: Arc<dyn OrderAdjuster>) -> Self {
    self.adjusters.push(adjuster);
    self
  }

  pub fn with_pricer(mut self, pricer: Arc<dyn LineItemPricer>) -> Self {
    self.pricer = Some(pricer);
    self
  }

  /// Recomputes the order according to its recalculation mode. A no-op once the mode is `None`.
  pub fn recalculate(&self, order: &mut Order) {
    match order.recalculation_mode {
      RecalculationMode::None => return,
      RecalculationMode::All => self.refresh_line_items(order),
      RecalculationMode::AdjustmentsOnly => {}
    }

    order.adjustments.clear();
    for adjuster in &self.adjusters {
      let produced = adjuster.adjust(order);
      debug!(adjuster = adjuster.handle(), count = produced.len(), "Adjuster applied");
      order.adjustments.extend(produced);
    }
  }

  fn refresh_line_items(&self, order: &mut Order) {
    let Some(pricer) = &self.pricer else {
      return;
    };
    let before = order.line_items.len();
    order.line_items.retain_mut(|item| pricer.refresh(item));
    if order.line_items.len() != before {
      debug!(removed = before - order.line_items.len(), "Unavailable line items removed");
    }
  }
}

/// A flat shipping charge for orders with a shipping method selected.
#[derive(Debug, Clone)]
pub struct FlatShipping {
  pub amount: Decimal,
}

impl OrderAdjuster for FlatShipping {
  fn handle(&self) -> &str {
    "shipping"
  }

  fn adjust(&self, order: &Order) -> Vec<Adjustment> {
    if order.shipping_method_handle.is_none() || order.is_empty() {
      return Vec::new();
    }
    vec![Adjustment::new(AdjustmentKind::Shipping, "Flat rate shipping", self.amount)]
  }
}

/// Tax on the item subtotal plus earlier adjustments. Included taxes are recorded but do not
/// change the total.
#[derive(Debug, Clone)]
pub struct PercentageTax {
  pub name: String,
  pub rate: Decimal,
  pub included: bool,
}

impl OrderAdjuster for PercentageTax {
  fn handle(&self) -> &str {
    "tax"
  }

  fn adjust(&self, order: &Order) -> Vec<Adjustment> {
    let taxable = order.item_subtotal() + order.adjustments_total();
    if taxable <= Decimal::ZERO {
      return Vec::new();
    }
    let amount = if self.included {
      taxable - taxable / (Decimal::ONE + self.rate)
    } else {
      taxable * self.rate
    };
    let mut adjustment = Adjustment::new(
      AdjustmentKind::Tax,
      self.name.clone(),
      amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
    );
    adjustment.included = self.included;
    vec![adjustment]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rust_decimal_macros::dec;

  struct SoldOut(i64);

  impl LineItemPricer for SoldOut {
    fn refresh(&self, item: &mut LineItem) -> bool {
      item.purchasable_id != self.0
    }
  }

  fn order() -> Order {
    let mut order = Order::new_cart("USD");
    order.line_items.push(LineItem::new(1, "Mug", 2, dec!(10.00)));
    order.line_items.push(LineItem::new(2, "Poster", 1, dec!(30.00)));
    order.shipping_method_handle = Some("standard".into());
    order
  }

  fn calculator() -> OrderCalculator {
    OrderCalculator::new()
      .with_adjuster(Arc::new(FlatShipping { amount: dec!(5.00) }))
      .with_adjuster(Arc::new(PercentageTax {
        name: "Sales tax".into(),
        rate: dec!(0.10),
        included: false,
      }))
      .with_pricer(Arc::new(SoldOut(2)))
  }

  #[test]
  fn full_recalculation_refreshes_items_and_adjustments() {
    let mut order = order();
    calculator().recalculate(&mut order);
    assert_eq!(order.line_items.len(), 1);
    assert_eq!(order.adjustments.len(), 2);
    // 20.00 items + 5.00 shipping + 2.50 tax
    assert_eq!(order.total_price(), dec!(27.50));
  }

  #[test]
  fn adjustments_only_keeps_line_items() {
    let mut order = order();
    order.recalculation_mode = RecalculationMode::AdjustmentsOnly;
    calculator().recalculate(&mut order);
    assert_eq!(order.line_items.len(), 2);
    assert_eq!(order.total_price(), dec!(60.50));
  }

  #[test]
  fn frozen_orders_are_left_alone() {
    let mut order = order();
    order.recalculation_mode = RecalculationMode::None;
    order.adjustments.push(Adjustment::new(AdjustmentKind::Discount, "Legacy", dec!(-3.00)));
    calculator().recalculate(&mut order);
    assert_eq!(order.line_items.len(), 2);
    assert_eq!(order.adjustments.len(), 1);
    assert_eq!(order.total_price(), dec!(47.00));
  }

  #[test]
  fn included_tax_does_not_change_the_total() {
    let mut order = order();
    order.shipping_method_handle = None;
    let calculator = OrderCalculator::new().with_adjuster(Arc::new(PercentageTax {
      name: "VAT".into(),
      rate: dec!(0.20),
      included: true,
    }));
    calculator.recalculate(&mut order);
    assert_eq!(order.adjustments[0].amount, dec!(8.33));
    assert_eq!(order.total_price(), dec!(50.00));
  }
}
