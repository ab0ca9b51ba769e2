// orderflow/payments/src/models/order.rs

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Type as SqlxType;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::errors::PaymentError;
use crate::models::currency::PaymentCurrency;
use crate::models::payment_source::PaymentSource;

/// How much of the order is recomputed when it is recalculated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "recalculation_mode", rename_all = "snake_case")]
#[serde(rename_all = "camelCase")]
pub enum RecalculationMode {
  #[default]
  All,
  AdjustmentsOnly,
  /// Frozen: no price-affecting recomputation runs.
  None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "paid_status", rename_all = "lowercase")]
#[serde(rename_all = "camelCase")]
pub enum PaidStatus {
  #[default]
  Unpaid,
  Partial,
  Paid,
  Overpaid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AdjustmentKind {
  Discount,
  Tax,
  Shipping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Adjustment {
  pub kind: AdjustmentKind,
  pub name: String,
  /// Negative for discounts.
  pub amount: Decimal,
  /// Included adjustments (e.g. VAT already in the price) do not change the total.
  #[serde(default)]
  pub included: bool,
}

impl Adjustment {
  pub fn new(kind: AdjustmentKind, name: impl Into<String>, amount: Decimal) -> Self {
    Self {
      kind,
      name: name.into(),
      amount,
      included: false,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
  pub purchasable_id: i64,
  pub description: String,
  pub qty: i64,
  pub price: Decimal,
  pub sale_price: Decimal,
}

impl LineItem {
  pub fn new(purchasable_id: i64, description: impl Into<String>, qty: i64, price: Decimal) -> Self {
    Self {
      purchasable_id,
      description: description.into(),
      qty,
      price,
      sale_price: price,
    }
  }

  pub fn subtotal(&self) -> Decimal {
    self.sale_price * Decimal::from(self.qty)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
  /// Zero until the order is first stored.
  pub id: i64,
  pub number: String,
  pub email: Option<String>,
  pub customer_id: Option<i64>,

  pub currency: String,
  pub payment_currency: String,
  pub line_items: Vec<LineItem>,
  pub adjustments: Vec<Adjustment>,
  pub total_paid: Decimal,

  pub gateway_id: Option<i64>,
  pub payment_source_id: Option<i64>,
  pub billing_address_id: Option<i64>,
  pub shipping_address_id: Option<i64>,
  pub shipping_method_handle: Option<String>,

  pub is_completed: bool,
  pub is_active_cart: bool,
  pub recalculation_mode: RecalculationMode,
  pub register_user_on_order_complete: bool,

  pub return_url: Option<String>,
  pub cancel_url: Option<String>,
  pub field_values: BTreeMap<String, Value>,

  pub date_ordered: Option<DateTime<Utc>>,
  pub date_paid: Option<DateTime<Utc>>,
  pub date_created: DateTime<Utc>,
  pub date_updated: DateTime<Utc>,
  pub version: i64,

  /// Validation messages keyed by attribute. Never persisted.
  pub errors: BTreeMap<String, Vec<String>>,
}

impl Order {
  /// A fresh, unsaved active cart.
  pub fn new_cart(currency: &str) -> Self {
    let now = Utc::now();
    Self {
      id: 0,
      number: Uuid::new_v4().simple().to_string(),
      email: None,
      customer_id: None,
      currency: currency.to_ascii_uppercase(),
      payment_currency: currency.to_ascii_uppercase(),
      line_items: Vec::new(),
      adjustments: Vec::new(),
      total_paid: Decimal::ZERO,
      gateway_id: None,
      payment_source_id: None,
      billing_address_id: None,
      shipping_address_id: None,
      shipping_method_handle: None,
      is_completed: false,
      is_active_cart: true,
      recalculation_mode: RecalculationMode::All,
      register_user_on_order_complete: false,
      return_url: None,
      cancel_url: None,
      field_values: BTreeMap::new(),
      date_ordered: None,
      date_paid: None,
      date_created: now,
      date_updated: now,
      version: 0,
      errors: BTreeMap::new(),
    }
  }

  pub fn total_qty(&self) -> i64 {
    self.line_items.iter().map(|li| li.qty).sum()
  }

  pub fn item_subtotal(&self) -> Decimal {
    self.line_items.iter().map(LineItem::subtotal).sum()
  }

  pub fn adjustments_total(&self) -> Decimal {
    self
      .adjustments
      .iter()
      .filter(|a| !a.included)
      .map(|a| a.amount)
      .sum()
  }

  pub fn total_price(&self) -> Decimal {
    (self.item_subtotal() + self.adjustments_total()).max(Decimal::ZERO)
  }

  pub fn outstanding_balance(&self) -> Decimal {
    self.total_price() - self.total_paid
  }

  pub fn is_empty(&self) -> bool {
    self.total_qty() == 0
  }

  /// Compared in minor units, so a converted payment that lands a fraction of a cent past the
  /// total still reads as paid rather than overpaid.
  pub fn paid_status(&self) -> PaidStatus {
    let total = self.total_price().round_dp(2);
    let paid = self.total_paid.round_dp_with_strategy(2, RoundingStrategy::ToZero);
    if paid <= Decimal::ZERO && total > Decimal::ZERO {
      PaidStatus::Unpaid
    } else if paid < total {
      PaidStatus::Partial
    } else if paid > total {
      PaidStatus::Overpaid
    } else {
      PaidStatus::Paid
    }
  }

  pub fn is_paid(&self) -> bool {
    matches!(self.paid_status(), PaidStatus::Paid | PaidStatus::Overpaid)
  }

  pub fn add_error(&mut self, attribute: &str, message: impl Into<String>) {
    self.errors.entry(attribute.to_string()).or_default().push(message.into());
  }

  pub fn has_errors(&self) -> bool {
    !self.errors.is_empty()
  }

  /// Case-insensitive comparison against the order's customer email.
  pub fn email_matches(&self, candidate: Option<&str>) -> bool {
    match (self.email.as_deref(), candidate) {
      (Some(email), Some(candidate)) => !email.is_empty() && email.trim().eq_ignore_ascii_case(candidate.trim()),
      _ => false,
    }
  }

  /// Selects a gateway directly. Any previously bound payment source is dropped.
  pub fn set_gateway(&mut self, gateway_id: i64) {
    self.gateway_id = Some(gateway_id);
    self.payment_source_id = None;
  }

  /// Binds a stored payment source; the effective gateway becomes the source's gateway.
  pub fn set_payment_source(&mut self, source: &PaymentSource) {
    self.payment_source_id = Some(source.id);
    self.gateway_id = Some(source.gateway_id);
  }

  pub fn set_payment_currency(&mut self, iso: &str, currencies: &[PaymentCurrency]) -> Result<(), PaymentError> {
    let iso = iso.trim().to_ascii_uppercase();
    if currencies.iter().any(|c| c.iso == iso) {
      self.payment_currency = iso;
      Ok(())
    } else {
      Err(PaymentError::UnsupportedCurrency(format!(
        "No payment currency found with ISO code “{}”.",
        iso
      )))
    }
  }

  /// Completes the order after it has been paid in full. Its prices are frozen for good.
  pub fn mark_as_complete(&mut self, now: DateTime<Utc>) {
    self.is_completed = true;
    self.is_active_cart = false;
    self.recalculation_mode = RecalculationMode::None;
    self.date_ordered.get_or_insert(now);
  }

  /// Expands `{number}`, `{id}`, `{email}` and `{shortNumber}` placeholders.
  pub fn render_template(&self, template: &str) -> String {
    template
      .replace("{number}", &self.number)
      .replace("{shortNumber}", self.short_number())
      .replace("{id}", &self.id.to_string())
      .replace("{email}", self.email.as_deref().unwrap_or(""))
  }

  pub fn short_number(&self) -> &str {
    self.number.get(..7).unwrap_or(&self.number)
  }

  /// Client-facing view. Redacted projections omit customer-identifying fields.
  pub fn to_projection(&self, redact: bool) -> OrderProjection {
    OrderProjection {
      id: self.id,
      number: self.number.clone(),
      email: if redact { None } else { self.email.clone() },
      currency: self.currency.clone(),
      payment_currency: self.payment_currency.clone(),
      total_qty: self.total_qty(),
      item_subtotal: self.item_subtotal(),
      adjustments: self.adjustments.clone(),
      total_price: self.total_price(),
      total_paid: self.total_paid,
      outstanding_balance: self.outstanding_balance(),
      paid_status: self.paid_status(),
      gateway_id: self.gateway_id,
      payment_source_id: if redact { None } else { self.payment_source_id },
      is_completed: self.is_completed,
      line_items: if redact { Vec::new() } else { self.line_items.clone() },
      errors: self.errors.clone(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderProjection {
  pub id: i64,
  pub number: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  pub currency: String,
  pub payment_currency: String,
  pub total_qty: i64,
  pub item_subtotal: Decimal,
  pub adjustments: Vec<Adjustment>,
  pub total_price: Decimal,
  pub total_paid: Decimal,
  pub outstanding_balance: Decimal,
  pub paid_status: PaidStatus,
  pub gateway_id: Option<i64>,
  pub payment_source_id: Option<i64>,
  pub is_completed: bool,
  pub line_items: Vec<LineItem>,
  pub errors: BTreeMap<String, Vec<String>>,
}
