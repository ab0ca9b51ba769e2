// orderflow/payments/src/models/currency.rs

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// A currency an order may be paid in.
///
/// `rate` is the number of order-currency units one unit of this currency is worth, so a
/// transaction's `amount` is always `payment_amount * rate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCurrency {
  pub iso: String,
  pub primary: bool,
  pub rate: Decimal,
}

impl PaymentCurrency {
  pub fn primary(iso: &str) -> Self {
    Self {
      iso: iso.to_ascii_uppercase(),
      primary: true,
      rate: Decimal::ONE,
    }
  }

  /// Converts an order-currency amount into this currency, rounded up to minor units so the
  /// converted charge never covers less than `amount`.
  pub fn to_payment_amount(&self, amount: Decimal) -> Option<Decimal> {
    amount
      .checked_div(self.rate)
      .map(|v| v.round_dp_with_strategy(2, RoundingStrategy::AwayFromZero))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rust_decimal_macros::dec;

  #[test]
  fn converts_and_rounds_to_minor_units() {
    let eur = PaymentCurrency {
      iso: "EUR".into(),
      primary: false,
      rate: dec!(1.08),
    };
    assert_eq!(eur.to_payment_amount(dec!(50.00)), Some(dec!(46.30)));
    assert_eq!(PaymentCurrency::primary("usd").to_payment_amount(dec!(12.345)), Some(dec!(12.35)));
  }

  #[test]
  fn converted_amounts_always_cover_the_original() {
    let eur = PaymentCurrency {
      iso: "EUR".into(),
      primary: false,
      rate: dec!(1.08),
    };
    // 1.15 / 1.08 = 1.0648..., which rounds to nearest as 1.06 and would fall short.
    let converted = eur.to_payment_amount(dec!(1.15)).unwrap();
    assert_eq!(converted, dec!(1.07));
    assert!(converted * eur.rate >= dec!(1.15));
    assert_eq!(PaymentCurrency::primary("USD").to_payment_amount(dec!(10.00)), Some(dec!(10.00)));
  }
}
