// orderflow/payments/src/seed.rs

//! Demo data for local runs (`SEED_DB=true`).

use rust_decimal_macros::dec;
use serde_json::json;
use tracing::{info, instrument};

use crate::errors::Result;
use crate::models::{LineItem, NewPaymentSource, Order};
use crate::services::calculator::OrderCalculator;
use crate::store::Stores;

pub const DEMO_CART_NUMBER: &str = "demo0000000000000000000000000001";
pub const DEMO_EMAIL: &str = "demo@example.com";
pub const DEMO_USER_ID: i64 = 1;

/// Inserts a priced demo cart and a saved card for the demo user. Skips work already done.
#[instrument(name = "seed::demo_data", skip_all)]
pub async fn seed_demo_data(stores: &Stores, calculator: &OrderCalculator, currency: &str, gateway_id: i64) -> Result<()> {
  if stores.orders.find_by_number(DEMO_CART_NUMBER).await?.is_some() {
    info!("Demo data already present");
    return Ok(());
  }

  let mut cart = Order::new_cart(currency);
  cart.number = DEMO_CART_NUMBER.to_string();
  cart.email = Some(DEMO_EMAIL.to_string());
  cart.customer_id = Some(DEMO_USER_ID);
  cart.shipping_method_handle = Some("standard".to_string());
  cart.line_items.push(LineItem::new(101, "Wool socks", 2, dec!(12.50)));
  cart.line_items.push(LineItem::new(102, "Canvas tote", 1, dec!(25.00)));
  calculator.recalculate(&mut cart);
  let cart = stores.orders.insert(cart).await?;

  let source = stores
    .payment_sources
    .insert(NewPaymentSource {
      user_id: DEMO_USER_ID,
      gateway_id,
      token: "tok_4242424242424242".to_string(),
      description: "Card ending in 4242".to_string(),
      response: json!({ "seeded": true }),
    })
    .await?;

  info!(
    order_number = %cart.number,
    total = %cart.total_price(),
    payment_source_id = source.id,
    "Demo cart and payment source seeded"
  );
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::services::calculator::FlatShipping;

  #[tokio::test]
  async fn seeding_twice_keeps_one_demo_cart() {
    let stores = Stores::in_memory();
    let calculator = OrderCalculator::new().with_adjuster(std::sync::Arc::new(FlatShipping { amount: dec!(5.00) }));
    seed_demo_data(&stores, &calculator, "USD", 1).await.unwrap();
    seed_demo_data(&stores, &calculator, "USD", 1).await.unwrap();

    let cart = stores.orders.find_by_number(DEMO_CART_NUMBER).await.unwrap().unwrap();
    assert_eq!(cart.total_price(), dec!(55.00));
    assert_eq!(stores.payment_sources.find_by_user(DEMO_USER_ID).await.unwrap().len(), 1);
  }
}
