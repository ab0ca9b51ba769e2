// orderflow/payments/src/config.rs

use crate::errors::{AppError, Result};
use crate::models::currency::PaymentCurrency;
use dotenvy::dotenv;
use rust_decimal::Decimal;
use std::env;
use std::time::Duration;
use uuid::Uuid;

/// Store-level checkout rules applied by the pay pipeline before a gateway is contacted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckoutSettings {
  pub require_shipping_address_at_checkout: bool,
  pub require_billing_address_at_checkout: bool,
  pub require_shipping_method_selection_at_checkout: bool,
  pub allow_empty_cart_on_checkout: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub server_host: String,
  pub server_port: u16,
  /// In-memory stores are used when unset.
  pub database_url: Option<String>,
  pub app_base_url: String,
  pub seed_db: bool,

  /// JSON key the order is returned under when paying the session cart.
  pub cart_variable: String,
  pub checkout: CheckoutSettings,
  /// First entry is the primary (order) currency.
  pub payment_currencies: Vec<PaymentCurrency>,
  pub gateway_timeout: Duration,
  /// How long a `processing` transaction belongs to the call that set it. After that a
  /// completion callback may take it over and ask the gateway again.
  pub processing_lease: Duration,

  pub csrf_cookie_name: String,
  /// Key the anti-forgery tokens are signed with.
  pub csrf_secret: String,
  pub cart_cookie_name: String,
  pub flash_cookie_name: String,

  pub mock_offsite_checkout_url: String,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      server_host: "127.0.0.1".to_string(),
      server_port: 8080,
      database_url: None,
      app_base_url: "http://127.0.0.1:8080".to_string(),
      seed_db: false,
      cart_variable: "cart".to_string(),
      checkout: CheckoutSettings::default(),
      payment_currencies: vec![PaymentCurrency::primary("USD")],
      gateway_timeout: Duration::from_secs(30),
      processing_lease: Duration::from_secs(120),
      csrf_cookie_name: "orderflow_csrf".to_string(),
      csrf_secret: Uuid::new_v4().simple().to_string(),
      cart_cookie_name: "orderflow_cart".to_string(),
      flash_cookie_name: "orderflow_flash".to_string(),
      mock_offsite_checkout_url: "http://127.0.0.1:8080/mock-offsite/checkout".to_string(),
    }
  }
}

fn parse_flag(var_name: &str, raw: &str) -> Result<bool> {
  match raw.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" | "" => Ok(false),
    other => Err(AppError::Config(format!("Invalid {} value: {}", var_name, other))),
  }
}

impl AppConfig {
  pub fn from_env() -> Result<Self> {
    dotenv().ok();

    let get_env = |var_name: &str| {
      env::var(var_name).map_err(|e| AppError::Config(format!("Missing environment variable '{}': {}", var_name, e)))
    };
    let get_flag = |var_name: &str, default: bool| match env::var(var_name) {
      Ok(raw) => parse_flag(var_name, &raw),
      Err(_) => Ok(default),
    };
    let defaults = Self::default();

    let server_host = get_env("SERVER_HOST").unwrap_or(defaults.server_host);
    let server_port = get_env("SERVER_PORT")
      .unwrap_or_else(|_| defaults.server_port.to_string())
      .parse::<u16>()
      .map_err(|e| AppError::Config(format!("Invalid SERVER_PORT: {}", e)))?;
    let database_url = get_env("DATABASE_URL").ok().filter(|url| !url.trim().is_empty());
    let app_base_url = get_env("APP_BASE_URL")
      .unwrap_or_else(|_| format!("http://{}:{}", server_host, server_port))
      .trim_end_matches('/')
      .to_string();

    let checkout = CheckoutSettings {
      require_shipping_address_at_checkout: get_flag("REQUIRE_SHIPPING_ADDRESS_AT_CHECKOUT", false)?,
      require_billing_address_at_checkout: get_flag("REQUIRE_BILLING_ADDRESS_AT_CHECKOUT", false)?,
      require_shipping_method_selection_at_checkout: get_flag("REQUIRE_SHIPPING_METHOD_SELECTION_AT_CHECKOUT", false)?,
      allow_empty_cart_on_checkout: get_flag("ALLOW_EMPTY_CART_ON_CHECKOUT", false)?,
    };

    let payment_currencies = match get_env("PAYMENT_CURRENCIES") {
      Ok(raw) => parse_payment_currencies(&raw)?,
      Err(_) => defaults.payment_currencies,
    };

    let gateway_timeout = get_env("GATEWAY_TIMEOUT_SECS")
      .unwrap_or_else(|_| defaults.gateway_timeout.as_secs().to_string())
      .parse::<u64>()
      .map(Duration::from_secs)
      .map_err(|e| AppError::Config(format!("Invalid GATEWAY_TIMEOUT_SECS: {}", e)))?;
    let processing_lease = get_env("PROCESSING_LEASE_SECS")
      .unwrap_or_else(|_| defaults.processing_lease.as_secs().to_string())
      .parse::<u64>()
      .map(Duration::from_secs)
      .map_err(|e| AppError::Config(format!("Invalid PROCESSING_LEASE_SECS: {}", e)))?
      .max(gateway_timeout);
    let csrf_secret = match get_env("CSRF_SECRET") {
      Ok(secret) if !secret.trim().is_empty() => secret,
      _ => {
        tracing::warn!("CSRF_SECRET is not set; anti-forgery tokens will not survive a restart");
        defaults.csrf_secret
      }
    };

    let config = Self {
      mock_offsite_checkout_url: get_env("MOCK_OFFSITE_CHECKOUT_URL")
        .unwrap_or_else(|_| format!("{}/mock-offsite/checkout", app_base_url)),
      server_host,
      server_port,
      database_url,
      app_base_url,
      seed_db: get_flag("SEED_DB", false)?,
      cart_variable: get_env("CART_VARIABLE").unwrap_or(defaults.cart_variable),
      checkout,
      payment_currencies,
      gateway_timeout,
      processing_lease,
      csrf_cookie_name: get_env("CSRF_COOKIE_NAME").unwrap_or(defaults.csrf_cookie_name),
      csrf_secret,
      cart_cookie_name: get_env("CART_COOKIE_NAME").unwrap_or(defaults.cart_cookie_name),
      flash_cookie_name: get_env("FLASH_COOKIE_NAME").unwrap_or(defaults.flash_cookie_name),
    };

    tracing::info!(
      database = config.database_url.is_some(),
      currencies = config.payment_currencies.len(),
      "Application configuration loaded successfully."
    );
    Ok(config)
  }

  pub fn primary_currency(&self) -> &str {
    self
      .payment_currencies
      .iter()
      .find(|c| c.primary)
      .map(|c| c.iso.as_str())
      .unwrap_or("USD")
  }

  /// URL the customer returns to after an off-site payment for the transaction `hash`.
  pub fn completion_url(&self, hash: &str) -> String {
    format!(
      "{}/payments/complete-payment?commerceTransactionHash={}",
      self.app_base_url, hash
    )
  }
}

/// Parses `USD:1,EUR:1.08`. The first entry is the primary currency and must have rate 1.
pub fn parse_payment_currencies(raw: &str) -> Result<Vec<PaymentCurrency>> {
  let mut currencies = Vec::new();
  for (idx, entry) in raw.split(',').map(str::trim).filter(|e| !e.is_empty()).enumerate() {
    let (iso, rate) = entry.split_once(':').unwrap_or((entry, "1"));
    let iso = iso.trim().to_ascii_uppercase();
    if iso.len() != 3 {
      return Err(AppError::Config(format!("Invalid currency code in PAYMENT_CURRENCIES: {}", iso)));
    }
    let rate: Decimal = rate
      .trim()
      .parse()
      .map_err(|e| AppError::Config(format!("Invalid rate for {}: {}", iso, e)))?;
    if rate <= Decimal::ZERO {
      return Err(AppError::Config(format!("Rate for {} must be positive", iso)));
    }
    if idx == 0 && rate != Decimal::ONE {
      return Err(AppError::Config(format!("Primary currency {} must have rate 1", iso)));
    }
    currencies.push(PaymentCurrency {
      iso,
      primary: idx == 0,
      rate,
    });
  }
  if currencies.is_empty() {
    return Err(AppError::Config("PAYMENT_CURRENCIES must name at least one currency".to_string()));
  }
  Ok(currencies)
}

#[cfg(test)]
mod tests {
  use super::*;
  use rust_decimal_macros::dec;

  #[test]
  fn parses_currency_list_with_primary_first() {
    let currencies = parse_payment_currencies("usd:1, EUR:1.08").unwrap();
    assert_eq!(currencies.len(), 2);
    assert!(currencies[0].primary);
    assert_eq!(currencies[0].iso, "USD");
    assert_eq!(currencies[1].rate, dec!(1.08));
    assert!(!currencies[1].primary);
  }

  #[test]
  fn rejects_bad_currency_lists() {
    assert!(parse_payment_currencies("").is_err());
    assert!(parse_payment_currencies("USD:2").is_err());
    assert!(parse_payment_currencies("USD:1,EUR:0").is_err());
    assert!(parse_payment_currencies("DOLLARS:1").is_err());
  }

  #[test]
  fn flags_accept_common_spellings() {
    assert!(parse_flag("X", "TRUE").unwrap());
    assert!(!parse_flag("X", "0").unwrap());
    assert!(parse_flag("X", "maybe").is_err());
  }

  #[test]
  fn completion_url_carries_the_hash() {
    let config = AppConfig::default();
    assert_eq!(
      config.completion_url("abc"),
      "http://127.0.0.1:8080/payments/complete-payment?commerceTransactionHash=abc"
    );
  }
}
