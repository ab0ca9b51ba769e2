// orderflow/payments/src/gateways/form.rs

use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::PaymentSource;

/// Gateway-specific payment details collected for one charge.
///
/// A form populated from a stored payment source carries only the source token; the raw fields
/// stay empty and required-field checks are skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentForm {
  #[serde(skip)]
  required: Vec<String>,
  #[serde(skip)]
  pub fields: BTreeMap<String, String>,
  #[serde(skip)]
  pub token: Option<String>,
  pub errors: BTreeMap<String, Vec<String>>,
}

impl PaymentForm {
  pub fn new(required: &[&str]) -> Self {
    Self {
      required: required.iter().map(|s| s.to_string()).collect(),
      ..Self::default()
    }
  }

  pub fn populate_from_params(&mut self, params: &BTreeMap<String, String>) {
    for (key, value) in params {
      self.fields.insert(key.clone(), value.trim().to_string());
    }
  }

  pub fn populate_from_payment_source(&mut self, source: &PaymentSource) {
    self.token = Some(source.token.clone());
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.fields.get(key).map(String::as_str).filter(|v| !v.is_empty())
  }

  pub fn add_error(&mut self, attribute: &str, message: impl Into<String>) {
    self.errors.entry(attribute.to_string()).or_default().push(message.into());
  }

  pub fn has_errors(&self) -> bool {
    !self.errors.is_empty()
  }

  /// Checks required fields; returns `true` when the form has no errors afterwards.
  pub fn validate(&mut self) -> bool {
    if self.token.is_none() {
      let missing: Vec<String> = self
        .required
        .iter()
        .filter(|field| self.get(field).is_none())
        .cloned()
        .collect();
      for field in missing {
        self.add_error(&field, format!("{} cannot be blank.", field));
      }
    }
    !self.has_errors()
  }
}
