// orderflow/payments/src/web/handlers/offsite_handlers.rs

//! Stand-in for the hosted checkout page of the simulated off-site gateway.

use actix_web::http::header;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::{info, instrument};

use crate::errors::AppError;

#[derive(Debug, Deserialize)]
pub struct HostedCheckoutParams {
  pub session: String,
  #[serde(rename = "return")]
  pub return_url: String,
  pub cancel: Option<String>,
  /// `true` simulates the customer abandoning the hosted page.
  #[serde(default)]
  pub abandon: bool,
}

/// The simulated customer pays at once and is sent back to the shop.
#[instrument(name = "handler::mock_offsite_checkout", skip_all, fields(session = %params.session))]
pub async fn hosted_checkout_handler(params: web::Query<HostedCheckoutParams>) -> Result<HttpResponse, AppError> {
  let params = params.into_inner();
  let target = match (params.abandon, params.cancel) {
    (true, Some(cancel)) => cancel,
    _ => params.return_url,
  };
  if !(target.starts_with("http://") || target.starts_with("https://") || target.starts_with('/')) {
    return Err(AppError::Validation("Invalid return URL".to_string()));
  }
  info!("Hosted checkout finished; returning customer");
  Ok(HttpResponse::Found().insert_header((header::LOCATION, target)).finish())
}
