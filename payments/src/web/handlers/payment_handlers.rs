// orderflow/payments/src/web/handlers/payment_handlers.rs

use actix_web::cookie::Cookie;
use actix_web::http::{header, StatusCode};
use actix_web::web::{self, Either};
use actix_web::{HttpRequest, HttpResponse};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::{info, instrument, warn};

use crate::errors::{AppError, PaymentError};
use crate::services::orchestrator::{OrderRef, PayOutcome, PayParams, PENDING_MESSAGE};
use crate::services::requester::RequesterContext;
use crate::state::AppState;

fn flash_cookie(app_state: &AppState, message: &str) -> Cookie<'static> {
  Cookie::build(app_state.config.flash_cookie_name.clone(), message.to_string())
    .path("/")
    .http_only(true)
    .finish()
}

fn redirect_to(location: &str, flash: Option<Cookie<'static>>) -> HttpResponse {
  let mut builder = HttpResponse::Found();
  builder.insert_header((header::LOCATION, location.to_string()));
  if let Some(cookie) = flash {
    builder.cookie(cookie);
  }
  builder.finish()
}

fn absolute(app_state: &AppState, url: &str) -> String {
  if url.starts_with("http://") || url.starts_with("https://") {
    url.to_string()
  } else {
    format!("{}/{}", app_state.config.app_base_url, url.trim_start_matches('/'))
  }
}

/// JSON body or classic form post.
pub type PayBody = Either<web::Json<Map<String, Value>>, web::Form<HashMap<String, String>>>;

fn body_to_map(body: PayBody) -> Map<String, Value> {
  match body {
    Either::Left(json) => json.into_inner(),
    Either::Right(form) => form
      .into_inner()
      .into_iter()
      .map(|(k, v)| (k, Value::String(v)))
      .collect(),
  }
}

fn outcome_json(outcome: &PayOutcome, cart_key: &str, redact: bool) -> Value {
  let mut body = Map::new();
  if let Some(order) = outcome.order() {
    body.insert(cart_key.to_string(), json!(order.to_projection(redact)));
  }
  if let Some(tx) = outcome.transaction() {
    body.insert("transactionId".into(), json!(tx.reference));
    body.insert("transactionHash".into(), json!(tx.hash));
  }
  match outcome {
    PayOutcome::Succeeded { redirect, .. } => {
      body.insert("success".into(), json!(true));
      if let Some(url) = redirect {
        body.insert("redirect".into(), json!(url));
      }
    }
    PayOutcome::Pending { .. } => {
      body.insert("success".into(), json!(false));
      body.insert("pending".into(), json!(true));
      body.insert("message".into(), json!(PENDING_MESSAGE));
    }
    PayOutcome::Failed { error, form_errors, .. } => {
      body.insert("error".into(), json!(error.to_string()));
      body.insert("code".into(), json!(error.code()));
      if !form_errors.is_empty() {
        body.insert("paymentFormErrors".into(), json!(form_errors));
      }
    }
  }
  Value::Object(body)
}

#[instrument(
  name = "handler::pay",
  skip(app_state, req, requester, body),
  fields(user_id = ?requester.user_id, accepts_json = requester.accepts_json)
)]
pub async fn pay_handler(
  app_state: web::Data<AppState>,
  req: HttpRequest,
  requester: RequesterContext,
  body: PayBody,
) -> Result<HttpResponse, AppError> {
  let (number, params) = PayParams::from_body(&body_to_map(body))?;
  let (order_ref, cart_key) = match number {
    Some(number) => (OrderRef::Number(number), "order".to_string()),
    None => (OrderRef::CurrentCart, app_state.config.cart_variable.clone()),
  };
  let email = params.email.clone();
  let accepts_json = requester.accepts_json;
  let can_manage = requester.can_manage_orders();
  let cart_number = requester.cart_number.clone();

  let outcome = app_state.orchestrator().pay(order_ref, params, requester).await?;

  // Customer details are only echoed to someone who proved access to them.
  let redact = outcome.order().map_or(true, |order| {
    !(can_manage || cart_number.as_deref() == Some(order.number.as_str()) || order.email_matches(email.as_deref()))
  });

  if accepts_json {
    let status = match (&outcome, outcome.error()) {
      (PayOutcome::Pending { .. }, _) => StatusCode::ACCEPTED,
      (_, None) => StatusCode::OK,
      (_, Some(error)) => error.status_code(),
    };
    return Ok(HttpResponse::build(status).json(outcome_json(&outcome, &cart_key, redact)));
  }

  match &outcome {
    PayOutcome::Succeeded { order, redirect, .. } => {
      let target = redirect
        .clone()
        .or_else(|| order.return_url.as_deref().map(|url| absolute(&app_state, url)))
        .unwrap_or_else(|| app_state.config.app_base_url.clone());
      info!(order_id = order.id, "Payment submitted; redirecting");
      Ok(redirect_to(&target, None))
    }
    PayOutcome::Pending { order, .. } => {
      warn!(order_id = order.id, "Payment not settled yet; returning to the checkout page");
      Ok(redirect_to(&referer_or_home(&app_state, &req), Some(flash_cookie(&app_state, PENDING_MESSAGE))))
    }
    PayOutcome::Failed { error, .. } => {
      warn!(code = error.code(), "Payment failed; returning to the checkout page");
      Ok(redirect_to(
        &referer_or_home(&app_state, &req),
        Some(flash_cookie(&app_state, &error.to_string())),
      ))
    }
  }
}

fn referer_or_home(app_state: &AppState, req: &HttpRequest) -> String {
  req
    .headers()
    .get(header::REFERER)
    .and_then(|v| v.to_str().ok())
    .map(str::to_string)
    .unwrap_or_else(|| app_state.config.app_base_url.clone())
}

#[derive(Debug, Default, Deserialize)]
pub struct CompletePaymentParams {
  #[serde(rename = "commerceTransactionHash")]
  pub transaction_hash: Option<String>,
}

#[instrument(name = "handler::complete_payment", skip_all)]
pub async fn complete_payment_handler(
  app_state: web::Data<AppState>,
  requester: RequesterContext,
  query: web::Query<CompletePaymentParams>,
  form: Option<web::Form<CompletePaymentParams>>,
) -> Result<HttpResponse, AppError> {
  let hash = query
    .into_inner()
    .transaction_hash
    .or_else(|| form.and_then(|f| f.into_inner().transaction_hash))
    .filter(|h| !h.trim().is_empty())
    .ok_or(PaymentError::TransactionNotFound)?;

  let outcome = app_state.orchestrator().complete_payment(&hash).await?;

  if requester.accepts_json {
    return Ok(HttpResponse::Ok().json(json!({
      "success": outcome.success,
      "url": outcome.url,
      "error": outcome.error,
    })));
  }

  let flash = outcome.error.as_deref().map(|error| flash_cookie(&app_state, error));
  Ok(redirect_to(&outcome.url, flash))
}

fn require_order_manager(requester: &RequesterContext) -> Result<(), AppError> {
  if requester.can_manage_orders() {
    Ok(())
  } else {
    Err(AppError::Forbidden("Managing orders requires control panel access.".to_string()))
  }
}

#[instrument(name = "handler::capture", skip(app_state, requester), fields(user_id = ?requester.user_id))]
pub async fn capture_handler(
  app_state: web::Data<AppState>,
  requester: RequesterContext,
  path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
  require_order_manager(&requester)?;
  let tx = app_state.payments.capture(path.into_inner(), requester.user_id).await?;
  Ok(HttpResponse::Ok().json(json!({ "success": tx.is_successful(), "transaction": tx })))
}

#[derive(Debug, Default, Deserialize)]
pub struct RefundRequest {
  pub amount: Option<Decimal>,
  pub note: Option<String>,
}

#[instrument(name = "handler::refund", skip(app_state, requester, body), fields(user_id = ?requester.user_id))]
pub async fn refund_handler(
  app_state: web::Data<AppState>,
  requester: RequesterContext,
  path: web::Path<i64>,
  body: Option<web::Json<RefundRequest>>,
) -> Result<HttpResponse, AppError> {
  require_order_manager(&requester)?;
  let RefundRequest { amount, note } = body.map(|b| b.into_inner()).unwrap_or_default();
  let tx = app_state
    .payments
    .refund(path.into_inner(), amount, note, requester.user_id)
    .await?;
  Ok(HttpResponse::Ok().json(json!({ "success": tx.is_successful(), "transaction": tx })))
}
