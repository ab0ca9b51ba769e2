// orderflow/payments/src/web/csrf.rs

//! Double-submit anti-forgery check. A signed token is handed out as a cookie, and
//! state-changing requests must echo it in the `X-CSRF-Token` header or, for plain HTML form
//! posts, in a `csrfToken` body field. Routes opt in by wrapping themselves with
//! [`require_csrf_token`].

use actix_web::body::{BoxBody, MessageBody};
use actix_web::cookie::{Cookie, SameSite};
use actix_web::dev::{Payload, ServiceRequest, ServiceResponse};
use actix_web::error::PayloadError;
use actix_web::http::{header, Method};
use actix_web::middleware::Next;
use actix_web::web::{self, Bytes};
use actix_web::{HttpResponse, ResponseError};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tracing::{debug, warn};
use url::form_urlencoded;
use uuid::Uuid;

use crate::errors::AppError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const CSRF_HEADER: &str = "X-CSRF-Token";
pub const CSRF_FORM_FIELD: &str = "csrfToken";

fn mac_for(secret: &str, nonce: &str) -> Option<HmacSha256> {
  let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
  mac.update(nonce.as_bytes());
  Some(mac)
}

/// A fresh `<nonce>.<hex hmac-sha256 of nonce>` token.
pub fn issue_token(secret: &str) -> Option<String> {
  let nonce = Uuid::new_v4().simple().to_string();
  let signature = mac_for(secret, &nonce)?.finalize().into_bytes();
  Some(format!("{}.{}", nonce, hex::encode(signature)))
}

/// Both the cookie token and the submitted one must carry a valid signature over the cookie's
/// nonce. Signatures are checked in constant time.
pub fn verify_token(secret: &str, submitted: &str, stored: &str) -> bool {
  let (Some((stored_nonce, stored_sig)), Some((submitted_nonce, submitted_sig))) =
    (stored.split_once('.'), submitted.split_once('.'))
  else {
    return false;
  };
  if stored_nonce.is_empty() || submitted_nonce != stored_nonce {
    return false;
  }
  let (Ok(stored_sig), Ok(submitted_sig)) = (hex::decode(stored_sig), hex::decode(submitted_sig)) else {
    return false;
  };
  let signed = |signature: &[u8]| mac_for(secret, stored_nonce).is_some_and(|mac| mac.verify_slice(signature).is_ok());
  signed(&stored_sig) && signed(&submitted_sig)
}

fn is_form_post(req: &ServiceRequest) -> bool {
  req
    .headers()
    .get(header::CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"))
}

/// Hands an already-read body back to the request for the handler's extractors.
fn replay_payload(body: Bytes) -> Payload {
  let stream = futures_util::stream::once(async move { Ok::<_, PayloadError>(body) });
  Payload::Stream {
    payload: Box::pin(stream),
  }
}

pub async fn require_csrf_token(
  mut req: ServiceRequest,
  next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<BoxBody>, actix_web::Error> {
  if matches!(*req.method(), Method::GET | Method::HEAD | Method::OPTIONS) {
    return Ok(next.call(req).await?.map_into_boxed_body());
  }

  let Some((cookie_name, secret)) = req
    .app_data::<web::Data<AppState>>()
    .map(|s| (s.config.csrf_cookie_name.clone(), s.config.csrf_secret.clone()))
  else {
    return Err(AppError::Internal("Application state is not registered".to_string()).into());
  };

  let stored = req.cookie(&cookie_name).map(|c| c.value().to_string());
  let mut submitted = req
    .headers()
    .get(CSRF_HEADER)
    .and_then(|v| v.to_str().ok())
    .map(str::to_string);
  if submitted.is_none() && is_form_post(&req) {
    let body = req.extract::<Bytes>().await?;
    submitted = form_urlencoded::parse(&body)
      .find(|(key, _)| key == CSRF_FORM_FIELD)
      .map(|(_, value)| value.into_owned());
    req.set_payload(replay_payload(body));
  }

  match (submitted, stored) {
    (Some(submitted), Some(stored)) if verify_token(&secret, &submitted, &stored) => {
      debug!(path = %req.path(), "Anti-forgery token verified");
      Ok(next.call(req).await?.map_into_boxed_body())
    }
    _ => {
      warn!(path = %req.path(), "Request rejected: missing or mismatched anti-forgery token");
      let refusal = AppError::Forbidden("Unable to verify your data submission.".to_string()).error_response();
      Ok(req.into_response(refusal))
    }
  }
}

/// Issues a fresh token as a cookie and in the body, for clients to echo back.
pub async fn issue_csrf_token_handler(app_state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
  let token = issue_token(&app_state.config.csrf_secret)
    .ok_or_else(|| AppError::Internal("Could not sign an anti-forgery token".to_string()))?;
  let cookie = Cookie::build(app_state.config.csrf_cookie_name.clone(), token.clone())
    .path("/")
    .same_site(SameSite::Strict)
    .finish();
  Ok(HttpResponse::Ok().cookie(cookie).json(json!({
    "csrfTokenName": CSRF_HEADER,
    "csrfFormField": CSRF_FORM_FIELD,
    "csrfTokenValue": token,
  })))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn issued_tokens_verify_against_their_cookie() {
    let token = issue_token("s3cret").unwrap();
    assert!(verify_token("s3cret", &token, &token));
    assert!(!verify_token("other", &token, &token));
  }

  #[test]
  fn forged_or_mismatched_tokens_are_refused() {
    let token = issue_token("s3cret").unwrap();
    let another = issue_token("s3cret").unwrap();
    assert!(!verify_token("s3cret", &another, &token));
    assert!(!verify_token("s3cret", "tok123", "tok123"));

    let (nonce, _) = token.split_once('.').unwrap();
    let forged = format!("{}.{}", nonce, "00".repeat(32));
    assert!(!verify_token("s3cret", &forged, &token));
    assert!(!verify_token("s3cret", &token[..token.len() - 2], &token));
  }
}
