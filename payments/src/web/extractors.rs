// orderflow/payments/src/web/extractors.rs

use actix_web::{web, FromRequest, HttpRequest};
use futures_util::future::{ready, Ready};
use tracing::warn;

use crate::errors::{AppError, Result};
use crate::services::requester::{RequestChannel, RequesterContext};
use crate::state::AppState;

pub const USER_ID_HEADER: &str = "X-User-ID";
pub const PERMISSIONS_HEADER: &str = "X-User-Permissions";
pub const REQUEST_CONTEXT_HEADER: &str = "X-Request-Context";

const DEFAULT_CART_COOKIE: &str = "orderflow_cart";

fn header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
  req.headers().get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Identity is taken from headers set by the fronting authentication layer; the cart comes from
/// the session cookie.
fn requester_from_request(req: &HttpRequest) -> Result<RequesterContext> {
  let user_id = match header(req, USER_ID_HEADER) {
    None | Some("") => None,
    Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
      warn!(header = USER_ID_HEADER, "Invalid user id header");
      AppError::Validation(format!("Invalid {} header", USER_ID_HEADER))
    })?),
  };
  let permissions = header(req, PERMISSIONS_HEADER)
    .map(|raw| {
      raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
    })
    .unwrap_or_default();
  let channel = match header(req, REQUEST_CONTEXT_HEADER) {
    Some(ctx) if ctx.eq_ignore_ascii_case("cp") => RequestChannel::ControlPanel,
    _ => RequestChannel::Site,
  };
  let accepts_json = header(req, "Accept").is_some_and(|accept| accept.contains("application/json"));
  let cart_cookie = req
    .app_data::<web::Data<AppState>>()
    .map(|state| state.config.cart_cookie_name.clone())
    .unwrap_or_else(|| DEFAULT_CART_COOKIE.to_string());
  let cart_number = req
    .cookie(&cart_cookie)
    .map(|c| c.value().to_string())
    .filter(|v| !v.is_empty());

  Ok(RequesterContext {
    user_id,
    permissions,
    channel,
    accepts_json,
    cart_number,
  })
}

impl FromRequest for RequesterContext {
  type Error = AppError;
  type Future = Ready<std::result::Result<Self, Self::Error>>;

  fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
    ready(requester_from_request(req))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::services::requester::MANAGE_ORDERS;
  use actix_web::cookie::Cookie;
  use actix_web::test::TestRequest;

  #[test]
  fn reads_identity_channel_and_cart() {
    let req = TestRequest::default()
      .insert_header((USER_ID_HEADER, "42"))
      .insert_header((PERMISSIONS_HEADER, "accessCp, commerce-manageOrders"))
      .insert_header((REQUEST_CONTEXT_HEADER, "cp"))
      .insert_header(("Accept", "application/json"))
      .cookie(Cookie::new(DEFAULT_CART_COOKIE, "abc123"))
      .to_http_request();
    let requester = requester_from_request(&req).unwrap();
    assert_eq!(requester.user_id, Some(42));
    assert!(requester.has_permission(MANAGE_ORDERS));
    assert!(requester.can_manage_orders());
    assert!(requester.accepts_json);
    assert_eq!(requester.cart_number.as_deref(), Some("abc123"));
  }

  #[test]
  fn anonymous_site_requests_are_allowed() {
    let req = TestRequest::default().to_http_request();
    let requester = requester_from_request(&req).unwrap();
    assert_eq!(requester, RequesterContext::site());
  }

  #[test]
  fn malformed_user_id_is_rejected() {
    let req = TestRequest::default().insert_header((USER_ID_HEADER, "abc")).to_http_request();
    assert!(matches!(requester_from_request(&req), Err(AppError::Validation(_))));
  }
}
