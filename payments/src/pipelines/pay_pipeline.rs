// orderflow/payments/src/pipelines/pay_pipeline.rs

use orderflow::{ContextData, Pipeline, PipelineControl, SkipCondition};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::errors::{AppError, PaymentError};
use crate::models::{Order, RecalculationMode};
use crate::pipelines::contexts::PayCtxData;
use crate::services::orchestrator::OrderRef;
use crate::state::AppState;

type StepResult = Result<PipelineControl, AppError>;

pub fn register_pay_pipeline(flow: &Arc<orderflow::FlowRegistry<AppError>>, _app_state: &AppState) {
  let no_currency_param: SkipCondition<PayCtxData> =
    Arc::new(|ctx: ContextData<PayCtxData>| ctx.read().params.payment_currency.is_none());

  let mut p = Pipeline::<PayCtxData, AppError>::new(&[
    ("resolve_order", false, None),
    ("authorize_requester", false, None),
    ("check_checkout_requirements", false, None),
    ("switch_payment_currency", false, Some(no_currency_param)),
    ("resolve_gateway", false, None),
    ("populate_payment_form", false, None),
    ("check_order_details", false, None),
    ("guard_order_price", false, None),
    ("freeze_and_validate", false, None),
    ("process_payment", false, None),
  ]);

  p.on_root("resolve_order", resolve_order);
  p.on_root("authorize_requester", authorize_requester);
  p.on_root("check_checkout_requirements", check_checkout_requirements);
  p.on_root("switch_payment_currency", switch_payment_currency);
  p.on_root("resolve_gateway", resolve_gateway);
  p.on_root("populate_payment_form", populate_payment_form);
  p.on_root("check_order_details", check_order_details);
  p.on_root("guard_order_price", guard_order_price);
  p.on_root("freeze_and_validate", freeze_and_validate);
  p.on_root("process_payment", process_payment);

  flow.register_pipeline(p);
  info!("Pay pipeline registered.");
}

fn current_order(data: &PayCtxData) -> Result<Order, AppError> {
  data
    .order
    .clone()
    .ok_or_else(|| AppError::Internal("Pay pipeline step ran before the order was resolved".to_string()))
}

fn store_order(ctx: &ContextData<PayCtxData>, order: Order) {
  ctx.write().order = Some(order);
}

/// Relative URLs, or absolute ones under the site's own base URL.
pub fn is_allowed_redirect(url: &str, base_url: &str) -> bool {
  let url = url.trim();
  if url.starts_with("//") || url.starts_with('\\') {
    return false;
  }
  let has_scheme = url
    .find(':')
    .is_some_and(|colon| !url[..colon].contains('/') && !url[..colon].contains('?'));
  if !has_scheme {
    return true;
  }
  let base = base_url.trim_end_matches('/');
  url == base || url.starts_with(&format!("{}/", base)) || url.starts_with(&format!("{}?", base))
}

#[instrument(name = "pay::resolve_order", skip_all, err(Display))]
async fn resolve_order(ctx: ContextData<PayCtxData>) -> StepResult {
  let (state, order_ref, cart_number) = {
    let guard = ctx.read();
    (guard.app_state.clone(), guard.order_ref.clone(), guard.requester.cart_number.clone())
  };

  let order = match &order_ref {
    OrderRef::Number(number) => state.stores.orders.find_by_number(number).await?,
    OrderRef::CurrentCart => match &cart_number {
      Some(number) => state
        .stores
        .orders
        .find_by_number(number)
        .await?
        .filter(|o| o.is_active_cart && !o.is_completed),
      None => None,
    },
  };
  let Some(order) = order else {
    return Err(PaymentError::OrderNotFound.into());
  };

  let is_own_cart =
    order.is_active_cart && !order.is_completed && cart_number.as_deref() == Some(order.number.as_str());
  debug!(order_id = order.id, is_own_cart, "Order resolved");
  {
    let mut guard = ctx.write();
    guard.is_own_cart = is_own_cart;
    guard.order = Some(order);
  }
  Ok::<_, AppError>(PipelineControl::Continue)
}

#[instrument(name = "pay::authorize_requester", skip_all, err(Display))]
async fn authorize_requester(ctx: ContextData<PayCtxData>) -> StepResult {
  let guard = ctx.read();
  let Some(order) = guard.order.as_ref() else {
    return Err(AppError::Internal("No order to authorize against".to_string()));
  };
  if guard.is_own_cart {
    return Ok(PipelineControl::Continue);
  }
  if guard.requester.can_manage_orders() {
    debug!(user_id = ?guard.requester.user_id, "Order payment authorized by permission");
    return Ok(PipelineControl::Continue);
  }
  if guard.requester.is_site() && order.email_matches(guard.params.email.as_deref()) {
    return Ok(PipelineControl::Continue);
  }
  warn!(order_id = order.id, "Payment on a foreign order without a matching email");
  Err(PaymentError::AuthorizationRequired.into())
}

#[instrument(name = "pay::check_checkout_requirements", skip_all, err(Display))]
async fn check_checkout_requirements(ctx: ContextData<PayCtxData>) -> StepResult {
  let mut guard = ctx.write();
  let checkout = guard.app_state.config.checkout.clone();
  let register_user = guard.params.register_user_on_order_complete;
  let Some(order) = guard.order.as_mut() else {
    return Err(AppError::Internal("No order to check".to_string()));
  };

  if !checkout.allow_empty_cart_on_checkout && order.is_empty() {
    return Err(PaymentError::OrderIncomplete("Order can not be empty.".to_string()).into());
  }
  if checkout.require_shipping_address_at_checkout && order.shipping_address_id.is_none() {
    order.add_error("shippingAddressId", "Shipping address required.");
    return Err(PaymentError::OrderIncomplete("Shipping address required.".to_string()).into());
  }
  if checkout.require_billing_address_at_checkout && order.billing_address_id.is_none() {
    order.add_error("billingAddressId", "Billing address required.");
    return Err(PaymentError::OrderIncomplete("Billing address required.".to_string()).into());
  }
  if let Some(register) = register_user {
    if !order.is_completed {
      order.register_user_on_order_complete = register;
    }
  }
  Ok(PipelineControl::Continue)
}

#[instrument(name = "pay::switch_payment_currency", skip_all, err(Display))]
async fn switch_payment_currency(ctx: ContextData<PayCtxData>) -> StepResult {
  let mut guard = ctx.write();
  let currencies = guard.app_state.config.payment_currencies.clone();
  let iso = guard.params.payment_currency.clone().unwrap_or_default();
  let Some(order) = guard.order.as_mut() else {
    return Err(AppError::Internal("No order to switch currency on".to_string()));
  };
  if let Err(e) = order.set_payment_currency(&iso, &currencies) {
    order.add_error("paymentCurrency", e.to_string());
    return Err(e.into());
  }
  Ok(PipelineControl::Continue)
}

#[instrument(name = "pay::resolve_gateway", skip_all, err(Display))]
async fn resolve_gateway(ctx: ContextData<PayCtxData>) -> StepResult {
  let (state, mut order, source_id, gateway_id, requester) = {
    let guard = ctx.read();
    (
      guard.app_state.clone(),
      current_order(&guard)?,
      guard.params.payment_source_id,
      guard.params.gateway_id,
      guard.requester.clone(),
    )
  };
  let owns = |user_id: i64, order: &Order| {
    requester.is_site() && requester.user_id == Some(user_id) && order.customer_id == Some(user_id)
  };

  let mut bound_source = None;
  if let Some(source_id) = source_id {
    match state.stores.payment_sources.find_by_id(source_id).await? {
      Some(source) if owns(source.user_id, &order) && state.gateways.get(source.gateway_id).is_some() => {
        order.set_payment_source(&source);
        bound_source = Some(source);
      }
      _ => warn!(source_id, "Payment source not usable by this requester; selection left unchanged"),
    }
  } else if let Some(gateway_id) = gateway_id {
    if state.gateways.get(gateway_id).is_some() {
      order.set_gateway(gateway_id);
    } else {
      warn!(gateway_id, current = ?order.gateway_id, "Unknown gateway requested; keeping the order's gateway");
    }
  }

  // A source bound earlier in the checkout is still charged through.
  if bound_source.is_none() {
    if let Some(previous) = order.payment_source_id {
      match state.stores.payment_sources.find_by_id(previous).await? {
        Some(source) if owns(source.user_id, &order) => bound_source = Some(source),
        _ => order.payment_source_id = None,
      }
    }
  }

  let gateway = order.gateway_id.and_then(|id| state.gateways.get(id));
  let Some(gateway) = gateway.filter(|g| g.available_for_use_with_order(&order)) else {
    let message = PaymentError::NoGatewayAvailable.to_string();
    order.add_error("gatewayId", message.clone());
    order.add_error("paymentSourceId", message);
    store_order(&ctx, order);
    return Err(PaymentError::NoGatewayAvailable.into());
  };

  debug!(gateway = gateway.handle(), source = ?bound_source.as_ref().map(|s| s.id), "Gateway resolved");
  {
    let mut guard = ctx.write();
    guard.order = Some(order);
    guard.gateway = Some(gateway);
    guard.payment_source = bound_source;
  }
  Ok(PipelineControl::Continue)
}

#[instrument(name = "pay::populate_payment_form", skip_all, err(Display))]
async fn populate_payment_form(ctx: ContextData<PayCtxData>) -> StepResult {
  let (state, mut order, gateway, source, save_source, form_params, user_id) = {
    let guard = ctx.read();
    let gateway = guard
      .gateway
      .clone()
      .ok_or_else(|| AppError::Internal("No gateway resolved".to_string()))?;
    (
      guard.app_state.clone(),
      current_order(&guard)?,
      gateway,
      guard.payment_source.clone(),
      guard.params.save_payment_source,
      guard.params.payment_form.clone(),
      guard.requester.user_id,
    )
  };

  let mut form = gateway.payment_form_model();
  let mut source = source;
  match &source {
    Some(bound) => form.populate_from_payment_source(bound),
    None => {
      form.populate_from_params(&form_params);
      let saver = user_id.filter(|uid| save_source && gateway.supports_payment_sources() && order.customer_id == Some(*uid));
      if let Some(uid) = saver {
        let created = state.payments.save_payment_source(gateway.as_ref(), &form, uid).await;
        match created {
          Ok(created) => {
            order.set_payment_source(&created);
            form.populate_from_payment_source(&created);
            source = Some(created);
          }
          Err(AppError::Payment(e)) => {
            form.add_error("paymentSource", e.to_string());
            let mut guard = ctx.write();
            guard.form = Some(form);
            return Err(e.into());
          }
          Err(e) => return Err(e),
        }
      }
    }
  }

  {
    let mut guard = ctx.write();
    guard.order = Some(order);
    guard.form = Some(form);
    guard.payment_source = source;
  }
  Ok(PipelineControl::Continue)
}

#[instrument(name = "pay::check_order_details", skip_all, err(Display))]
async fn check_order_details(ctx: ContextData<PayCtxData>) -> StepResult {
  let mut guard = ctx.write();
  let params = guard.params.clone();
  let can_manage = guard.requester.can_manage_orders();
  let is_own_cart = guard.is_own_cart;
  let base_url = guard.app_state.config.app_base_url.clone();
  let require_shipping_method = guard.app_state.config.checkout.require_shipping_method_selection_at_checkout;
  let Some(order) = guard.order.as_mut() else {
    return Err(AppError::Internal("No order to check".to_string()));
  };

  if order.is_active_cart || can_manage {
    order.field_values.extend(params.fields.clone());
  }
  if is_own_cart {
    if let Some(email) = params.email.as_deref() {
      order.email = Some(email.to_string());
    }
  }
  if order.email.as_deref().map_or(true, |e| e.trim().is_empty()) {
    order.add_error("email", "Email address is required.");
    return Err(PaymentError::OrderIncomplete("An email address is required to make a payment.".to_string()).into());
  }
  if require_shipping_method && order.shipping_method_handle.is_none() {
    order.add_error("shippingMethodHandle", "A shipping method must be selected.");
    return Err(PaymentError::OrderIncomplete("A shipping method must be selected.".to_string()).into());
  }

  if let (Some(redirect), Some(cancel)) = (params.redirect.as_deref(), params.cancel_url.as_deref()) {
    let return_url = order.render_template(redirect);
    let cancel_url = order.render_template(cancel);
    if !is_allowed_redirect(&return_url, &base_url) || !is_allowed_redirect(&cancel_url, &base_url) {
      return Err(PaymentError::InvalidPaymentInput("Redirect URL is not allowed.".to_string()).into());
    }
    order.return_url = Some(return_url);
    order.cancel_url = Some(cancel_url);
  }
  Ok(PipelineControl::Continue)
}

#[instrument(name = "pay::guard_order_price", skip_all, err(Display))]
async fn guard_order_price(ctx: ContextData<PayCtxData>) -> StepResult {
  let (state, mut order) = {
    let guard = ctx.read();
    (guard.app_state.clone(), current_order(&guard)?)
  };
  let guarded = state.price_guard.guard(&mut order).await;
  store_order(&ctx, order);
  guarded?;
  Ok(PipelineControl::Continue)
}

#[instrument(name = "pay::freeze_and_validate", skip_all, err(Display))]
async fn freeze_and_validate(ctx: ContextData<PayCtxData>) -> StepResult {
  let mut guard = ctx.write();
  let form_valid = match guard.form.as_mut() {
    Some(form) => form.validate(),
    None => return Err(AppError::Internal("No payment form populated".to_string())),
  };
  let Some(order) = guard.order.as_mut() else {
    return Err(AppError::Internal("No order to freeze".to_string()));
  };
  order.recalculation_mode = RecalculationMode::None;

  if !form_valid {
    return Err(PaymentError::InvalidPaymentInput("Invalid payment information.".to_string()).into());
  }
  if order.has_errors() {
    return Err(PaymentError::InvalidPaymentInput("The order has errors.".to_string()).into());
  }
  Ok(PipelineControl::Continue)
}

#[instrument(name = "pay::process_payment", skip_all, err(Display))]
async fn process_payment(ctx: ContextData<PayCtxData>) -> StepResult {
  let (state, order, gateway, form, user_id) = {
    let guard = ctx.read();
    (
      guard.app_state.clone(),
      current_order(&guard)?,
      guard.gateway.clone(),
      guard.form.clone(),
      guard.requester.user_id,
    )
  };
  let (Some(gateway), Some(form)) = (gateway, form) else {
    return Err(AppError::Internal("Payment step reached without gateway or form".to_string()));
  };

  if order.outstanding_balance() <= rust_decimal::Decimal::ZERO {
    if order.is_completed {
      return Err(PaymentError::InvalidPaymentInput("The order has no outstanding balance.".to_string()).into());
    }
    info!(order_id = order.id, "Nothing to charge; completing order");
    state.payments.update_order_paid_information(order.id).await?;
    return Ok(PipelineControl::Continue);
  }

  let attempt = state
    .payments
    .process_payment(&order, gateway.as_ref(), &form, user_id)
    .await?;
  let declined = attempt.declined.clone();
  ctx.write().attempt = Some(attempt);

  match declined {
    Some(message) => Err(PaymentError::PaymentDeclined(message).into()),
    None => Ok(PipelineControl::Continue),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn redirects_must_stay_on_site() {
    let base = "https://shop.example";
    assert!(is_allowed_redirect("shop/thanks?number=abc", base));
    assert!(is_allowed_redirect("/shop/thanks", base));
    assert!(is_allowed_redirect("https://shop.example/thanks", base));
    assert!(!is_allowed_redirect("https://shop.example.evil/thanks", base));
    assert!(!is_allowed_redirect("//evil.example/thanks", base));
    assert!(!is_allowed_redirect("javascript:alert(1)", base));
  }
}
