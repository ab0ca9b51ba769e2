// tests/complete_payment_tests.rs
mod common;

use common::*;
use orderflow_payments::errors::{AppError, PaymentError};
use orderflow_payments::models::{PaidStatus, TransactionStatus};
use orderflow_payments::services::orchestrator::{OrderRef, PayParams, PENDING_MESSAGE};
use orderflow_payments::services::requester::RequesterContext;
use serial_test::serial;
use std::time::Duration;

async fn start_offsite_payment(h: &Harness) -> (i64, String) {
  let cart = insert_cart(&h.state).await;
  let params = PayParams {
    gateway_id: Some(OFFSITE_ID),
    redirect: Some("/shop/thanks?number={number}".into()),
    cancel_url: Some("/shop/checkout".into()),
    ..PayParams::default()
  };
  let requester = RequesterContext::site().with_user(CUSTOMER_ID).with_cart(cart.number.clone());
  let outcome = h
    .state
    .orchestrator()
    .pay(OrderRef::CurrentCart, params, requester)
    .await
    .unwrap();

  assert!(outcome.is_success(), "unexpected outcome: {:?}", outcome.error());
  let PayOutcomeParts { redirect, hash, status } = parts(&outcome);
  let redirect = redirect.expect("off-site gateways hand back a redirect");
  assert!(redirect.starts_with("https://pay.example/checkout"));
  assert!(redirect.contains(&hash));
  assert_eq!(status, TransactionStatus::Redirect);
  assert!(!outcome.order().unwrap().is_completed);
  (cart.id, hash)
}

struct PayOutcomeParts {
  redirect: Option<String>,
  hash: String,
  status: TransactionStatus,
}

fn parts(outcome: &orderflow_payments::services::orchestrator::PayOutcome) -> PayOutcomeParts {
  use orderflow_payments::services::orchestrator::PayOutcome;
  let tx = outcome.transaction().unwrap();
  PayOutcomeParts {
    redirect: match outcome {
      PayOutcome::Succeeded { redirect, .. } => redirect.clone(),
      _ => None,
    },
    hash: tx.hash.clone(),
    status: tx.status,
  }
}

#[tokio::test]
#[serial]
async fn offsite_payment_completes_once_and_replays_afterwards() {
  let h = harness();
  let (order_id, hash) = start_offsite_payment(&h).await;
  let orchestrator = h.state.orchestrator();

  let first = orchestrator.complete_payment(&hash).await.unwrap();
  assert!(first.success);
  assert!(!first.replayed);
  assert_eq!(first.transaction.status, TransactionStatus::Success);
  let order = h.state.stores.orders.find_by_id(order_id).await.unwrap().unwrap();
  assert!(order.is_completed);
  assert_eq!(order.paid_status(), PaidStatus::Paid);
  assert_eq!(first.url, format!("http://shop.test/shop/thanks?number={}", order.number));

  let second = orchestrator.complete_payment(&hash).await.unwrap();
  assert!(second.success);
  assert!(second.replayed);
  assert_eq!(second.url, first.url);
  assert_eq!(h.offsite.complete_count(), 1);

  let rows = h.state.payments.ledger().for_order(order_id).await.unwrap();
  assert_eq!(rows.len(), 1);
}

#[tokio::test]
#[serial]
async fn unknown_hash_is_refused() {
  let h = harness();
  let err = h.state.orchestrator().complete_payment("does-not-exist").await.unwrap_err();
  assert!(matches!(err, AppError::Payment(PaymentError::TransactionNotFound)));
}

#[tokio::test]
#[serial]
async fn rejected_offsite_payment_sends_the_customer_to_the_cancel_url() {
  let h = harness_with(
    test_config(),
    ScriptedGateway::new(ONSITE_ID, Script::Succeed, Script::Succeed),
    ScriptedGateway::new(OFFSITE_ID, Script::Redirect, Script::Decline("Customer abandoned the payment.")),
  );
  let (order_id, hash) = start_offsite_payment(&h).await;

  let outcome = h.state.orchestrator().complete_payment(&hash).await.unwrap();
  assert!(!outcome.success);
  assert_eq!(outcome.url, "http://shop.test/shop/checkout");
  assert_eq!(outcome.error.as_deref(), Some("Customer abandoned the payment."));
  assert_eq!(outcome.transaction.status, TransactionStatus::Failed);

  let order = h.state.stores.orders.find_by_id(order_id).await.unwrap().unwrap();
  assert!(!order.is_completed);
  assert_eq!(order.paid_status(), PaidStatus::Unpaid);

  let replay = h.state.orchestrator().complete_payment(&hash).await.unwrap();
  assert!(replay.replayed);
  assert_eq!(replay.url, outcome.url);
  assert_eq!(h.offsite.complete_count(), 1);
}

#[tokio::test]
#[serial]
async fn duplicate_concurrent_callbacks_reach_the_gateway_once() {
  let h = harness_with(
    test_config(),
    ScriptedGateway::new(ONSITE_ID, Script::Succeed, Script::Succeed),
    ScriptedGateway::new(OFFSITE_ID, Script::Redirect, Script::Succeed).with_latency(Duration::from_millis(50)),
  );
  let (_, hash) = start_offsite_payment(&h).await;
  let orchestrator = h.state.orchestrator();

  let (a, b) = tokio::join!(orchestrator.complete_payment(&hash), orchestrator.complete_payment(&hash));

  let results = [a, b];
  let firsts = results
    .iter()
    .filter(|r| matches!(r, Ok(outcome) if !outcome.replayed))
    .count();
  assert_eq!(firsts, 1);
  for result in &results {
    match result {
      Ok(outcome) => assert!(outcome.success),
      Err(err) => assert!(matches!(err, AppError::Payment(PaymentError::CompletionInProgress))),
    }
  }
  assert_eq!(h.offsite.complete_count(), 1);

  let settled = orchestrator.complete_payment(&hash).await.unwrap();
  assert!(settled.replayed);
  assert!(settled.success);
}

#[tokio::test]
#[serial]
async fn unsettled_completion_waits_out_its_lease_then_resumes() {
  let h = harness_with(
    test_config(),
    ScriptedGateway::new(ONSITE_ID, Script::Succeed, Script::Succeed),
    ScriptedGateway::new(OFFSITE_ID, Script::Redirect, Script::HangOnce),
  );
  let (order_id, hash) = start_offsite_payment(&h).await;
  let orchestrator = h.state.orchestrator();

  let stalled = orchestrator.complete_payment(&hash).await.unwrap();
  assert!(!stalled.success);
  assert_eq!(stalled.transaction.status, TransactionStatus::Processing);
  assert_eq!(stalled.error.as_deref(), Some(PENDING_MESSAGE));

  // Still inside the lease of the call that timed out.
  let err = orchestrator.complete_payment(&hash).await.unwrap_err();
  assert!(matches!(err, AppError::Payment(PaymentError::CompletionInProgress)));
  assert_eq!(h.offsite.complete_count(), 1);

  tokio::time::sleep(Duration::from_millis(500)).await;
  let resumed = orchestrator.complete_payment(&hash).await.unwrap();
  assert!(resumed.success);
  assert!(!resumed.replayed);
  assert_eq!(resumed.transaction.status, TransactionStatus::Success);
  assert_eq!(h.offsite.complete_count(), 2);

  let order = h.state.stores.orders.find_by_id(order_id).await.unwrap().unwrap();
  assert!(order.is_completed);
  assert_eq!(h.state.payments.ledger().for_order(order_id).await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn payment_left_processing_by_a_timeout_is_resumed_by_its_callback() {
  let h = harness_with(
    test_config(),
    ScriptedGateway::new(ONSITE_ID, Script::Succeed, Script::Succeed),
    ScriptedGateway::new(OFFSITE_ID, Script::Hang, Script::Succeed),
  );
  let cart = insert_cart(&h.state).await;
  let requester = RequesterContext::site().with_user(CUSTOMER_ID).with_cart(cart.number.clone());
  let params = PayParams {
    gateway_id: Some(OFFSITE_ID),
    ..PayParams::default()
  };
  let outcome = h
    .state
    .orchestrator()
    .pay(OrderRef::CurrentCart, params, requester)
    .await
    .unwrap();
  assert!(outcome.is_pending());
  let hash = outcome.transaction().unwrap().hash.clone();
  assert!(!outcome.order().unwrap().is_paid());

  let early = h.state.orchestrator().complete_payment(&hash).await.unwrap_err();
  assert!(matches!(early, AppError::Payment(PaymentError::CompletionInProgress)));
  assert_eq!(h.offsite.complete_count(), 0);

  tokio::time::sleep(Duration::from_millis(500)).await;
  let settled = h.state.orchestrator().complete_payment(&hash).await.unwrap();
  assert!(settled.success);
  assert_eq!(h.offsite.complete_count(), 1);
  let order = h.state.stores.orders.find_by_id(cart.id).await.unwrap().unwrap();
  assert!(order.is_completed);
  assert_eq!(order.paid_status(), PaidStatus::Paid);
}
