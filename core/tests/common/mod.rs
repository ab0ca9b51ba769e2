// tests/common/mod.rs
#![allow(dead_code)]

use once_cell::sync::Lazy;
use orderflow::{ContextData, FlowError, PipelineControl};
use tracing::Level;

/// Context used across engine tests: a tiny stand-in for a checkout run.
#[derive(Clone, Debug, Default)]
pub struct CheckoutTrace {
  pub visited: Vec<String>,
  pub total_cents: i64,
  pub stop_after: Option<String>,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TestError {
  /// Engine errors flattened to their Debug text so they can be compared.
  #[error("flow error: {0}")]
  Flow(String),

  #[error("step failed: {0}")]
  Step(String),
}

impl From<FlowError> for TestError {
  fn from(err: FlowError) -> Self {
    TestError::Flow(format!("{:?}", err))
  }
}

/// Records `label`, adds `cents` and stops if the context asks to stop at `label`.
pub fn recording_handler(label: &'static str, cents: i64) -> orderflow::Handler<CheckoutTrace, TestError> {
  Box::new(move |ctx: ContextData<CheckoutTrace>| {
    Box::pin(async move {
      let mut guard = ctx.write();
      guard.visited.push(label.to_string());
      guard.total_cents += cents;
      tracing::debug!(target: "engine_tests", label, total = guard.total_cents, "handler ran");
      if guard.stop_after.as_deref() == Some(label) {
        return Ok(PipelineControl::Stop);
      }
      Ok(PipelineControl::Continue)
    })
  })
}

pub fn failing_handler(label: &'static str, message: &'static str) -> orderflow::Handler<CheckoutTrace, TestError> {
  Box::new(move |ctx: ContextData<CheckoutTrace>| {
    Box::pin(async move {
      ctx.write().visited.push(label.to_string());
      Err(TestError::Step(message.to_string()))
    })
  })
}

static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer()
    .try_init()
    .ok();
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}
