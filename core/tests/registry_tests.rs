// tests/registry_tests.rs
mod common;

use common::*;
use orderflow::{ContextData, FlowError, FlowRegistry, Pipeline, PipelineControl, PipelineResult};

#[derive(Debug, Default)]
struct PayRun {
  charged: bool,
}

#[derive(Debug, Default)]
struct CompletionRun {
  finalized: u32,
}

fn registry_with_two_pipelines() -> FlowRegistry<TestError> {
  let registry = FlowRegistry::<TestError>::new();

  let mut pay = Pipeline::<PayRun, TestError>::new(&[("charge", false, None)]);
  pay.on_root("charge", |ctx: ContextData<PayRun>| async move {
    ctx.write().charged = true;
    Ok::<_, TestError>(PipelineControl::Continue)
  });
  registry.register_pipeline(pay);

  let mut complete = Pipeline::<CompletionRun, TestError>::new(&[("finalize", false, None)]);
  complete.on_root("finalize", |ctx: ContextData<CompletionRun>| async move {
    ctx.write().finalized += 1;
    Ok::<_, TestError>(PipelineControl::Continue)
  });
  registry.register_pipeline(complete);

  registry
}

#[tokio::test]
async fn registry_dispatches_on_context_type() {
  setup_tracing();
  let registry = registry_with_two_pipelines();
  assert!(registry.is_registered::<PayRun>());

  let pay_ctx = ContextData::new(PayRun::default());
  assert_eq!(registry.run(pay_ctx.clone()).await, Ok(PipelineResult::Completed));
  assert!(pay_ctx.read().charged);

  let completion_ctx = ContextData::new(CompletionRun::default());
  registry.run(completion_ctx.clone()).await.unwrap();
  registry.run(completion_ctx.clone()).await.unwrap();
  assert_eq!(completion_ctx.read().finalized, 2);
}

#[tokio::test]
async fn unregistered_context_type_is_a_configuration_error() {
  setup_tracing();
  let registry = registry_with_two_pipelines();

  #[derive(Debug, Default)]
  struct RefundRun;

  match registry.run(ContextData::new(RefundRun)).await {
    Err(TestError::Flow(text)) => {
      assert!(text.contains("ConfigurationError"));
      assert!(text.contains("RefundRun"));
    }
    other => panic!("expected a configuration error, got {:?}", other),
  }
}

#[tokio::test]
async fn handler_errors_pass_through_the_registry() {
  setup_tracing();
  let registry = FlowRegistry::<TestError>::new();
  let mut pay = Pipeline::<PayRun, TestError>::new(&[("charge", false, None)]);
  pay.on_root("charge", |_ctx: ContextData<PayRun>| async move {
    Err::<PipelineControl, _>(TestError::Step("card declined".to_string()))
  });
  registry.register_pipeline(pay);

  let result = registry.run(ContextData::new(PayRun::default())).await;
  assert_eq!(result, Err(TestError::Step("card declined".to_string())));
}

#[tokio::test]
async fn default_registry_uses_flow_error() {
  setup_tracing();
  let registry = FlowRegistry::<FlowError>::default();
  let mut pay = Pipeline::<PayRun, FlowError>::new(&[("charge", false, None)]);
  pay.on_root("charge", |ctx: ContextData<PayRun>| async move {
    ctx.write().charged = true;
    Ok::<_, FlowError>(PipelineControl::Continue)
  });
  registry.register_pipeline(pay);

  let ctx = ContextData::new(PayRun::default());
  assert!(registry.run(ctx.clone()).await.is_ok());
  assert!(ctx.read().charged);
}
