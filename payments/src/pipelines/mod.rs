// orderflow/payments/src/pipelines/mod.rs

//! Defines and registers the payment pipelines with the `orderflow` registry.

use crate::errors::AppError;
use crate::state::AppState;
use orderflow::FlowRegistry;
use std::sync::Arc;

pub mod contexts;

pub mod complete_payment_pipeline;
pub mod pay_pipeline;

/// Registers every pipeline the application runs. Called once while building `AppState`.
pub fn register_all_pipelines(flow: &Arc<FlowRegistry<AppError>>, app_state: &AppState) {
  tracing::info!("Registering payment pipelines...");

  pay_pipeline::register_pay_pipeline(flow, app_state);
  complete_payment_pipeline::register_complete_payment_pipeline(flow, app_state);

  tracing::info!("All payment pipelines registered.");
}
