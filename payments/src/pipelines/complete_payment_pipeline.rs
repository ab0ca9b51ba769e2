// orderflow/payments/src/pipelines/complete_payment_pipeline.rs

use orderflow::{ContextData, Pipeline, PipelineControl};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::errors::{AppError, PaymentError};
use crate::models::{Transaction, TransactionOutcome, TransactionStatus};
use crate::pipelines::contexts::CompletePaymentCtxData;
use crate::state::AppState;

type StepResult = Result<PipelineControl, AppError>;

pub fn register_complete_payment_pipeline(flow: &Arc<orderflow::FlowRegistry<AppError>>, _app_state: &AppState) {
  let mut p = Pipeline::<CompletePaymentCtxData, AppError>::new(&[
    ("resolve_transaction", false, None),
    ("replay_terminal_result", false, None),
    ("claim_transaction", false, None),
    ("complete_with_gateway", false, None),
    ("update_order_paid_information", false, None),
  ]);

  p.on_root("resolve_transaction", resolve_transaction);
  p.on_root("replay_terminal_result", replay_terminal_result);
  p.on_root("claim_transaction", claim_transaction);
  p.on_root("complete_with_gateway", complete_with_gateway);
  p.on_root("update_order_paid_information", update_order_paid_information);

  flow.register_pipeline(p);
  info!("Complete-payment pipeline registered.");
}

fn current_transaction(data: &CompletePaymentCtxData) -> Result<Transaction, AppError> {
  data
    .transaction
    .clone()
    .ok_or_else(|| AppError::Internal("Completion step ran before the transaction was resolved".to_string()))
}

#[instrument(name = "complete::resolve_transaction", skip_all, err(Display))]
async fn resolve_transaction(ctx: ContextData<CompletePaymentCtxData>) -> StepResult {
  let (state, hash) = {
    let guard = ctx.read();
    (guard.app_state.clone(), guard.hash.clone())
  };
  if hash.is_empty() {
    return Err(PaymentError::TransactionNotFound.into());
  }
  let Some(transaction) = state.payments.ledger().find_by_hash(&hash).await? else {
    warn!("Completion requested for an unknown transaction hash");
    return Err(PaymentError::TransactionNotFound.into());
  };
  info!(tx_id = transaction.id, status = ?transaction.status, "Transaction resolved for completion");
  ctx.write().transaction = Some(transaction);
  Ok::<_, AppError>(PipelineControl::Continue)
}

#[instrument(name = "complete::replay_terminal_result", skip_all, err(Display))]
async fn replay_terminal_result(ctx: ContextData<CompletePaymentCtxData>) -> StepResult {
  let mut guard = ctx.write();
  let status = current_transaction(&guard)?.status;
  if status.is_terminal() {
    info!(?status, "Transaction already finalized; replaying stored result");
    guard.replayed = true;
    return Ok(PipelineControl::Stop);
  }
  Ok(PipelineControl::Continue)
}

#[instrument(name = "complete::claim_transaction", skip_all, err(Display))]
async fn claim_transaction(ctx: ContextData<CompletePaymentCtxData>) -> StepResult {
  let (state, transaction) = {
    let guard = ctx.read();
    (guard.app_state.clone(), current_transaction(&guard)?)
  };
  let ledger = state.payments.ledger();
  let claim = TransactionOutcome::status(TransactionStatus::Processing);
  let claimed = ledger
    .record_outcome(
      &transaction,
      &[TransactionStatus::Pending, TransactionStatus::Redirect],
      &claim,
    )
    .await?;

  if let Some(claimed) = claimed {
    ctx.write().transaction = Some(claimed);
    return Ok(PipelineControl::Continue);
  }

  // Another callback got here first, or an earlier gateway call never settled.
  let current = ledger
    .find_by_id(transaction.id)
    .await?
    .ok_or(PaymentError::TransactionNotFound)?;
  if current.status.is_terminal() {
    let mut guard = ctx.write();
    guard.transaction = Some(current);
    guard.replayed = true;
    return Ok(PipelineControl::Stop);
  }
  if current.status == TransactionStatus::Processing {
    if let Some(resumed) = ledger.reclaim_stale(&current, state.config.processing_lease).await? {
      warn!(since = %current.date_updated, "Resuming a transaction left processing past its lease");
      ctx.write().transaction = Some(resumed);
      return Ok(PipelineControl::Continue);
    }
  }
  warn!(status = ?current.status, "Completion already in progress");
  Err(PaymentError::CompletionInProgress.into())
}

#[instrument(name = "complete::complete_with_gateway", skip_all, err(Display))]
async fn complete_with_gateway(ctx: ContextData<CompletePaymentCtxData>) -> StepResult {
  let (state, transaction) = {
    let guard = ctx.read();
    (guard.app_state.clone(), current_transaction(&guard)?)
  };
  let finalized = state.payments.complete(&transaction).await?;
  info!(status = ?finalized.status, "Gateway completion finished");
  ctx.write().transaction = Some(finalized);
  Ok(PipelineControl::Continue)
}

#[instrument(name = "complete::update_order_paid_information", skip_all, err(Display))]
async fn update_order_paid_information(ctx: ContextData<CompletePaymentCtxData>) -> StepResult {
  let (state, transaction) = {
    let guard = ctx.read();
    (guard.app_state.clone(), current_transaction(&guard)?)
  };
  let order = if transaction.is_successful() {
    Some(state.payments.update_order_paid_information(transaction.order_id).await?)
  } else {
    state.stores.orders.find_by_id(transaction.order_id).await?
  };
  ctx.write().order = order;
  Ok(PipelineControl::Continue)
}
