// orderflow/core/src/pipeline/execution.rs

//! `Pipeline::run`.

use crate::core::context_data::ContextData;
use crate::core::control::{PipelineControl, PipelineResult};
use crate::error::FlowError;
use crate::pipeline::definition::{Phase, Pipeline};
use tracing::{event, instrument, Instrument, Level};

impl<TData, Err> Pipeline<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  /// Runs every step in order against `ctx_data`.
  ///
  /// A handler error aborts the run and is returned as is. A non-optional step without
  /// any handler fails with [`FlowError::HandlerMissing`].
  #[instrument(
    name = "Pipeline::run",
    skip_all,
    fields(context_type = %std::any::type_name::<TData>(), num_steps = self.steps.len()),
    err(Display)
  )]
  pub async fn run(&self, ctx_data: ContextData<TData>) -> Result<PipelineResult, Err> {
    for (step_idx, step_def) in self.steps.iter().enumerate() {
      let step_name = step_def.name.as_str();

      if let Some(skip_if) = &step_def.skip_if {
        if skip_if(ctx_data.clone()) {
          event!(Level::DEBUG, step_name, "Step skipped by condition.");
          continue;
        }
      }

      if !self.has_handlers(step_name) {
        if step_def.optional {
          event!(Level::DEBUG, step_name, "Optional step has no handlers, skipping.");
          continue;
        }
        event!(Level::ERROR, step_name, "Non-optional step has no handlers.");
        return Err(Err::from(FlowError::HandlerMissing {
          step_name: step_def.name.clone(),
        }));
      }

      let step_span = tracing::info_span!("pipeline_step", step_name, step_index = step_idx);
      let control = self.run_step(step_name, ctx_data.clone()).instrument(step_span).await?;
      if control == PipelineControl::Stop {
        event!(Level::INFO, step_name, "Pipeline stopped by handler.");
        return Ok(PipelineResult::Stopped);
      }
    }

    Ok(PipelineResult::Completed)
  }

  async fn run_step(&self, step_name: &str, ctx_data: ContextData<TData>) -> Result<PipelineControl, Err> {
    for phase in Phase::ALL {
      for handler in self.handlers_for(step_name, phase) {
        match handler(ctx_data.clone()).await {
          Ok(PipelineControl::Continue) => {}
          Ok(PipelineControl::Stop) => return Ok(PipelineControl::Stop),
          Err(e) => {
            event!(Level::DEBUG, phase = phase.as_str(), error = %e, "Handler failed.");
            return Err(e);
          }
        }
      }
    }
    Ok(PipelineControl::Continue)
  }
}
