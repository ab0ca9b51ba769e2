// orderflow/core/src/lib.rs

//! Orderflow: an async, type-safe step pipeline engine.
//!
//! A pipeline is an ordered list of named steps operating on one shared context type.
//! Each step may carry `before`, `on` and `after` handlers, an `optional` flag and a
//! skip condition evaluated against the context. Handlers return a
//! [`PipelineControl`] to continue or to stop the run early, or an error which
//! aborts the run and is handed back to the caller unchanged.
//!
//! The [`FlowRegistry`] keys pipelines by their context type so that callers only
//! need to build a context and ask the registry to run "the pipeline for it".

pub mod core;
pub mod error;
pub mod pipeline;
pub mod registry;

pub use crate::core::context::Handler;
pub use crate::core::context_data::ContextData;
pub use crate::core::control::{PipelineControl, PipelineResult};
pub use crate::core::step::{SkipCondition, StepDef};

pub use crate::pipeline::definition::Pipeline;

pub use crate::error::{FlowError, FlowResult};

pub use crate::registry::FlowRegistry;
