//! Step pipeline execution framework.
//!
//! This module provides the sequencing engine for image builds:
//! - An ordered list of steps sharing one mutable [`StateBag`]
//! - Halt-and-unwind: the first failing step stops the build and every step
//!   that ran is cleaned up in reverse order
//! - Cancellation through a `CancellationToken`, handled like a halt
//!
//! ## Architecture
//!
//! ```text
//! Pipeline → Steps (run in order)
//!          ← Cleanup (reverse order, best effort)
//!
//! - Pipeline: Ordered, immutable step list
//! - Step: Atomic unit of work with run/cleanup
//! - StateBag: Per-build key/value context plus the terminal error
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use pipeline::{Pipeline, PipelineExecutor, StateBag};
//! use tokio_util::sync::CancellationToken;
//!
//! let pipeline = Pipeline::new(vec![Box::new(StepA), Box::new(StepB)]);
//! let mut state = StateBag::new();
//! let metrics = PipelineExecutor::execute(pipeline, &mut state, &CancellationToken::new()).await;
//! if let Some(err) = state.take_error() {
//!     eprintln!("build failed at {:?}: {}", metrics.halted_at, err);
//! }
//! ```

mod metrics;
#[allow(clippy::module_inception)]
mod pipeline;
mod state;
mod step;

pub use metrics::{CleanupFailure, PipelineMetrics, StepMetrics};
pub use pipeline::{Pipeline, PipelineExecutor};
pub use state::StateBag;
pub use step::{BoxedStep, BuildStep, StepAction, halt};

pub(crate) use step::step_start;
