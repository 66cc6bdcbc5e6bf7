//! Sequential step runner with reverse-order unwind.

use super::metrics::{CleanupFailure, PipelineMetrics, StepMetrics};
use super::state::StateBag;
use super::step::{BoxedStep, StepAction, log_step_error};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use utmforge_shared::UtmforgeError;

/// Ordered, immutable list of steps.
///
/// Order encodes both execution order and reverse cleanup order.
pub struct Pipeline {
    steps: Vec<BoxedStep>,
}

impl Pipeline {
    pub fn new(steps: Vec<BoxedStep>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}

/// Pipeline executor.
///
/// Runs steps strictly one after another, each to completion. The first
/// halt, cancellation or panic stops forward progress. Then `cleanup` is called on every step whose
/// `run` was invoked, including the one that halted, in reverse order. The
/// same cleanup pass runs after a fully successful pipeline.
///
/// The outcome is reported through the state bag: an `error` recorded there
/// means the build failed. The executor itself never retries.
pub struct PipelineExecutor;

impl PipelineExecutor {
    pub async fn execute(
        pipeline: Pipeline,
        state: &mut StateBag,
        cancel: &CancellationToken,
    ) -> PipelineMetrics {
        let total_start = Instant::now();
        let mut metrics = PipelineMetrics::default();
        let mut ran: Vec<BoxedStep> = Vec::with_capacity(pipeline.len());

        for mut step in pipeline.steps {
            let name = step.name().to_string();

            if cancel.is_cancelled() {
                tracing::info!(step = %name, "Build cancelled before step");
                state.record_error(UtmforgeError::Cancelled);
                metrics.halted_at = Some(name);
                break;
            }

            let step_begin = Instant::now();
            let action = run_step(step.as_mut(), state, cancel).await;

            if action == StepAction::Halt && state.error().is_none() {
                state.record_error(UtmforgeError::Internal(format!(
                    "step {} halted without recording an error",
                    name
                )));
            }

            metrics.steps.push(StepMetrics {
                name: name.clone(),
                action,
                duration_ms: step_begin.elapsed().as_millis(),
            });
            ran.push(step);

            if action == StepAction::Halt {
                metrics.halted_at = Some(name);
                break;
            }
        }

        for mut step in ran.into_iter().rev() {
            let name = step.name().to_string();
            tracing::debug!(step = %name, "Cleaning up step");
            if let Err(e) = step.cleanup(state).await {
                tracing::warn!(step = %name, "Cleanup failed: {}", e);
                metrics.cleanup_failures.push(CleanupFailure {
                    step: name.clone(),
                    message: e.to_string(),
                });
            }
            metrics.cleaned_up.push(name);
        }

        metrics.total_duration_ms = total_start.elapsed().as_millis();
        metrics
    }
}

/// Run one step to completion, treating panics as a halt.
///
/// The run future is never dropped mid-flight: a driver call that already
/// changed the VM must report back so the step can undo it. Steps observe
/// `cancel` between such calls; a step that returns after the token fired
/// without recording an error is halted with `Cancelled`.
async fn run_step(
    step: &mut dyn super::step::BuildStep,
    state: &mut StateBag,
    cancel: &CancellationToken,
) -> StepAction {
    let name = step.name().to_string();

    match AssertUnwindSafe(step.run(state, cancel)).catch_unwind().await {
        Ok(action) => {
            if cancel.is_cancelled() && state.error().is_none() {
                tracing::info!(step = %name, "Build cancelled during step");
                state.record_error(UtmforgeError::Cancelled);
                return StepAction::Halt;
            }
            action
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            let err = UtmforgeError::Internal(format!("step {} panicked: {}", name, message));
            log_step_error(state, &name, &err);
            state.record_error(err);
            StepAction::Halt
        }
    }
}
