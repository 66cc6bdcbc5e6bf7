//! Step contract for pipeline execution.

use super::state::StateBag;
use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use utmforge_shared::UtmforgeError;
use utmforge_shared::errors::UtmforgeResult;

/// Signal returned by [`BuildStep::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    /// Advance to the next step.
    Continue,
    /// Stop forward progress and unwind.
    Halt,
}

/// Trait for steps that can be executed in a pipeline.
///
/// Steps share a single [`StateBag`] and are always run one at a time.
/// A step halts by recording exactly one error in the bag (see [`halt`]) and
/// returning [`StepAction::Halt`].
#[async_trait]
pub trait BuildStep: Send {
    /// Perform the step's provisioning.
    async fn run(&mut self, state: &mut StateBag, cancel: &CancellationToken) -> StepAction;

    /// Best-effort undo. Called during unwind for every step whose `run` was
    /// invoked. Errors are reported by the runner and never fail the build.
    async fn cleanup(&mut self, state: &mut StateBag) -> UtmforgeResult<()>;

    /// Get human-readable step name for logging.
    fn name(&self) -> &str;
}

pub type BoxedStep = Box<dyn BuildStep>;

/// Record `err` as the build error and return [`StepAction::Halt`].
pub fn halt(state: &mut StateBag, step: &str, err: UtmforgeError) -> StepAction {
    log_step_error(state, step, &err);
    state.record_error(err);
    StepAction::Halt
}

pub(crate) fn log_step_error(state: &StateBag, step: &str, err: &UtmforgeError) {
    let vm_id = state.vm_id().unwrap_or_default();
    tracing::error!(vm_id = %vm_id, step = %step, "Step failed: {}", err);
}

pub(crate) fn step_start(state: &StateBag, step: &str) {
    let vm_id = state.vm_id().unwrap_or_default();
    tracing::debug!(vm_id = %vm_id, step = %step, "Executing step");
}
