use crate::pipeline::StepAction;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct StepMetrics {
    pub name: String,
    pub action: StepAction,
    pub duration_ms: u128,
}

/// A cleanup that reported an error during unwind.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupFailure {
    pub step: String,
    pub message: String,
}

/// Timing and outcome of one pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineMetrics {
    pub total_duration_ms: u128,
    /// Steps whose `run` was invoked, in execution order.
    pub steps: Vec<StepMetrics>,
    /// Steps whose `cleanup` was invoked, in invocation order.
    pub cleaned_up: Vec<String>,
    pub cleanup_failures: Vec<CleanupFailure>,
    /// Step at which forward progress stopped, if any.
    pub halted_at: Option<String>,
}

impl PipelineMetrics {
    pub fn step_duration_ms(&self, name: &str) -> Option<u128> {
        self.steps
            .iter()
            .find(|step| step.name == name)
            .map(|step| step.duration_ms)
    }

    pub fn halted(&self) -> bool {
        self.halted_at.is_some()
    }
}
