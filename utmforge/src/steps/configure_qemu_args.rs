//! Step: inject user QEMU arguments into the VM definition.
//!
//! The underlying automation command replaces the VM's additional arguments
//! instead of merging them, so the joined arguments are published under
//! `userQemuArgs` for later steps that need to reissue the command.

use crate::pipeline::{BuildStep, StateBag, StepAction, halt, step_start};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use utmforge_shared::constants::{scripts, state_keys};
use utmforge_shared::errors::UtmforgeResult;

const NAME: &str = "configure_qemu_args";

pub struct ConfigureQemuArgsStep {
    qemu_args: Vec<Vec<String>>,
}

impl ConfigureQemuArgsStep {
    pub fn new(qemu_args: Vec<Vec<String>>) -> Self {
        Self { qemu_args }
    }
}

#[async_trait]
impl BuildStep for ConfigureQemuArgsStep {
    async fn run(&mut self, state: &mut StateBag, _cancel: &CancellationToken) -> StepAction {
        step_start(state, NAME);

        if self.qemu_args.is_empty() {
            return StepAction::Continue;
        }

        let joined = join_arg_groups(&self.qemu_args);
        if let Err(e) = add_qemu_args(state, &joined).await {
            return halt(state, NAME, e.context("error adding user QEMU additional arguments"));
        }

        tracing::info!(count = joined.len(), "Configured QEMU additional arguments");
        state.put(state_keys::USER_QEMU_ARGS, joined);
        StepAction::Continue
    }

    async fn cleanup(&mut self, _state: &mut StateBag) -> UtmforgeResult<()> {
        // Injected arguments belong to the finished image.
        Ok(())
    }

    fn name(&self) -> &str {
        NAME
    }
}

/// Join every argument group into one space-separated string, keeping order.
pub fn join_arg_groups(groups: &[Vec<String>]) -> Vec<String> {
    groups.iter().map(|group| group.join(" ")).collect()
}

/// User arguments recorded in `state` followed by `extra`.
///
/// For steps that reissue `add_qemu_additional_args` and would otherwise
/// drop the user's arguments.
pub fn merged_qemu_args(state: &StateBag, extra: &[String]) -> Vec<String> {
    let mut args = state
        .get_ok::<Vec<String>>(state_keys::USER_QEMU_ARGS)
        .cloned()
        .unwrap_or_default();
    args.extend(extra.iter().cloned());
    args
}

async fn add_qemu_args(state: &StateBag, joined: &[String]) -> UtmforgeResult<()> {
    let driver = state.driver()?;
    let vm_id = state.vm_id()?;

    let mut command = Vec::with_capacity(joined.len() + 3);
    command.push(scripts::ADD_QEMU_ADDITIONAL_ARGS.to_string());
    command.push(vm_id);
    command.push("--args".to_string());
    command.extend(joined.iter().cloned());

    driver.execute_script(&command).await?;
    Ok(())
}
