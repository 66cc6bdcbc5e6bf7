//! Step: detach the ISOs attached earlier in the build.
//!
//! Runs the commands published under `disk_unmount_commands`. Each entry is
//! dropped from the published table once its drive is detached, and the
//! `detached_isos` marker is set when the table is empty, so the attach
//! step's cleanup only replays what is still attached.

use super::attach_isos::UnmountCommands;
use crate::pipeline::{BuildStep, StateBag, StepAction, halt, step_start};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use utmforge_shared::constants::state_keys;
use utmforge_shared::errors::UtmforgeResult;

const NAME: &str = "detach_isos";

#[derive(Debug, Default)]
pub struct DetachIsosStep;

impl DetachIsosStep {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BuildStep for DetachIsosStep {
    async fn run(&mut self, state: &mut StateBag, _cancel: &CancellationToken) -> StepAction {
        step_start(state, NAME);

        let Some(mut pending) = state
            .get_ok::<UnmountCommands>(state_keys::DISK_UNMOUNT_COMMANDS)
            .cloned()
        else {
            return StepAction::Continue;
        };

        let driver = match state.driver() {
            Ok(driver) => driver,
            Err(e) => return halt(state, NAME, e),
        };

        while let Some((category, command)) = pending.pop_first() {
            tracing::info!(category = %category, "Detaching ISO");
            if let Err(e) = driver.execute_script(&command).await {
                pending.insert(category, command);
                state.put(state_keys::DISK_UNMOUNT_COMMANDS, pending);
                return halt(
                    state,
                    NAME,
                    e.context(format!("error detaching {} ISO", category)),
                );
            }
        }

        state.put(state_keys::DISK_UNMOUNT_COMMANDS, pending);
        state.put(state_keys::DETACHED_ISOS, ());
        StepAction::Continue
    }

    async fn cleanup(&mut self, _state: &mut StateBag) -> UtmforgeResult<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        NAME
    }
}
