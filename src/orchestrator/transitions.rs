//! Which prior states each stage call may start from.
//!
//! A stage may start when the run sits in one of its prior states and that
//! prior stage finished (has an `ok` entry). A stage whose own state is
//! current but which never recorded `ok` was interrupted and may be
//! re-entered.

use crate::domain::{EntryStatus, RunHistory, RunState, StageName};
use crate::error::{Result, WorkflowError};

/// The stage that moves a run into `state`, if any
fn stage_of(state: RunState) -> Option<StageName> {
    match state {
        RunState::ReadingSource => Some(StageName::ReadingSource),
        RunState::GeneratingContent => Some(StageName::GeneratingContent),
        RunState::GeneratingImage => Some(StageName::GeneratingImage),
        RunState::Drafting => Some(StageName::Drafting),
        RunState::Publishing => Some(StageName::Publishing),
        RunState::Engaging => Some(StageName::Engaging),
        RunState::Created | RunState::Completed | RunState::Failed | RunState::PartiallyFailed => None,
    }
}

/// True once the stage for `state` has recorded a run-level `ok` entry
/// after it was last entered
fn state_finished(history: &RunHistory, state: RunState) -> bool {
    match stage_of(state) {
        None => true,
        Some(stage) => history
            .entries
            .iter()
            .rev()
            .find(|e| e.stage == stage && e.target.is_none() && e.status != EntryStatus::Retrying)
            .is_some_and(|e| e.status == EntryStatus::Ok),
    }
}

/// Position of a state along the pipeline
fn progress(state: RunState) -> u8 {
    match state {
        RunState::Created => 0,
        RunState::ReadingSource => 1,
        RunState::GeneratingContent => 2,
        RunState::GeneratingImage => 3,
        RunState::Drafting => 4,
        RunState::Publishing => 5,
        RunState::Engaging | RunState::Completed | RunState::PartiallyFailed => 6,
        RunState::Failed => u8::MAX,
    }
}

/// States a stage call may begin from
pub fn allowed_priors(stage: StageName, generate_image: bool, regenerate: bool) -> Vec<RunState> {
    match stage {
        StageName::ReadingSource => vec![RunState::Created],
        StageName::GeneratingContent if regenerate => vec![
            RunState::ReadingSource,
            RunState::GeneratingContent,
            RunState::GeneratingImage,
        ],
        StageName::GeneratingContent => vec![RunState::ReadingSource],
        StageName::GeneratingImage => vec![RunState::GeneratingContent],
        StageName::Drafting if generate_image => vec![RunState::GeneratingImage],
        StageName::Drafting => vec![RunState::GeneratingContent],
        StageName::Publishing => vec![RunState::Drafting],
        StageName::Engaging => vec![RunState::Engaging, RunState::Completed, RunState::PartiallyFailed],
        StageName::Created | StageName::Cancellation => Vec::new(),
    }
}

/// Validate that `stage` may start now
pub fn check(history: &RunHistory, stage: StageName, regenerate: bool) -> Result<()> {
    let run = &history.run;
    let invalid = || WorkflowError::InvalidTransition {
        run_id: run.id.clone(),
        stage,
        state: run.state,
    };

    if run.state.is_absorbing() {
        return Err(invalid());
    }

    // Interrupted stage: entered but never finished
    if stage.state() == Some(run.state) && !state_finished(history, run.state) {
        return Ok(());
    }

    let priors = allowed_priors(stage, run.options.generate_image, regenerate);
    if !priors.contains(&run.state) {
        return Err(invalid());
    }

    // Regeneration may also replace content whose image stage was interrupted
    let needs_finished = !(regenerate && stage == StageName::GeneratingContent);
    if needs_finished && !state_finished(history, run.state) {
        return Err(invalid());
    }
    Ok(())
}

/// Validate passing over a stage the run opted out of: the run must have
/// finished the stage before it, and must not have failed
pub fn check_skip(history: &RunHistory, stage: StageName) -> Result<()> {
    let run = &history.run;
    if run.state.is_absorbing() {
        return Err(WorkflowError::InvalidTransition {
            run_id: run.id.clone(),
            stage,
            state: run.state,
        });
    }
    let reached = allowed_priors(stage, run.options.generate_image, false)
        .into_iter()
        .any(|prior| progress(run.state) > progress(prior) || (run.state == prior && state_finished(history, prior)));
    if reached {
        Ok(())
    } else {
        Err(WorkflowError::InvalidTransition {
            run_id: run.id.clone(),
            stage,
            state: run.state,
        })
    }
}
