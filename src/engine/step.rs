use std::fmt;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::task::{Task, TaskFailure, TaskStage};
use crate::error::AccountError;

/// A workflow's substage enum.
///
/// `INITIAL` is the first handler to run. `SUCCESS` and `ERROR` are marker
/// substages a task rests on once terminal; no handler runs for them.
pub trait SubStage:
    Copy + Eq + fmt::Debug + fmt::Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const INITIAL: Self;
    const SUCCESS: Self;
    const ERROR: Self;

    fn is_marker(self) -> bool {
        self == Self::SUCCESS || self == Self::ERROR
    }
}

/// What a substage handler asks the engine to do next.
#[derive(Debug)]
pub enum Step<S> {
    Advance(S),
    Fail(AccountError),
    Finish,
}

/// The result of applying a [`Step`] to a task.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition<S> {
    /// Run the handler of this substage next.
    Next(S),
    Finished,
    Failed(TaskFailure),
}

/// CREATED → STARTED. Anything else is left untouched.
pub fn start<S>(task: &mut Task<S>) {
    if task.stage == TaskStage::Created {
        task.stage = TaskStage::Started;
        task.updated_at = Utc::now();
    }
}

/// Moves a non-terminal task to CANCELLED. Returns false if it was already
/// terminal.
pub fn cancel<S>(task: &mut Task<S>) -> bool {
    if task.is_terminal() {
        return false;
    }
    task.stage = TaskStage::Cancelled;
    task.updated_at = Utc::now();
    true
}

/// Applies the outcome of the current substage's handler to `task`.
///
/// - `Advance(next)` records the current substage and moves to `next`;
///   advancing into a substage that already ran fails the task, so each
///   handler runs at most once per task.
/// - `Fail(err)` records the current substage as `failed_at` and rests the
///   task on `ERROR`.
/// - `Finish` rests the task on `SUCCESS`.
///
/// A terminal task is immutable: applying any step returns its existing
/// outcome.
pub fn apply<S: SubStage>(task: &mut Task<S>, step: Step<S>) -> Transition<S> {
    match task.stage {
        TaskStage::Finished => return Transition::Finished,
        TaskStage::Failed | TaskStage::Cancelled => {
            return Transition::Failed(task.failure.clone().unwrap_or_else(cancelled_failure));
        }
        TaskStage::Created | TaskStage::Started => {}
    }

    let current = task.sub_stage;
    task.stage_history.push(current);
    task.updated_at = Utc::now();

    let step = match step {
        Step::Advance(next) if next == S::SUCCESS => Step::Finish,
        Step::Advance(next) if next == S::ERROR || task.stage_history.contains(&next) => {
            Step::Fail(AccountError::InvalidRequest(format!(
                "illegal substage transition {current} -> {next}"
            )))
        }
        other => other,
    };

    match step {
        Step::Advance(next) => {
            task.stage = TaskStage::Started;
            task.sub_stage = next;
            Transition::Next(next)
        }
        Step::Finish => {
            task.stage = TaskStage::Finished;
            task.sub_stage = S::SUCCESS;
            Transition::Finished
        }
        Step::Fail(err) => {
            let failure = TaskFailure::from(&err);
            task.stage = TaskStage::Failed;
            task.failed_at = Some(current);
            task.sub_stage = S::ERROR;
            task.failure = Some(failure.clone());
            Transition::Failed(failure)
        }
    }
}

fn cancelled_failure() -> TaskFailure {
    TaskFailure::from(&AccountError::InvalidRequest("task was cancelled".into()))
}
