//! Generic task engine.
//!
//! A workflow is a substage enum plus a handler. The engine creates the task
//! document, runs the handler of the current substage, applies the returned
//! [`Step`] through the pure [`step::apply`] transition, and publishes every
//! state of the task to subscribers.

mod runner;
pub mod step;
mod task;

pub use runner::{Workflow, WorkflowEngine};
pub use step::{Step, SubStage, Transition};
pub use task::{ExecutionMode, Task, TaskFailure, TaskStage};
