//! Staged execution of long-running operations.
//!
//! A workflow registers a `Loading` task, advances it stage by stage while
//! honoring the cancellation token, and ends in exactly one terminal state.
//! Failures are contained here and turned into task state; they never
//! propagate to whatever triggered the operation.

pub mod batch;
pub mod runner;

pub use batch::BatchReport;
pub use runner::{relaunch, BoxFuture, Done, Outcome, StageError, Stages, Workflow, WorkflowOptions};
