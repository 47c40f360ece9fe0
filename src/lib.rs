pub mod kernel;
pub mod operations;
pub mod workflow;

pub use kernel::registry::{Snapshot, TaskRegistry};
pub use kernel::task::{Task, TaskAction, TaskId, TaskPatch, TaskStatus, TaskView};
pub use workflow::{Outcome, Workflow, WorkflowOptions};
