use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, warn};

use crate::kernel::cancel::{cancel_handler, cancelled, capitalize, until_cancelled};
use crate::kernel::registry::{Lifecycle, TaskRegistry};
use crate::kernel::task::{Task, TaskAction, TaskId, TaskPatch, TaskStatus};

use super::batch::BatchReport;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

#[derive(Debug, Error)]
pub enum StageError {
    /// The token was observed tripped. Never surfaced as a task error.
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// How a workflow ended, as seen by the code that launched it.
/// The registry already carries the user-visible version of this.
#[derive(Debug)]
pub enum Outcome<T> {
    Completed(T),
    Cancelled,
    Failed(String),
}

impl<T> Outcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(v) => Some(v),
            _ => None,
        }
    }
}

/// Successful workflow result plus its summary line.
#[derive(Debug)]
pub struct Done<T> {
    pub value: T,
    pub message: String,
}

impl<T> Done<T> {
    pub fn new(value: T, message: impl Into<String>) -> Self {
        Self {
            value,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    /// Short operation name, used for the id prefix and the cancel message.
    pub operation: String,
    pub title: String,
    pub message: String,
    pub progress_label: Option<String>,
    pub cancellable: bool,
    /// Attached to the task on failure. Actionable errors do not auto-dismiss.
    pub retry: Option<TaskAction>,
}

impl WorkflowOptions {
    pub fn new(operation: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            title: title.into(),
            message: "Starting...".to_string(),
            progress_label: None,
            cancellable: false,
            retry: None,
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn progress_label(mut self, label: impl Into<String>) -> Self {
        self.progress_label = Some(label.into());
        self
    }

    pub fn cancellable(mut self) -> Self {
        self.cancellable = true;
        self
    }

    pub fn retry(mut self, action: TaskAction) -> Self {
        self.retry = Some(action);
        self
    }
}

/// Handle a workflow body uses to advance its task.
///
/// Every stage checks the token before publishing progress and again after
/// its side effect resolves. Once cancellation is observed the body gets
/// `StageError::Cancelled` and must stop. The token itself stays private:
/// only the task's cancel handler (or a replacing `add`) may trip it.
///
/// Writes are scoped to the lifecycle this workflow registered. A workflow
/// whose id was re-added counts as cancelled and cannot touch its successor.
#[derive(Clone)]
pub struct Stages {
    registry: TaskRegistry,
    id: TaskId,
    lifecycle: Lifecycle,
    token: CancellationToken,
}

impl Stages {
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Resolves once cancellation is requested.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The id now belongs to a newer `add`. A dismissed (absent) task does
    /// not count: the work carries on without a progress display.
    pub fn is_superseded(&self) -> bool {
        matches!(self.registry.lifecycle(&self.id), Some(current) if current != self.lifecycle)
    }

    pub fn checkpoint(&self) -> Result<(), StageError> {
        if self.token.is_cancelled() {
            debug!("Task {} observed cancellation", self.id);
            return Err(StageError::Cancelled);
        }
        if self.is_superseded() {
            debug!("Task {} lifecycle {:?} superseded", self.id, self.lifecycle);
            return Err(StageError::Cancelled);
        }
        Ok(())
    }

    /// Publish progress for a stage with no await of its own.
    pub fn report(&self, progress: u8, message: impl Into<String>) -> Result<(), StageError> {
        self.checkpoint()?;
        self.registry
            .update_in(&self.id, self.lifecycle, TaskPatch::step(progress, message));
        Ok(())
    }

    /// Run one stage: check, publish, await the side effect, check again.
    ///
    /// A result that arrives after cancellation is discarded, error or not.
    pub async fn stage<F, T, E>(&self, progress: u8, message: impl Into<String>, effect: F) -> Result<T, StageError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<StageError>,
    {
        self.report(progress, message)?;
        let out = effect.await;
        self.checkpoint()?;
        out.map_err(Into::into)
    }

    /// Like [`stage`](Stages::stage), but the side effect is dropped as soon as
    /// the token trips instead of running to completion.
    pub async fn stage_abortable<F, T, E>(
        &self,
        progress: u8,
        message: impl Into<String>,
        effect: F,
    ) -> Result<T, StageError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<StageError>,
    {
        self.report(progress, message)?;
        match until_cancelled(&self.token, effect).await {
            Some(out) => {
                self.checkpoint()?;
                out.map_err(Into::into)
            }
            None => {
                debug!("Task {} aborted in-flight stage", self.id);
                Err(StageError::Cancelled)
            }
        }
    }

    /// Process `items` one at a time, spreading progress over `from..to`.
    ///
    /// A failing item is counted and the batch moves on. Cancellation is
    /// checked before every item and aborts the rest of the batch; items
    /// already processed stay processed.
    pub async fn batch<I, F, Fut, D>(
        &self,
        items: I,
        from: u8,
        to: u8,
        mut describe: D,
        mut op: F,
    ) -> Result<BatchReport, StageError>
    where
        I: IntoIterator,
        I::IntoIter: ExactSizeIterator,
        F: FnMut(I::Item) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
        D: FnMut(usize, usize) -> String,
    {
        let items = items.into_iter();
        let total = items.len();
        let mut report = BatchReport::new(total);
        let span = to.saturating_sub(from) as usize;

        for (k, item) in items.enumerate() {
            let progress = from as usize + span * k / total.max(1);
            self.report(progress as u8, describe(k + 1, total))?;

            match op(item).await {
                Ok(()) => report.record_success(),
                Err(e) => {
                    warn!("Task {} item {}/{} failed: {:#}", self.id, k + 1, total, e);
                    report.record_failure(k, e.to_string());
                }
            }
        }

        self.checkpoint()?;
        Ok(report)
    }
}

/// One launched operation: a registered task, its token, and the body that
/// drives it.
pub struct Workflow {
    stages: Stages,
    operation: String,
    retry: Option<TaskAction>,
}

impl Workflow {
    /// Register a fresh `Loading` task at progress 0 with a new token.
    pub fn start(registry: &TaskRegistry, options: WorkflowOptions) -> Self {
        let id = TaskId::generate(&options.operation);
        Self::start_with_id(registry, id, options)
    }

    /// As [`start`](Workflow::start) with a caller-chosen id. Re-using an id
    /// replaces the old task and begins a new lifecycle.
    pub fn start_with_id(registry: &TaskRegistry, id: TaskId, options: WorkflowOptions) -> Self {
        let token = CancellationToken::new();
        let lifecycle = registry.begin_lifecycle();
        let mut task = Task::loading(id.clone(), options.title, options.message);
        if let Some(label) = options.progress_label {
            task = task.with_progress_label(label);
        }
        if options.cancellable {
            task = task.with_cancel(cancel_handler(registry, &id, lifecycle, &token, &options.operation));
        }
        registry.add_in(lifecycle, task);

        Self {
            stages: Stages {
                registry: registry.clone(),
                id,
                lifecycle,
                token,
            },
            operation: options.operation,
            retry: options.retry,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.stages.id
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.stages.lifecycle
    }

    pub fn is_cancelled(&self) -> bool {
        self.stages.is_cancelled()
    }

    /// Drive `body` to completion and translate its result into task state.
    /// Errors never escape: they become an `Error` task and `Outcome::Failed`.
    pub async fn run<T, F, Fut>(self, body: F) -> Outcome<T>
    where
        F: FnOnce(Stages) -> Fut,
        Fut: Future<Output = Result<Done<T>, StageError>>,
    {
        let result = body(self.stages.clone()).await;
        self.finish(result)
    }

    fn finish<T>(self, result: Result<Done<T>, StageError>) -> Outcome<T> {
        let Workflow {
            stages,
            operation,
            retry,
        } = self;

        let stopped = stages.token.is_cancelled() || stages.is_superseded();
        if stopped || matches!(result, Err(StageError::Cancelled)) {
            // Whatever the body produced, cancellation already won.
            if let Err(StageError::Failed(e)) = &result {
                debug!("Task {} failed after cancel, swallowed: {:#}", stages.id, e);
            }
            // Usually a no-op: the cancel handler got there first.
            stages
                .registry
                .update_in(&stages.id, stages.lifecycle, cancelled(&operation));
            return Outcome::Cancelled;
        }

        match result {
            Ok(done) => {
                let landed = stages.registry.update_in(
                    &stages.id,
                    stages.lifecycle,
                    TaskPatch::new()
                        .status(TaskStatus::Success)
                        .progress(100)
                        .message(done.message),
                );
                if !landed {
                    debug!("Task {} was dismissed before it finished", stages.id);
                }
                Outcome::Completed(done.value)
            }
            Err(StageError::Cancelled) => Outcome::Cancelled,
            Err(StageError::Failed(e)) => {
                warn!("Task {} failed: {:#}", stages.id, e);
                let message = format!("{} failed: {}", capitalize(&operation), e);
                let mut patch = TaskPatch::new()
                    .status(TaskStatus::Error)
                    .progress(100)
                    .message(message.clone());
                if let Some(action) = retry {
                    patch = patch.action(action);
                }
                stages.registry.update_in(&stages.id, stages.lifecycle, patch);
                Outcome::Failed(message)
            }
        }
    }
}

/// Spawn a re-launched workflow from a synchronous UI callback.
pub fn relaunch<T: Send + 'static>(fut: BoxFuture<T>) {
    match Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(fut);
        }
        Err(_) => warn!("No tokio runtime; relaunch dropped"),
    }
}
