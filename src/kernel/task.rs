use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// UI-facing callback (cancel control, retry button).
pub type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    /// `<operation>-<unix millis>-<8 hex>`. The uuid suffix keeps two
    /// invocations inside the same millisecond apart.
    pub fn generate(operation: &str) -> Self {
        let ts_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let salt = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}-{}", operation, ts_ms, &salt[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Loading,
    Success,
    Error,
    /// Cancellation and purely informational endings.
    Info,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Loading)
    }
}

/// Retry / follow-up affordance shown on a terminal error.
#[derive(Clone)]
pub struct TaskAction {
    pub label: String,
    pub callback: Callback,
}

impl TaskAction {
    pub fn new(label: impl Into<String>, callback: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            label: label.into(),
            callback: Arc::new(callback),
        }
    }
}

impl fmt::Debug for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskAction").field("label", &self.label).finish_non_exhaustive()
    }
}

/// Snapshot record of one tracked operation.
#[derive(Clone)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub message: String,
    pub status: TaskStatus,
    pub progress: Option<u8>,
    pub progress_label: Option<String>,
    /// Present only while cancellation is offered.
    pub on_cancel: Option<Callback>,
    pub action: Option<TaskAction>,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, title: impl Into<String>, message: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            message: message.into(),
            status,
            progress: None,
            progress_label: None,
            on_cancel: None,
            action: None,
        }
    }

    /// Running task at progress 0.
    pub fn loading(id: impl Into<TaskId>, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(id, title, message, TaskStatus::Loading).with_progress(0)
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn with_progress_label(mut self, label: impl Into<String>) -> Self {
        self.progress_label = Some(label.into());
        self
    }

    pub fn with_cancel(mut self, on_cancel: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_cancel = Some(Arc::new(on_cancel));
        self
    }

    pub fn with_action(mut self, action: TaskAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Bring a hand-built task in line with the merge rules: progress within
    /// 0..=100, and no cancel offer once terminal.
    pub fn normalize(&mut self) {
        if let Some(p) = self.progress {
            self.progress = Some(p.min(100));
        }
        if self.is_terminal() {
            self.on_cancel = None;
        }
    }

    /// Merge a patch in place.
    ///
    /// A terminal task rejects every patch. Progress is clamped to 0..=100 and
    /// never moves backwards. Reaching a terminal status withdraws `on_cancel`.
    pub fn apply(&mut self, patch: TaskPatch) -> Applied {
        if self.is_terminal() {
            return Applied::Rejected;
        }

        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(message) = patch.message {
            self.message = message;
        }
        if let Some(label) = patch.progress_label {
            self.progress_label = Some(label);
        }
        if let Some(p) = patch.progress {
            let p = p.min(100);
            self.progress = Some(match self.progress {
                Some(current) => current.max(p),
                None => p,
            });
        }
        if let Some(action) = patch.action {
            self.action = Some(action);
        }

        match patch.status {
            Some(status) if status.is_terminal() => {
                self.status = status;
                self.on_cancel = None;
                Applied::Terminal
            }
            Some(status) => {
                self.status = status;
                Applied::Merged
            }
            None => Applied::Merged,
        }
    }

    pub fn view(&self) -> TaskView {
        TaskView {
            id: self.id.clone(),
            title: self.title.clone(),
            message: self.message.clone(),
            status: self.status,
            progress: self.progress,
            progress_label: self.progress_label.clone(),
            cancellable: self.on_cancel.is_some(),
            action_label: self.action.as_ref().map(|a| a.label.clone()),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("message", &self.message)
            .field("status", &self.status)
            .field("progress", &self.progress)
            .field("progress_label", &self.progress_label)
            .field("cancellable", &self.on_cancel.is_some())
            .field("action", &self.action)
            .finish()
    }
}

/// Result of merging a patch into a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Merged,
    /// The patch moved the task into a terminal status.
    Terminal,
    /// Task was already terminal; nothing changed.
    Rejected,
}

/// Partial fields for `TaskRegistry::update`.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub message: Option<String>,
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub progress_label: Option<String>,
    pub action: Option<TaskAction>,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage step: new status line and progress target.
    pub fn step(progress: u8, message: impl Into<String>) -> Self {
        Self::new().progress(progress).message(message)
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn progress_label(mut self, label: impl Into<String>) -> Self {
        self.progress_label = Some(label.into());
        self
    }

    pub fn action(mut self, action: TaskAction) -> Self {
        self.action = Some(action);
        self
    }
}

/// Closure-free render model of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskView {
    pub id: TaskId,
    pub title: String,
    pub message: String,
    pub status: TaskStatus,
    pub progress: Option<u8>,
    pub progress_label: Option<String>,
    pub cancellable: bool,
    pub action_label: Option<String>,
}
