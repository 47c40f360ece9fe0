use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tracing::{debug, info};

use super::dismiss::{DismissConfig, DismissTimers};
use super::task::{Applied, Callback, Task, TaskId, TaskPatch, TaskView};

/// Ordered, read-only view of every tracked task (oldest first).
pub type Snapshot = Arc<Vec<Task>>;

/// Stamp of one `add`. Re-adding an id starts a new lifecycle, and writes
/// carrying an older stamp no longer land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Lifecycle(pub u64);

/// Keyed store of tasks shared by workflows and renderers.
///
/// Every operation is a synchronous merge under a short lock followed by a
/// snapshot broadcast. The lock is never held across an `.await` or while a
/// task callback runs, so `on_cancel` handlers may call back into the
/// registry.
#[derive(Clone)]
pub struct TaskRegistry {
    shared: Arc<Shared>,
}

/// Non-owning handle, for callbacks stored inside the registry's own tasks.
#[derive(Clone)]
pub struct WeakRegistry {
    shared: Weak<Shared>,
}

impl WeakRegistry {
    pub fn upgrade(&self) -> Option<TaskRegistry> {
        self.shared.upgrade().map(|shared| TaskRegistry { shared })
    }
}

struct Shared {
    state: Mutex<Inner>,
    tx: watch::Sender<Snapshot>,
    dismiss: DismissConfig,
    next_lifecycle: AtomicU64,
}

struct Inner {
    tasks: Vec<Task>,
    lifecycles: HashMap<TaskId, Lifecycle>,
    timers: DismissTimers,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::with_config(DismissConfig::default())
    }

    pub fn with_config(dismiss: DismissConfig) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(Vec::new()));
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(Inner {
                    tasks: Vec::new(),
                    lifecycles: HashMap::new(),
                    timers: DismissTimers::new(),
                }),
                tx,
                dismiss,
                next_lifecycle: AtomicU64::new(1),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn dismiss_config(&self) -> DismissConfig {
        self.shared.dismiss
    }

    /// Reserve a lifecycle stamp ahead of [`add_in`](TaskRegistry::add_in),
    /// for callers that must capture it before the task exists.
    pub fn begin_lifecycle(&self) -> Lifecycle {
        Lifecycle(self.shared.next_lifecycle.fetch_add(1, Ordering::Relaxed))
    }

    /// Insert or fully replace the entry for `task.id`.
    ///
    /// A replaced entry starts a fresh lifecycle: its pending dismiss timer is
    /// dropped, it moves to the newest position, and a still-running
    /// predecessor is cancelled.
    pub fn add(&self, task: Task) -> Lifecycle {
        let lifecycle = self.begin_lifecycle();
        self.add_in(lifecycle, task);
        lifecycle
    }

    pub fn add_in(&self, lifecycle: Lifecycle, mut task: Task) {
        task.normalize();
        let superseded: Option<Callback> = {
            let mut inner = self.lock();
            inner.timers.cancel(&task.id);
            let replaced = match inner.tasks.iter().position(|t| t.id == task.id) {
                Some(pos) => {
                    debug!("Task {} replaced", task.id);
                    Some(inner.tasks.remove(pos))
                }
                None => None,
            };
            info!("Task {} added ({:?}): {}", task.id, task.status, task.title);
            inner.lifecycles.insert(task.id.clone(), lifecycle);
            if task.is_terminal() {
                self.arm_dismiss(&mut inner, &task);
            }
            inner.tasks.push(task);
            self.publish(&inner);
            replaced.and_then(|old| old.on_cancel)
        };

        // Old handler writes under its own stamp, so it only trips its token.
        if let Some(on_cancel) = superseded {
            on_cancel();
        }
    }

    /// Merge `patch` into an existing entry.
    ///
    /// Absent ids are a silent no-op: a stale workflow must never resurrect a
    /// removed task. Terminal tasks ignore the patch. Returns whether the
    /// entry changed.
    pub fn update(&self, id: &TaskId, patch: TaskPatch) -> bool {
        self.merge(id, None, patch)
    }

    /// [`update`](TaskRegistry::update) restricted to one lifecycle. A
    /// workflow whose task was replaced or removed writes nothing.
    pub fn update_in(&self, id: &TaskId, lifecycle: Lifecycle, patch: TaskPatch) -> bool {
        self.merge(id, Some(lifecycle), patch)
    }

    pub fn lifecycle(&self, id: &TaskId) -> Option<Lifecycle> {
        self.lock().lifecycles.get(id).copied()
    }

    fn merge(&self, id: &TaskId, lifecycle: Option<Lifecycle>, patch: TaskPatch) -> bool {
        let mut inner = self.lock();
        let Some(pos) = inner.tasks.iter().position(|t| &t.id == id) else {
            debug!("Update for absent task {} ignored", id);
            return false;
        };
        if let Some(expected) = lifecycle {
            if inner.lifecycles.get(id) != Some(&expected) {
                debug!("Update for superseded lifecycle {:?} of {} ignored", expected, id);
                return false;
            }
        }

        match inner.tasks[pos].apply(patch) {
            Applied::Rejected => {
                debug!("Update for terminal task {} ignored", id);
                false
            }
            Applied::Merged => {
                self.publish(&inner);
                true
            }
            Applied::Terminal => {
                let task = inner.tasks[pos].clone();
                info!("Task {} finished ({:?}): {}", id, task.status, task.message);
                self.arm_dismiss(&mut inner, &task);
                self.publish(&inner);
                true
            }
        }
    }

    /// Delete the entry if present. Idempotent.
    pub fn remove(&self, id: &TaskId) -> bool {
        let mut inner = self.lock();
        inner.timers.cancel(id);
        let Some(pos) = inner.tasks.iter().position(|t| &t.id == id) else {
            return false;
        };
        inner.tasks.remove(pos);
        inner.lifecycles.remove(id);
        debug!("Task {} removed", id);
        self.publish(&inner);
        true
    }

    /// Explicit user dismissal.
    pub fn dismiss(&self, id: &TaskId) -> bool {
        self.remove(id)
    }

    /// Invoke the task's cancel handler, if cancellation is still offered.
    pub fn cancel(&self, id: &TaskId) -> bool {
        let handler = {
            let inner = self.lock();
            inner.tasks.iter().find(|t| &t.id == id).and_then(|t| t.on_cancel.clone())
        };
        match handler {
            Some(on_cancel) => {
                info!("Cancel requested for {}", id);
                on_cancel();
                true
            }
            None => false,
        }
    }

    /// Invoke the task's action (e.g. retry), if it carries one.
    pub fn trigger_action(&self, id: &TaskId) -> bool {
        let action = {
            let inner = self.lock();
            inner.tasks.iter().find(|t| &t.id == id).and_then(|t| t.action.clone())
        };
        match action {
            Some(action) => {
                info!("Action '{}' triggered for {}", action.label, id);
                (action.callback)();
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.tx.borrow().clone()
    }

    pub fn views(&self) -> Vec<TaskView> {
        self.snapshot().iter().map(Task::view).collect()
    }

    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.lock().tasks.iter().find(|t| &t.id == id).cloned()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.lock().tasks.iter().any(|t| &t.id == id)
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_pending_dismiss(&self, id: &TaskId) -> bool {
        self.lock().timers.is_pending(id)
    }

    /// Receiver that observes a fresh snapshot after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.shared.tx.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        self.shared.tx.send_replace(Arc::new(inner.tasks.clone()));
    }

    fn arm_dismiss(&self, inner: &mut Inner, task: &Task) {
        let Some(delay) = self.shared.dismiss.delay_for(task) else {
            inner.timers.cancel(&task.id);
            return;
        };
        let weak = self.downgrade();
        let id = task.id.clone();
        inner.timers.arm(&task.id, delay, move |seq| {
            if let Some(registry) = weak.upgrade() {
                registry.expire(&id, seq);
            }
        });
    }

    /// Timer callback: remove only if `seq` is still the live timer for `id`.
    fn expire(&self, id: &TaskId, seq: u64) {
        let mut inner = self.lock();
        if !inner.timers.take_if_current(id, seq) {
            return;
        }
        if let Some(pos) = inner.tasks.iter().position(|t| &t.id == id) {
            inner.tasks.remove(pos);
            inner.lifecycles.remove(id);
            info!("Task {} auto-dismissed", id);
            self.publish(&inner);
        }
    }
}
