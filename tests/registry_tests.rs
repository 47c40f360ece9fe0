use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use taskdeck::kernel::registry::TaskRegistry;
use taskdeck::kernel::task::{Task, TaskId, TaskPatch, TaskStatus};

fn id(s: &str) -> TaskId {
    TaskId::from(s)
}

#[tokio::test]
async fn test_remove_missing_is_noop() {
    let registry = TaskRegistry::new();

    assert!(!registry.remove(&id("ghost")));
    assert!(registry.is_empty());
    assert!(registry.snapshot().is_empty());
}

#[tokio::test]
async fn test_update_after_remove_does_not_resurrect() {
    let registry = TaskRegistry::new();
    registry.add(Task::loading("x", "Export", "Starting"));
    assert!(registry.remove(&id("x")));

    let changed = registry.update(&id("x"), TaskPatch::new().progress(50));

    assert!(!changed);
    assert!(!registry.contains(&id("x")), "Stale update must not create an entry");
    assert!(registry.get(&id("missing")).is_none());
}

#[tokio::test]
async fn test_readd_replaces_and_moves_to_newest() {
    let registry = TaskRegistry::new();
    registry.add(Task::loading("x", "First", "one"));
    registry.add(Task::loading("y", "Other", "two"));
    registry.add(Task::loading("x", "Second", "three").with_progress(20));

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.len(), 2);
    let ids: Vec<&str> = snapshot.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["y", "x"]);

    let x = registry.get(&id("x")).expect("x present");
    assert_eq!(x.title, "Second");
    assert_eq!(x.message, "three");
    assert_eq!(x.progress, Some(20));
}

#[tokio::test]
async fn test_terminal_task_ignores_updates() {
    let registry = TaskRegistry::new();
    registry.add(Task::loading("t", "Export", "Starting"));
    assert!(registry.update(&id("t"), TaskPatch::new().status(TaskStatus::Error).progress(100).message("boom")));

    let changed = registry.update(&id("t"), TaskPatch::new().status(TaskStatus::Success).progress(10));

    assert!(!changed);
    let t = registry.get(&id("t")).expect("t present");
    assert_eq!(t.status, TaskStatus::Error);
    assert_eq!(t.progress, Some(100));
    assert_eq!(t.message, "boom");
}

#[tokio::test]
async fn test_subscribers_see_each_mutation() {
    let registry = TaskRegistry::new();
    let mut rx = registry.subscribe();

    registry.add(Task::loading("t", "Upload", "Starting"));
    assert!(rx.has_changed().expect("sender alive"));
    assert_eq!(rx.borrow_and_update().len(), 1);

    // A no-op does not notify.
    registry.update(&id("nope"), TaskPatch::step(10, "x"));
    assert!(!rx.has_changed().expect("sender alive"));

    registry.update(&id("t"), TaskPatch::step(40, "Uploading"));
    assert!(rx.has_changed().expect("sender alive"));
    assert_eq!(rx.borrow_and_update()[0].progress, Some(40));

    registry.remove(&id("t"));
    assert!(rx.borrow_and_update().is_empty());
}

#[tokio::test]
async fn test_cancel_runs_handler_outside_lock() {
    let registry = TaskRegistry::new();
    let inner = registry.clone();
    registry.add(Task::loading("t", "Upload", "Starting").with_cancel(move || {
        // Re-entering the registry from the handler must not deadlock.
        inner.update(&TaskId::from("t"), TaskPatch::new().status(TaskStatus::Info).message("Upload cancelled"));
    }));

    assert!(registry.cancel(&id("t")));
    let t = registry.get(&id("t")).expect("t present");
    assert_eq!(t.status, TaskStatus::Info);
    assert!(!t.view().cancellable, "Cancel is withdrawn once terminal");

    // Nothing left to cancel.
    assert!(!registry.cancel(&id("t")));
    assert!(!registry.cancel(&id("ghost")));
}

#[tokio::test]
async fn test_views_are_serializable() {
    let registry = TaskRegistry::new();
    registry.add(Task::loading("t", "Export", "Fetching").with_progress_label("Exporting...").with_cancel(|| {}));

    let json = serde_json::to_value(registry.views()).expect("views serialize");

    assert_eq!(json[0]["id"], "t");
    assert_eq!(json[0]["status"], "Loading");
    assert_eq!(json[0]["progress"], 0);
    assert_eq!(json[0]["cancellable"], true);
    assert_eq!(json[0]["progress_label"], "Exporting...");
}

#[tokio::test]
async fn test_add_normalizes_hand_built_tasks() {
    let registry = TaskRegistry::new();
    let mut task = Task::new("n", "Saved", "Profile saved", TaskStatus::Success).with_cancel(|| {});
    task.progress = Some(250);

    registry.add(task);

    let n = registry.get(&id("n")).expect("n present");
    assert_eq!(n.progress, Some(100));
    assert!(n.on_cancel.is_none(), "Terminal tasks offer no cancel");
    assert!(!registry.cancel(&id("n")));
}

#[tokio::test]
async fn test_stale_lifecycle_writes_are_dropped() {
    let registry = TaskRegistry::new();
    let first = registry.add(Task::loading("x", "First", "one"));
    let second = registry.add(Task::loading("x", "Second", "two"));
    assert_ne!(first, second);

    assert!(!registry.update_in(&id("x"), first, TaskPatch::new().status(TaskStatus::Success)));
    assert_eq!(registry.get(&id("x")).expect("x present").status, TaskStatus::Loading);

    assert!(registry.update_in(&id("x"), second, TaskPatch::step(40, "Working")));
    assert_eq!(registry.get(&id("x")).expect("x present").progress, Some(40));

    registry.remove(&id("x"));
    assert_eq!(registry.lifecycle(&id("x")), None);
}

#[tokio::test]
async fn test_readd_cancels_running_predecessor() {
    let registry = TaskRegistry::new();
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();
    registry.add(Task::loading("x", "Old", "running").with_cancel(move || flag.store(true, Ordering::SeqCst)));

    registry.add(Task::loading("x", "New", "running"));

    assert!(cancelled.load(Ordering::SeqCst), "Old lifecycle was told to stop");
    assert_eq!(registry.get(&id("x")).expect("x present").title, "New");
}
