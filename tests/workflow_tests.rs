use anyhow::anyhow;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskdeck::kernel::registry::TaskRegistry;
use taskdeck::kernel::task::{TaskAction, TaskId, TaskStatus};
use taskdeck::workflow::{Done, Outcome, StageError, Workflow, WorkflowOptions};
use tokio::sync::oneshot;

async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    tokio::task::yield_now().await;
}

fn progress_of(registry: &TaskRegistry, id: &TaskId) -> Option<u8> {
    registry.get(id).and_then(|t| t.progress)
}

#[tokio::test(start_paused = true)]
async fn test_all_stages_succeed_then_dismiss() {
    let registry = TaskRegistry::new();
    let workflow = Workflow::start_with_id(&registry, TaskId::from("t1"), WorkflowOptions::new("export", "Exporting"));
    let id = workflow.id().clone();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let outcome = {
        let seen = seen.clone();
        let reg = registry.clone();
        workflow
            .run(|stages| async move {
                for (p, msg) in [(10u8, "Fetching"), (30, "Rendering"), (80, "Saving")] {
                    stages
                        .stage(p, msg, async {
                            seen.lock().unwrap().push(progress_of(&reg, &TaskId::from("t1")));
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            Ok::<_, anyhow::Error>(())
                        })
                        .await?;
                }
                Ok::<_, StageError>(Done::new(3, "Exported 3 records"))
            })
            .await
    };

    assert_eq!(outcome.completed(), Some(3));
    assert_eq!(*seen.lock().unwrap(), vec![Some(10), Some(30), Some(80)]);

    let t = registry.get(&id).expect("t1 present");
    assert_eq!(t.status, TaskStatus::Success);
    assert_eq!(t.progress, Some(100));
    assert_eq!(t.message, "Exported 3 records");

    advance(3_001).await;
    assert!(!registry.contains(&id));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_next_stage_skips_side_effect() {
    let registry = TaskRegistry::new();
    let workflow = Workflow::start(&registry, WorkflowOptions::new("export", "Exporting").cancellable());
    let id = workflow.id().clone();
    let saved = Arc::new(Mutex::new(false));

    let outcome = {
        let saved = saved.clone();
        let reg = registry.clone();
        let cancel_id = id.clone();
        workflow
            .run(|stages| async move {
                stages.stage(10, "Fetching", async { Ok::<_, anyhow::Error>(()) }).await?;
                stages
                    .stage(30, "Rendering", async {
                        // User clicks cancel while progress shows 30.
                        reg.cancel(&cancel_id);
                        Ok::<_, anyhow::Error>(())
                    })
                    .await?;
                stages
                    .stage(80, "Saving", async {
                        *saved.lock().unwrap() = true;
                        Ok::<_, anyhow::Error>(())
                    })
                    .await?;
                Ok::<_, StageError>(Done::new((), "Exported"))
            })
            .await
    };

    assert!(outcome.is_cancelled());
    assert!(!*saved.lock().unwrap(), "No side effect after cancellation");

    let t = registry.get(&id).expect("task present");
    assert_eq!(t.status, TaskStatus::Info);
    assert_eq!(t.progress, Some(100));
    assert_eq!(t.title, "Cancelled");
    assert_eq!(t.message, "Export cancelled");
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_is_final_while_stage_in_flight() {
    for late_result_ok in [true, false] {
        let registry = TaskRegistry::new();
        let workflow = Workflow::start(&registry, WorkflowOptions::new("upload", "Uploading").cancellable());
        let id = workflow.id().clone();
        let (release, gate) = oneshot::channel::<bool>();

        let handle = tokio::spawn(workflow.run(|stages| async move {
            stages
                .stage(30, "Uploading", async move {
                    match gate.await {
                        Ok(true) => Ok(()),
                        _ => Err(anyhow!("connection reset")),
                    }
                })
                .await?;
            Ok::<_, StageError>(Done::new((), "Uploaded"))
        }));

        advance(10).await;
        assert_eq!(progress_of(&registry, &id), Some(30));
        assert!(registry.cancel(&id));

        // The in-flight stage resolves after the cancel, either way.
        let _ = release.send(late_result_ok);
        let outcome = handle.await.expect("workflow task");

        assert!(outcome.is_cancelled());
        let t = registry.get(&id).expect("task present");
        assert_eq!(t.status, TaskStatus::Info, "late result must not overwrite cancellation");
        assert_eq!(t.message, "Upload cancelled");
    }
}

#[tokio::test(start_paused = true)]
async fn test_abortable_stage_drops_in_flight_effect() {
    let registry = TaskRegistry::new();
    let workflow = Workflow::start(&registry, WorkflowOptions::new("upload", "Uploading").cancellable());
    let id = workflow.id().clone();
    let finished = Arc::new(Mutex::new(false));

    let handle = {
        let finished = finished.clone();
        tokio::spawn(workflow.run(|stages| async move {
            stages
                .stage_abortable(30, "Uploading", async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    *finished.lock().unwrap() = true;
                    Ok::<_, anyhow::Error>(())
                })
                .await?;
            Ok::<_, StageError>(Done::new((), "Uploaded"))
        }))
    };

    advance(100).await;
    registry.cancel(&id);
    let outcome = handle.await.expect("workflow task");

    assert!(outcome.is_cancelled());
    advance(120_000).await;
    assert!(!*finished.lock().unwrap(), "Transfer was dropped, not completed");
}

#[tokio::test(start_paused = true)]
async fn test_stage_failure_becomes_error_task() {
    let registry = TaskRegistry::new();
    let workflow = Workflow::start(&registry, WorkflowOptions::new("export", "Exporting").cancellable());
    let id = workflow.id().clone();

    let outcome = workflow
        .run(|stages| async move {
            stages.stage(10, "Fetching", async { Err::<(), _>(anyhow!("backend unavailable")) }).await?;
            Ok::<_, StageError>(Done::new((), "Exported"))
        })
        .await;

    match outcome {
        Outcome::Failed(message) => assert_eq!(message, "Export failed: backend unavailable"),
        other => panic!("expected failure, got {:?}", other),
    }
    let t = registry.get(&id).expect("task present");
    assert_eq!(t.status, TaskStatus::Error);
    assert_eq!(t.progress, Some(100));
    assert!(t.on_cancel.is_none());

    advance(4_000).await;
    assert!(registry.contains(&id), "Errors linger 5000ms");
    advance(1_100).await;
    assert!(!registry.contains(&id));
}

#[tokio::test(start_paused = true)]
async fn test_retry_action_attached_to_failure() {
    let registry = TaskRegistry::new();
    let retried = Arc::new(Mutex::new(0));
    let action = {
        let retried = retried.clone();
        TaskAction::new("Retry", move || *retried.lock().unwrap() += 1)
    };
    let workflow = Workflow::start(&registry, WorkflowOptions::new("export", "Exporting").retry(action));
    let id = workflow.id().clone();

    let outcome = workflow
        .run(|_stages| async move { Err::<Done<()>, _>(StageError::Failed(anyhow!("disk full"))) })
        .await;

    assert!(!outcome.is_completed());
    let t = registry.get(&id).expect("task present");
    assert_eq!(t.view().action_label.as_deref(), Some("Retry"));
    assert!(!registry.has_pending_dismiss(&id));

    assert!(registry.trigger_action(&id));
    assert_eq!(*retried.lock().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_progress_is_monotonic() {
    let registry = TaskRegistry::new();
    let workflow = Workflow::start_with_id(&registry, TaskId::from("m"), WorkflowOptions::new("export", "Exporting"));
    let mut rx = registry.subscribe();
    let observed = Arc::new(Mutex::new(Vec::new()));

    let watcher = {
        let observed = observed.clone();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                if let Some(t) = snapshot.iter().find(|t| t.id.as_str() == "m") {
                    observed.lock().unwrap().push(t.progress.unwrap_or(0));
                }
            }
        })
    };

    workflow
        .run(|stages| async move {
            for p in [10u8, 40, 25, 90] {
                stages
                    .stage(p, format!("step {}", p), async {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok::<_, anyhow::Error>(())
                    })
                    .await?;
            }
            Ok::<_, StageError>(Done::new((), "done"))
        })
        .await;

    advance(1).await;
    watcher.abort();
    let observed = observed.lock().unwrap().clone();
    assert!(!observed.is_empty());
    assert!(observed.windows(2).all(|w| w[0] <= w[1]), "progress regressed: {:?}", observed);
    assert_eq!(observed.last(), Some(&100));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_reported_by_effect_still_ends_task() {
    let registry = TaskRegistry::new();
    let workflow = Workflow::start(&registry, WorkflowOptions::new("upload", "Uploading"));
    let id = workflow.id().clone();

    // Transport aborted on its own and reports cancellation; no handler ran.
    let outcome = workflow
        .run(|stages| async move {
            stages
                .stage(10, "Uploading", async { Err::<(), _>(StageError::Cancelled) })
                .await?;
            Ok::<_, StageError>(Done::new((), "Uploaded"))
        })
        .await;

    assert!(outcome.is_cancelled());
    let t = registry.get(&id).expect("task present");
    assert_eq!(t.status, TaskStatus::Info);
    assert_eq!(t.message, "Upload cancelled");
    assert!(registry.has_pending_dismiss(&id));

    advance(60_000).await;
    assert!(!registry.contains(&id), "Never left stuck in Loading");
}

#[tokio::test(start_paused = true)]
async fn test_readd_mid_stage_leaves_new_lifecycle_alone() {
    for old_cancellable in [true, false] {
        let registry = TaskRegistry::new();
        let mut options = WorkflowOptions::new("export", "Old");
        if old_cancellable {
            options = options.cancellable();
        }
        let old = Workflow::start_with_id(&registry, TaskId::from("x"), options);
        let (release, gate) = oneshot::channel::<()>();

        let old_handle = tokio::spawn(old.run(|stages| async move {
            stages
                .stage(30, "Old stage", async move {
                    let _ = gate.await;
                    Ok::<_, anyhow::Error>(())
                })
                .await?;
            stages.report(90, "Old late stage")?;
            Ok::<_, StageError>(Done::new((), "OLD finished"))
        }));
        advance(10).await;

        let new = Workflow::start_with_id(&registry, TaskId::from("x"), WorkflowOptions::new("export", "New"));
        assert!(!new.is_cancelled());
        assert_eq!(registry.lifecycle(&TaskId::from("x")), Some(new.lifecycle()));

        // Old side effect resolves after the replacement.
        let _ = release.send(());
        let old_outcome = old_handle.await.expect("old workflow");
        assert!(old_outcome.is_cancelled(), "Replaced workflow stops");

        let x = registry.get(&TaskId::from("x")).expect("x present");
        assert_eq!(x.title, "New");
        assert_eq!(x.status, TaskStatus::Loading);
        assert_eq!(x.progress, Some(0));

        let new_outcome = new
            .run(|stages| async move {
                stages.report(50, "New stage")?;
                Ok::<_, StageError>(Done::new((), "NEW finished"))
            })
            .await;

        assert!(new_outcome.is_completed());
        let x = registry.get(&TaskId::from("x")).expect("x present");
        assert_eq!(x.status, TaskStatus::Success);
        assert_eq!(x.message, "NEW finished");
        assert_eq!(registry.len(), 1);
    }
}
