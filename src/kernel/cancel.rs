//! Cooperative cancellation.
//!
//! A workflow and its cancel control share one `CancellationToken`. The
//! control is the only writer; the workflow reads it before every stage and
//! again after every await. Once set, the token never resets.

use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::registry::{Lifecycle, TaskRegistry};
use super::task::{TaskId, TaskPatch, TaskStatus};

pub const CANCELLED_TITLE: &str = "Cancelled";

/// Build the `on_cancel` handler for a running task: trip the token, then
/// publish the terminal `Info` state. Running it twice is harmless.
///
/// The handler lives inside the task it updates, so it only holds the
/// registry weakly. It writes only within `lifecycle`: once the id has been
/// re-added, the handler still trips its own token but leaves the newcomer
/// alone.
pub fn cancel_handler(
    registry: &TaskRegistry,
    id: &TaskId,
    lifecycle: Lifecycle,
    token: &CancellationToken,
    operation: &str,
) -> impl Fn() + Send + Sync + 'static {
    let registry = registry.downgrade();
    let id = id.clone();
    let token = token.clone();
    let operation = operation.to_string();
    move || {
        token.cancel();
        let Some(registry) = registry.upgrade() else {
            return;
        };
        let changed = registry.update_in(&id, lifecycle, cancelled(&operation));
        if changed {
            info!("Task {} cancelled by user", id);
        }
    }
}

/// Terminal `Info` patch shown for a cancelled operation.
pub fn cancelled(operation: &str) -> TaskPatch {
    TaskPatch::new()
        .status(TaskStatus::Info)
        .progress(100)
        .title(CANCELLED_TITLE)
        .message(format!("{} cancelled", capitalize(operation)))
}

/// Race `fut` against the token. `None` means the token fired first and the
/// in-flight future was dropped (aborting whatever it was doing).
pub async fn until_cancelled<F>(token: &CancellationToken, fut: F) -> Option<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        out = fut => Some(out),
    }
}

pub(crate) fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
