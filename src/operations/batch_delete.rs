use std::future::Future;
use std::sync::Arc;

use crate::kernel::registry::TaskRegistry;
use crate::workflow::{BatchReport, Done, Outcome, StageError, Workflow, WorkflowOptions};

pub trait MemberStore: Send + Sync + 'static {
    fn delete(&self, member_id: &str) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Delete members one by one. A failed delete is counted, not fatal; the task
/// ends `Success` with a summary such as "2 deleted, 1 failed".
pub async fn delete_members<S: MemberStore>(
    registry: &TaskRegistry,
    store: Arc<S>,
    member_ids: Vec<String>,
) -> Outcome<BatchReport> {
    let options = WorkflowOptions::new("delete", format!("Deleting {} members", member_ids.len()))
        .progress_label("Deleting...")
        .cancellable();

    Workflow::start(registry, options)
        .run(|stages| async move {
            let report = stages
                .batch(
                    member_ids,
                    0,
                    100,
                    |k, n| format!("Deleting {} of {}", k, n),
                    |member_id| {
                        let store = Arc::clone(&store);
                        async move { store.delete(&member_id).await }
                    },
                )
                .await?;

            let message = report.summary("deleted");
            Ok::<_, StageError>(Done::new(report, message))
        })
        .await
}
