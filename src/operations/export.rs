use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::kernel::registry::TaskRegistry;
use crate::kernel::task::TaskAction;
use crate::workflow::{relaunch, BoxFuture, Done, Outcome, StageError, Workflow, WorkflowOptions};

/// Where report rows come from (the member API in production).
pub trait ReportSource: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = anyhow::Result<Vec<Value>>> + Send;
}

/// Turns rows into a file body (PDF, CSV, ...).
pub trait ReportRenderer: Send + Sync + 'static {
    fn render(&self, rows: &[Value]) -> impl Future<Output = anyhow::Result<Vec<u8>>> + Send;
}

/// Persists the rendered file.
pub trait ReportSink: Send + Sync + 'static {
    fn save(&self, file_name: &str, body: Vec<u8>) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Multi-stage export: fetch (10%), render (30%), save (80%), done.
pub struct ExportJob<S, R, K> {
    source: Arc<S>,
    renderer: Arc<R>,
    sink: Arc<K>,
    file_name: String,
}

impl<S, R, K> Clone for ExportJob<S, R, K> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            renderer: Arc::clone(&self.renderer),
            sink: Arc::clone(&self.sink),
            file_name: self.file_name.clone(),
        }
    }
}

impl<S, R, K> ExportJob<S, R, K>
where
    S: ReportSource,
    R: ReportRenderer,
    K: ReportSink,
{
    pub fn new(source: Arc<S>, renderer: Arc<R>, sink: Arc<K>, file_name: impl Into<String>) -> Self {
        Self {
            source,
            renderer,
            sink,
            file_name: file_name.into(),
        }
    }

    /// Run under a fresh task. Resolves with the number of exported rows.
    pub fn run(self, registry: TaskRegistry) -> BoxFuture<Outcome<usize>> {
        Box::pin(async move {
            let options = WorkflowOptions::new("export", "Exporting report")
                .progress_label("Exporting...")
                .cancellable()
                .retry(self.retry_action(&registry));
            let workflow = Workflow::start(&registry, options);
            let job = self;

            workflow
                .run(|stages| async move {
                    let rows = stages.stage(10, "Fetching records...", job.source.fetch()).await?;
                    let body = stages.stage(30, "Rendering report...", job.renderer.render(&rows)).await?;
                    stages
                        .stage(80, "Saving file...", job.sink.save(&job.file_name, body))
                        .await?;

                    let count = rows.len();
                    Ok::<_, StageError>(Done::new(count, format!("Exported {} records to {}", count, job.file_name)))
                })
                .await
        })
    }

    /// Retry re-runs the whole export as a new task.
    fn retry_action(&self, registry: &TaskRegistry) -> TaskAction {
        let job = self.clone();
        let registry = registry.downgrade();
        TaskAction::new("Retry", move || {
            if let Some(registry) = registry.upgrade() {
                relaunch(job.clone().run(registry));
            }
        })
    }
}
