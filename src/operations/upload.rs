use std::future::Future;
use std::sync::Arc;

use anyhow::anyhow;

use crate::kernel::registry::TaskRegistry;
use crate::kernel::task::TaskAction;
use crate::workflow::{relaunch, BoxFuture, Done, Outcome, StageError, Workflow, WorkflowOptions};

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Transport for file uploads. The returned future is dropped if the user
/// cancels mid-transfer, so implementations should abort on drop.
pub trait Uploader: Send + Sync + 'static {
    /// Resolves with the stored file's location.
    fn upload(&self, file_name: &str, body: Arc<Vec<u8>>) -> impl Future<Output = anyhow::Result<String>> + Send;
}

pub struct UploadJob<U> {
    uploader: Arc<U>,
    file_name: String,
    body: Arc<Vec<u8>>,
    max_bytes: usize,
}

impl<U> Clone for UploadJob<U> {
    fn clone(&self) -> Self {
        Self {
            uploader: Arc::clone(&self.uploader),
            file_name: self.file_name.clone(),
            body: Arc::clone(&self.body),
            max_bytes: self.max_bytes,
        }
    }
}

impl<U: Uploader> UploadJob<U> {
    pub fn new(uploader: Arc<U>, file_name: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            uploader,
            file_name: file_name.into(),
            body: Arc::new(body),
            max_bytes: MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_limit(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Validate (10%), transfer (30%, abortable), done. Resolves with the
    /// stored location.
    pub fn run(self, registry: TaskRegistry) -> BoxFuture<Outcome<String>> {
        Box::pin(async move {
            let options = WorkflowOptions::new("upload", format!("Uploading {}", self.file_name))
                .progress_label("Uploading...")
                .cancellable()
                .retry(self.retry_action(&registry));
            let workflow = Workflow::start(&registry, options);
            let job = self;

            workflow
                .run(|stages| async move {
                    stages.report(10, "Checking file...")?;
                    if job.body.len() > job.max_bytes {
                        return Err(StageError::Failed(anyhow!(
                            "{} is {} bytes, limit is {}",
                            job.file_name,
                            job.body.len(),
                            job.max_bytes
                        )));
                    }

                    let location = stages
                        .stage_abortable(
                            30,
                            "Uploading...",
                            job.uploader.upload(&job.file_name, Arc::clone(&job.body)),
                        )
                        .await?;
                    if location.is_empty() {
                        return Err(anyhow!("upload of {} returned no location", job.file_name).into());
                    }

                    Ok(Done::new(location, format!("Uploaded {}", job.file_name)))
                })
                .await
        })
    }

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
