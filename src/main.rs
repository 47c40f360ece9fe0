use anyhow::anyhow;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use taskdeck::kernel::dismiss::DismissConfig;
use taskdeck::operations::batch_delete::{delete_members, MemberStore};
use taskdeck::operations::export::{ExportJob, ReportRenderer, ReportSink, ReportSource};
use taskdeck::operations::upload::{UploadJob, Uploader};
use taskdeck::TaskRegistry;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Simulated portal backend. Every call just sleeps.

struct Members;

impl ReportSource for Members {
    async fn fetch(&self) -> anyhow::Result<Vec<Value>> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok((1..=5).map(|n| json!({ "id": n, "name": format!("Member {}", n) })).collect())
    }
}

impl MemberStore for Members {
    async fn delete(&self, member_id: &str) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_millis(150)).await;
        if member_id == "m-2" {
            return Err(anyhow!("member {} has open invoices", member_id));
        }
        Ok(())
    }
}

struct Csv;

impl ReportRenderer for Csv {
    async fn render(&self, rows: &[Value]) -> anyhow::Result<Vec<u8>> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let body: Vec<String> = rows.iter().map(|r| r.to_string()).collect();
        Ok(body.join("\n").into_bytes())
    }
}

struct Downloads;

impl ReportSink for Downloads {
    async fn save(&self, file_name: &str, body: Vec<u8>) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        tracing::info!("Saved {} ({} bytes)", file_name, body.len());
        Ok(())
    }
}

struct SlowBucket;

impl Uploader for SlowBucket {
    async fn upload(&self, file_name: &str, _body: Arc<Vec<u8>>) -> anyhow::Result<String> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(format!("https://files.invalid/{}", file_name))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let registry = TaskRegistry::with_config(DismissConfig::from_env());

    // Renderer: print every snapshot as it is published.
    let mut updates = registry.subscribe();
    let renderer = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let views: Vec<_> = updates.borrow_and_update().iter().map(|t| t.view()).collect();
            match serde_json::to_string(&views) {
                Ok(line) => tracing::info!("[TASKS] {}", line),
                Err(e) => tracing::warn!("Snapshot not serializable: {}", e),
            }
        }
    });

    let members = Arc::new(Members);
    let export = ExportJob::new(members.clone(), Arc::new(Csv), Arc::new(Downloads), "members.csv");
    let export = tokio::spawn(export.run(registry.clone()));

    let ids = vec!["m-1".to_string(), "m-2".to_string(), "m-3".to_string()];
    let delete = tokio::spawn({
        let registry = registry.clone();
        async move { delete_members(&registry, members, ids).await }
    });

    let upload = UploadJob::new(Arc::new(SlowBucket), "avatar.png", vec![0u8; 2048]);
    let upload = tokio::spawn(upload.run(registry.clone()));

    // The user gets bored of the upload.
    tokio::time::sleep(Duration::from_millis(500)).await;
    if let Some(task) = registry.snapshot().iter().find(|t| t.id.as_str().starts_with("upload-")) {
        registry.cancel(&task.id);
    }

    tracing::info!("export: {:?}", export.await?);
    tracing::info!("delete: {:?}", delete.await?);
    tracing::info!("upload: {:?}", upload.await?);

    // Let the auto-dismiss timers drain the list.
    while !registry.is_empty() {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    tracing::info!("All tasks dismissed.");

    drop(registry);
    renderer.abort();
    Ok(())
}
