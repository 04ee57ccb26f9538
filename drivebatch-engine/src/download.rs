use std::future::Future;
use std::path::{Path, PathBuf};

use drivebatch_core::{DriveClient, DriveError, extension_for};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::backoff::RetryPolicy;
use crate::manifest::{DownloadTask, FileRef};
use crate::progress::{DownloadEvent, emit};
use crate::session::{DownloadStatus, SessionError, sanitize_component};

#[derive(Debug, Clone, Serialize)]
pub struct DownloadBatchResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

enum FetchFailure {
    Remote(String),
    Local(std::io::Error),
}

/// Drives one manifest batch: resolves each file reference, writes the
/// content to local staging, and records the outcome per file. One
/// file's failure never aborts the batch; only local I/O does.
pub struct DownloadOrchestrator {
    client: DriveClient,
    staging_dir: PathBuf,
    retry: RetryPolicy,
    events: Option<UnboundedSender<DownloadEvent>>,
    cancel: CancellationToken,
    status: DownloadStatus,
}

impl DownloadOrchestrator {
    pub fn new(client: DriveClient, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            staging_dir: staging_dir.into(),
            retry: RetryPolicy::default(),
            events: None,
            cancel: CancellationToken::new(),
            status: DownloadStatus::default(),
        }
    }

    pub fn with_events(mut self, events: UnboundedSender<DownloadEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Per-file outcomes of the current or most recent batch.
    pub fn status(&self) -> &DownloadStatus {
        &self.status
    }

    pub async fn run(&mut self, tasks: &[DownloadTask]) -> Result<DownloadBatchResult, SessionError> {
        self.status.begin_batch(tasks, &self.staging_dir)?;
        let result = self.process(tasks).await;
        self.status.finish_batch();
        Ok(result)
    }

    async fn process(&mut self, tasks: &[DownloadTask]) -> DownloadBatchResult {
        if let Err(err) = tokio::fs::create_dir_all(&self.staging_dir).await {
            tracing::error!(
                "failed to create download folder {}: {err}",
                self.staging_dir.display()
            );
            return failure(format!("failed to create download folder: {err}"));
        }
        tracing::info!("download folder ready: {}", self.staging_dir.display());

        for (folder_idx, task) in tasks.iter().enumerate() {
            let folder_path = self.status.folders[folder_idx].local_path.clone();
            if let Err(err) = tokio::fs::create_dir_all(&folder_path).await {
                tracing::error!("failed to create folder {}: {err}", folder_path.display());
                return failure(format!("failed to create folder {}: {err}", task.folder_name));
            }
            tracing::info!("created folder: {}", task.folder_name);

            for (file_idx, file_ref) in task.file_refs.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    tracing::warn!("download batch cancelled");
                    return failure("batch cancelled".to_string());
                }

                if file_ref.remote_id.is_empty() {
                    // Deterministic local validation failure; no remote
                    // call is attempted and no retry applies.
                    tracing::warn!(
                        "missing file ID for {} in {}",
                        file_ref.logical_name,
                        task.folder_name
                    );
                    self.record_error(folder_idx, file_idx, task, file_ref, "Missing file ID");
                    continue;
                }

                match self.fetch_file(file_ref, &folder_path).await {
                    Ok(local_path) => {
                        tracing::info!(
                            "downloaded file {} to {}",
                            local_path.display(),
                            task.folder_name
                        );
                        self.status.mark_completed(folder_idx, file_idx, local_path);
                        emit(
                            self.events.as_ref(),
                            DownloadEvent::FileComplete {
                                folder_name: task.folder_name.clone(),
                                file_name: file_ref.logical_name.clone(),
                                success: true,
                                error: None,
                            },
                        );
                    }
                    Err(FetchFailure::Remote(message)) => {
                        tracing::error!(
                            "error downloading file {} ({}): {message}",
                            file_ref.remote_id,
                            file_ref.logical_name
                        );
                        self.record_error(folder_idx, file_idx, task, file_ref, &message);
                    }
                    Err(FetchFailure::Local(err)) => {
                        // Disk problems poison the whole batch.
                        tracing::error!(
                            "local I/O failure while writing {}: {err}",
                            file_ref.logical_name
                        );
                        self.record_error(folder_idx, file_idx, task, file_ref, &err.to_string());
                        return failure(err.to_string());
                    }
                }
            }
        }

        tracing::info!("download batch finished");
        DownloadBatchResult {
            success: true,
            error: None,
        }
    }

    async fn fetch_file(
        &self,
        file_ref: &FileRef,
        folder_path: &Path,
    ) -> Result<PathBuf, FetchFailure> {
        let id = file_ref.remote_id.as_str();
        let classify = |err: DriveError| FetchFailure::Remote(remote_message(err, file_ref));

        let metadata = self
            .with_backoff(|| self.client.file_metadata(id))
            .await
            .map_err(classify)?;
        let content = self
            .with_backoff(|| self.client.download_content(id))
            .await
            .map_err(classify)?;

        let extension = metadata.mime_type.as_deref().and_then(extension_for);
        let file_name = match extension {
            Some(extension) => format!("{}.{extension}", file_ref.logical_name),
            None => file_ref.logical_name.clone(),
        };
        let local_path = folder_path.join(sanitize_component(&file_name));
        tokio::fs::write(&local_path, &content)
            .await
            .map_err(FetchFailure::Local)?;
        Ok(local_path)
    }

    async fn with_backoff<T, F, Fut>(&self, mut op: F) -> Result<T, DriveError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DriveError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && self.retry.allows(attempt) => {
                    let delay = self.retry.delay(attempt);
                    tracing::warn!("retryable drive error ({err}); retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn record_error(
        &mut self,
        folder_idx: usize,
        file_idx: usize,
        task: &DownloadTask,
        file_ref: &FileRef,
        message: &str,
    ) {
        self.status.mark_error(folder_idx, file_idx, message);
        emit(
            self.events.as_ref(),
            DownloadEvent::FileComplete {
                folder_name: task.folder_name.clone(),
                file_name: file_ref.logical_name.clone(),
                success: false,
                error: Some(message.to_string()),
            },
        );
    }
}

fn failure(error: String) -> DownloadBatchResult {
    DownloadBatchResult {
        success: false,
        error: Some(error),
    }
}

fn remote_message(err: DriveError, file_ref: &FileRef) -> String {
    match err {
        DriveError::NotFound { .. } => format!(
            "File not found: {} ({})",
            file_ref.remote_id, file_ref.logical_name
        ),
        DriveError::Permission { .. } => format!(
            "Permission denied for file: {} ({})",
            file_ref.remote_id, file_ref.logical_name
        ),
        other => other.to_string(),
    }
}
