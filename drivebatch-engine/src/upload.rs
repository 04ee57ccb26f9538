use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use drivebatch_core::DriveClient;
use futures_util::Stream;
use futures_util::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::progress::{ProgressAggregator, UploadEvent, emit, percent_of};

const DEFAULT_TICK: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("drive error: {0}")]
    Drive(#[from] drivebatch_core::DriveError),
    #[error("upload cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadedItem {
    pub id: String,
    pub name: String,
}

/// Immutable snapshot of the local subtree, built before any byte moves
/// so the overall percentage has a stable denominator.
#[derive(Debug)]
pub enum LocalNode {
    File {
        path: PathBuf,
        name: String,
        size: u64,
    },
    Dir {
        path: PathBuf,
        name: String,
        children: Vec<LocalNode>,
        subtree_size: u64,
    },
}

impl LocalNode {
    pub fn name(&self) -> &str {
        match self {
            LocalNode::File { name, .. } | LocalNode::Dir { name, .. } => name,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            LocalNode::File { path, .. } | LocalNode::Dir { path, .. } => path,
        }
    }

    /// Bytes in this subtree. Directory entries themselves contribute
    /// nothing.
    pub fn size(&self) -> u64 {
        match self {
            LocalNode::File { size, .. } => *size,
            LocalNode::Dir { subtree_size, .. } => *subtree_size,
        }
    }
}

/// Walks the subtree once, bottom-up. Children are name-sorted so upload
/// order and progress are reproducible.
pub fn scan_tree(path: &Path) -> std::io::Result<LocalNode> {
    let metadata = std::fs::metadata(path)?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    if metadata.is_file() {
        return Ok(LocalNode::File {
            path: path.to_path_buf(),
            name,
            size: metadata.len(),
        });
    }

    let mut children = Vec::new();
    let mut subtree_size = 0u64;
    let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    entries.sort();
    for entry in entries {
        let child_meta = std::fs::metadata(&entry)?;
        if !child_meta.is_file() && !child_meta.is_dir() {
            tracing::warn!("skipping non-regular entry: {}", entry.display());
            continue;
        }
        let child = scan_tree(&entry)?;
        subtree_size += child.size();
        children.push(child);
    }

    Ok(LocalNode::Dir {
        path: path.to_path_buf(),
        name,
        children,
        subtree_size,
    })
}

/// Mirrors a local subtree into the remote store, streaming per-file
/// progress into one shared running total. A file failure aborts the
/// enclosing folder's remaining siblings; partial trees are surfaced as
/// hard failures rather than silent gaps.
pub struct UploadOrchestrator {
    client: DriveClient,
    events: Option<UnboundedSender<UploadEvent>>,
    tick: Duration,
    cancel: CancellationToken,
}

impl UploadOrchestrator {
    pub fn new(client: DriveClient) -> Self {
        Self {
            client,
            events: None,
            tick: DEFAULT_TICK,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_events(mut self, events: UnboundedSender<UploadEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(
        &self,
        local_path: &Path,
        parent_id: Option<&str>,
    ) -> Result<UploadedItem, UploadError> {
        // The pre-pass must finish before any upload begins; percentages
        // are undefined without a stable denominator.
        let root = scan_tree(local_path)?;
        let total = root.size();
        tracing::info!("uploading {} ({total} bytes)", local_path.display());

        let progress = SharedProgress::new(total, self.events.clone());
        let item = self.upload_node(&root, parent_id, &progress).await?;
        progress.emit_overall();
        tracing::info!("upload finished: {} ({})", item.name, item.id);
        Ok(item)
    }

    fn upload_node<'a>(
        &'a self,
        node: &'a LocalNode,
        parent_id: Option<&'a str>,
        progress: &'a SharedProgress,
    ) -> BoxFuture<'a, Result<UploadedItem, UploadError>> {
        Box::pin(async move {
            if self.cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            match node {
                LocalNode::Dir { children, .. } => {
                    self.upload_dir(node, children, parent_id, progress).await
                }
                LocalNode::File { path, name, size } => {
                    self.upload_file(path, name, *size, parent_id, progress).await
                }
            }
        })
    }

    async fn upload_dir(
        &self,
        node: &LocalNode,
        children: &[LocalNode],
        parent_id: Option<&str>,
        progress: &SharedProgress,
    ) -> Result<UploadedItem, UploadError> {
        let folder = match self.client.create_folder(node.name(), parent_id).await {
            Ok(folder) => folder,
            Err(err) => {
                tracing::error!("failed to create remote folder {}: {err}", node.name());
                progress.folder_complete(node.path(), node.name(), None, Some(err.to_string()));
                return Err(err.into());
            }
        };
        tracing::info!("created remote folder: {}", folder.name);

        let mut folder_done = 0u64;
        // Children go one at a time: the running total stays monotonic
        // and sibling writes never race on the parent id.
        for child in children {
            if let Err(err) = self.upload_node(child, Some(&folder.id), progress).await {
                progress.folder_complete(
                    node.path(),
                    node.name(),
                    Some(folder.id.clone()),
                    Some(err.to_string()),
                );
                return Err(err);
            }
            folder_done += child.size();
            emit(
                progress.events.as_ref(),
                UploadEvent::FolderProgress {
                    path: node.path().to_path_buf(),
                    bytes_done: folder_done,
                    total_bytes: node.size(),
                    percent: percent_of(folder_done, node.size()),
                },
            );
        }

        progress.folder_complete(node.path(), node.name(), Some(folder.id.clone()), None);
        Ok(UploadedItem {
            id: folder.id,
            name: folder.name,
        })
    }

    async fn upload_file(
        &self,
        path: &Path,
        name: &str,
        size: u64,
        parent_id: Option<&str>,
        progress: &SharedProgress,
    ) -> Result<UploadedItem, UploadError> {
        let outcome = self
            .upload_file_inner(path, name, size, parent_id, progress)
            .await;
        match outcome {
            Ok(item) => {
                progress.file_complete(path, &item.name, Some(item.id.clone()), None);
                Ok(item)
            }
            Err(err) => {
                tracing::error!("failed to upload {}: {err}", path.display());
                progress.file_complete(path, name, None, Some(err.to_string()));
                Err(err)
            }
        }
    }

    async fn upload_file_inner(
        &self,
        path: &Path,
        name: &str,
        size: u64,
        parent_id: Option<&str>,
        progress: &SharedProgress,
    ) -> Result<UploadedItem, UploadError> {
        let session = self.client.begin_resumable_upload(name, parent_id).await?;
        let file = tokio::fs::File::open(path).await?;

        let tallied = Arc::new(AtomicU64::new(0));
        let stream = CountingStream {
            inner: ReaderStream::new(file),
            path: path.to_path_buf(),
            total: size,
            sent: 0,
            pending: 0,
            last_tick: Instant::now(),
            tick: self.tick,
            tallied: Arc::clone(&tallied),
            progress: progress.clone(),
        };
        let body = reqwest::Body::wrap_stream(stream);
        let uploaded = self.client.upload_to_session(session, body, size).await?;

        // Close out whatever the last tick did not cover so the overall
        // total lands exactly on the file size.
        let counted = tallied.load(Ordering::Relaxed);
        if counted < size {
            progress.add_file_progress(path, size, size, size - counted);
        }

        Ok(UploadedItem {
            id: uploaded.id,
            name: uploaded.name,
        })
    }
}

/// One upload invocation's running totals plus the event stream they are
/// published on. Constructed fresh per `run`; never shared across
/// invocations.
#[derive(Clone)]
struct SharedProgress {
    aggregator: Arc<Mutex<ProgressAggregator>>,
    events: Option<UnboundedSender<UploadEvent>>,
}

impl SharedProgress {
    fn new(total: u64, events: Option<UnboundedSender<UploadEvent>>) -> Self {
        Self {
            aggregator: Arc::new(Mutex::new(ProgressAggregator::new(total))),
            events,
        }
    }

    fn add_file_progress(&self, path: &Path, sent: u64, file_total: u64, delta: u64) {
        let Ok(mut aggregator) = self.aggregator.lock() else {
            return;
        };
        aggregator.add(delta);
        let (done, total, percent) = (
            aggregator.uploaded(),
            aggregator.total(),
            aggregator.percent(),
        );
        drop(aggregator);

        emit(
            self.events.as_ref(),
            UploadEvent::FileProgress {
                path: path.to_path_buf(),
                bytes_sent: sent,
                total_bytes: file_total,
                percent: percent_of(sent, file_total),
            },
        );
        emit(
            self.events.as_ref(),
            UploadEvent::OverallProgress {
                bytes_done: done,
                total_bytes: total,
                percent,
            },
        );
    }

    fn emit_overall(&self) {
        let Ok(aggregator) = self.aggregator.lock() else {
            return;
        };
        emit(
            self.events.as_ref(),
            UploadEvent::OverallProgress {
                bytes_done: aggregator.uploaded(),
                total_bytes: aggregator.total(),
                percent: aggregator.percent(),
            },
        );
    }

    fn file_complete(&self, path: &Path, name: &str, id: Option<String>, error: Option<String>) {
        emit(
            self.events.as_ref(),
            UploadEvent::FileComplete {
                path: path.to_path_buf(),
                name: name.to_string(),
                id,
                success: error.is_none(),
                error,
            },
        );
    }

    fn folder_complete(&self, path: &Path, name: &str, id: Option<String>, error: Option<String>) {
        emit(
            self.events.as_ref(),
            UploadEvent::FolderComplete {
                path: path.to_path_buf(),
                name: name.to_string(),
                id,
                success: error.is_none(),
                error,
            },
        );
    }
}

/// Byte-counting wrapper around the file stream. Ticks are time-based:
/// one fires per `tick` interval regardless of transfer rate, carrying
/// the bytes accumulated since the previous tick.
struct CountingStream {
    inner: ReaderStream<tokio::fs::File>,
    path: PathBuf,
    total: u64,
    sent: u64,
    pending: u64,
    last_tick: Instant,
    tick: Duration,
    tallied: Arc<AtomicU64>,
    progress: SharedProgress,
}

impl CountingStream {
    fn flush_pending(&mut self) {
        if self.pending > 0 {
            self.tallied.fetch_add(self.pending, Ordering::Relaxed);
            self.progress
                .add_file_progress(&self.path, self.sent, self.total, self.pending);
            self.pending = 0;
        }
        self.last_tick = Instant::now();
    }
}

impl Stream for CountingStream {
    type Item = <ReaderStream<tokio::fs::File> as Stream>::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                let len = chunk.len() as u64;
                this.sent += len;
                this.pending += len;
                if this.last_tick.elapsed() >= this.tick {
                    this.flush_pending();
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(err))),
            Poll::Ready(None) => {
                this.flush_pending();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
