use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// Progress stream for one upload invocation. Consumers subscribe by the
/// serialized `type` name.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum UploadEvent {
    FileProgress {
        path: PathBuf,
        bytes_sent: u64,
        total_bytes: u64,
        percent: u8,
    },
    FolderProgress {
        path: PathBuf,
        bytes_done: u64,
        total_bytes: u64,
        percent: u8,
    },
    OverallProgress {
        bytes_done: u64,
        total_bytes: u64,
        percent: u8,
    },
    FileComplete {
        path: PathBuf,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    FolderComplete {
        path: PathBuf,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum DownloadEvent {
    FileComplete {
        folder_name: String,
        file_name: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Running byte totals for one upload invocation. Built fresh per batch;
/// there is no reset.
#[derive(Debug)]
pub struct ProgressAggregator {
    uploaded: u64,
    total: u64,
}

impl ProgressAggregator {
    pub fn new(total: u64) -> Self {
        Self { uploaded: 0, total }
    }

    pub fn add(&mut self, bytes: u64) {
        self.uploaded = self.uploaded.saturating_add(bytes);
    }

    pub fn uploaded(&self) -> u64 {
        self.uploaded
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn percent(&self) -> u8 {
        percent_of(self.uploaded, self.total)
    }
}

/// Rounded percentage clamped to 100 so rounding can never overshoot.
/// An empty denominator counts as done.
pub(crate) fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let percent = (u128::from(done) * 100 + u128::from(total) / 2) / u128::from(total);
    percent.min(100) as u8
}

/// Fire-and-forget delivery: a slow or departed consumer never blocks
/// the orchestrator.
pub(crate) fn emit<T>(sender: Option<&UnboundedSender<T>>, event: T) {
    if let Some(sender) = sender {
        let _ = sender.send(event);
    }
}
