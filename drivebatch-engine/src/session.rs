use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::manifest::DownloadTask;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a download batch is already in progress")]
    BatchInProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadFile {
    pub id: String,
    pub name: String,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadFolder {
    pub id: String,
    pub folder_name: String,
    pub local_path: PathBuf,
    pub files: Vec<DownloadFile>,
}

/// Per-batch download record. Written only by the orchestrator that owns
/// it; the presentation layer reads snapshots.
#[derive(Debug, Default, Clone, Serialize)]
pub struct DownloadStatus {
    pub in_progress: bool,
    pub folders: Vec<DownloadFolder>,
}

impl DownloadStatus {
    /// Resets to a fresh all-pending state for the given tasks. Rejects
    /// the call while a batch is running: one mutator at a time.
    pub fn begin_batch(
        &mut self,
        tasks: &[DownloadTask],
        staging_dir: &Path,
    ) -> Result<(), SessionError> {
        if self.in_progress {
            return Err(SessionError::BatchInProgress);
        }
        self.in_progress = true;
        self.folders = tasks
            .iter()
            .map(|task| {
                let folder_name = sanitize_component(&task.folder_name);
                DownloadFolder {
                    id: Uuid::new_v4().to_string(),
                    local_path: staging_dir.join(&folder_name),
                    folder_name: task.folder_name.clone(),
                    files: task
                        .file_refs
                        .iter()
                        .map(|file_ref| DownloadFile {
                            id: Uuid::new_v4().to_string(),
                            name: if file_ref.remote_id.is_empty() {
                                format!("{} (Missing ID)", file_ref.logical_name)
                            } else {
                                file_ref.logical_name.clone()
                            },
                            status: FileStatus::Pending,
                            error: None,
                            local_path: None,
                        })
                        .collect(),
                }
            })
            .collect();
        Ok(())
    }

    pub fn mark_completed(&mut self, folder: usize, file: usize, local_path: PathBuf) {
        if let Some(entry) = self.file_mut(folder, file) {
            entry.status = FileStatus::Completed;
            entry.error = None;
            entry.local_path = Some(local_path);
        }
    }

    pub fn mark_error(&mut self, folder: usize, file: usize, message: impl Into<String>) {
        if let Some(entry) = self.file_mut(folder, file) {
            entry.status = FileStatus::Error;
            entry.error = Some(message.into());
        }
    }

    pub fn finish_batch(&mut self) {
        self.in_progress = false;
    }

    /// Drops the record once the batch output has been exported.
    pub fn clear(&mut self) {
        self.in_progress = false;
        self.folders.clear();
    }

    fn file_mut(&mut self, folder: usize, file: usize) -> Option<&mut DownloadFile> {
        self.folders.get_mut(folder)?.files.get_mut(file)
    }
}

/// Manifest values become local path components; keep them from escaping
/// the staging directory.
pub(crate) fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "_".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::FileRef;

    fn tasks() -> Vec<DownloadTask> {
        vec![DownloadTask {
            folder_name: "TeamA".into(),
            file_refs: vec![
                FileRef {
                    remote_id: "id123".into(),
                    logical_name: "Invoice".into(),
                },
                FileRef {
                    remote_id: String::new(),
                    logical_name: "ID_Proof".into(),
                },
            ],
        }]
    }

    #[test]
    fn begin_batch_creates_pending_entries() {
        let mut status = DownloadStatus::default();
        status
            .begin_batch(&tasks(), Path::new("/tmp/staging"))
            .unwrap();

        assert!(status.in_progress);
        assert_eq!(status.folders.len(), 1);
        let folder = &status.folders[0];
        assert_eq!(folder.folder_name, "TeamA");
        assert_eq!(folder.local_path, Path::new("/tmp/staging/TeamA"));
        assert_eq!(folder.files.len(), 2);
        assert!(folder
            .files
            .iter()
            .all(|file| file.status == FileStatus::Pending));
    }

    #[test]
    fn missing_id_entries_are_flagged_in_the_name() {
        let mut status = DownloadStatus::default();
        status
            .begin_batch(&tasks(), Path::new("/tmp/staging"))
            .unwrap();

        assert_eq!(status.folders[0].files[0].name, "Invoice");
        assert_eq!(status.folders[0].files[1].name, "ID_Proof (Missing ID)");
    }

    #[test]
    fn second_batch_is_rejected_while_in_progress() {
        let mut status = DownloadStatus::default();
        status
            .begin_batch(&tasks(), Path::new("/tmp/staging"))
            .unwrap();

        assert!(matches!(
            status.begin_batch(&tasks(), Path::new("/tmp/staging")),
            Err(SessionError::BatchInProgress)
        ));

        status.finish_batch();
        assert!(status.begin_batch(&tasks(), Path::new("/tmp/staging")).is_ok());
    }

    #[test]
    fn marks_update_exactly_one_file() {
        let mut status = DownloadStatus::default();
        status
            .begin_batch(&tasks(), Path::new("/tmp/staging"))
            .unwrap();

        status.mark_completed(0, 0, PathBuf::from("/tmp/staging/TeamA/Invoice.pdf"));
        status.mark_error(0, 1, "Missing file ID");

        let files = &status.folders[0].files;
        assert_eq!(files[0].status, FileStatus::Completed);
        assert_eq!(
            files[0].local_path.as_deref(),
            Some(Path::new("/tmp/staging/TeamA/Invoice.pdf"))
        );
        assert_eq!(files[1].status, FileStatus::Error);
        assert_eq!(files[1].error.as_deref(), Some("Missing file ID"));
    }

    #[test]
    fn sanitize_keeps_traversal_out_of_the_staging_dir() {
        assert_eq!(sanitize_component("TeamA"), "TeamA");
        assert_eq!(sanitize_component("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_component(".."), "_");
        assert_eq!(sanitize_component(""), "_");
    }
}
