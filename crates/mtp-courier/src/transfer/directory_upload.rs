//! Uploading a whole local directory tree.
//!
//! The tree is validated once up front (path security, total size against free space),
//! then every regular file is uploaded in file-name order. Remote subfolders are created
//! on demand and remembered for the rest of the run. One file failing doesn't stop the
//! run; a cancel request stops it before the next file.

use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::task::JoinHandle;
use uuid::Uuid;
use walkdir::{DirEntry, WalkDir};

use super::TransferOrchestrator;
use super::task::{Direction, FailureReason, TransferStatus, TransferTask};
use crate::errors::AdmissionError;
use crate::types::{Device, DeviceId, format_bytes};

/// Per-file error strings kept in a result. The counts stay exact past this.
const MAX_REPORTED_ERRORS: usize = 50;

const CANCELLED_MESSAGE: &str = "Upload cancelled by user";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUploadResult {
    pub total_files: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    /// `None` when the upload was rejected before a task was created.
    pub task_id: Option<Uuid>,
    pub status: Option<TransferStatus>,
}

impl DirectoryUploadResult {
    fn rejected(total_files: usize, error: String) -> Self {
        Self {
            total_files,
            failed: total_files,
            errors: vec![error],
            ..Self::default()
        }
    }

    fn push_error(&mut self, error: String) {
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(error);
        }
    }
}

struct LocalFile {
    path: PathBuf,
    size: u64,
}

/// Where the run is uploading to.
#[derive(Clone, Copy)]
struct Target {
    device_id: DeviceId,
    storage_id: u32,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

/// Regular, non-hidden files under `root`, sorted by file name at every level.
/// Hidden folders are skipped with everything inside them.
fn collect_files(root: &Path, result: &mut DirectoryUploadResult) -> Vec<LocalFile> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));
    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() => match entry.metadata() {
                Ok(meta) => files.push(LocalFile {
                    path: entry.into_path(),
                    size: meta.len(),
                }),
                Err(e) => {
                    warn!("Skipping {}: {}", entry.path().display(), e);
                    result.push_error(format!("Can't read {}: {}", entry.path().display(), e));
                }
            },
            Ok(_) => {}
            Err(e) => {
                warn!("Directory walk error: {}", e);
                result.push_error(e.to_string());
            }
        }
    }
    files
}

/// A directory upload that passed admission and has its aggregate task on the board.
struct PreparedUpload {
    task_id: Uuid,
    target: Target,
    parent_id: u32,
    root: PathBuf,
    folder_name: String,
    files: Vec<LocalFile>,
    free_space: u64,
    result: DirectoryUploadResult,
}

/// A directory upload running on its own worker.
pub struct DirectoryUploadHandle {
    /// `None` when the upload was rejected before a task was created.
    pub task_id: Option<Uuid>,
    join: JoinHandle<DirectoryUploadResult>,
}

impl DirectoryUploadHandle {
    pub async fn wait(self) -> DirectoryUploadResult {
        match self.join.await {
            Ok(result) => result,
            Err(e) => {
                warn!("Directory upload worker ended abnormally: {}", e);
                DirectoryUploadResult {
                    task_id: self.task_id,
                    status: Some(TransferStatus::failed(FailureReason::TransferFailed)),
                    errors: vec![e.to_string()],
                    ..DirectoryUploadResult::default()
                }
            }
        }
    }
}

impl TransferOrchestrator {
    /// Uploads every regular file under `source_dir` into a folder of the same name under
    /// `parent_id`. Always returns a result; rejections are reported in it.
    pub async fn upload_directory(
        &self,
        device: &Device,
        source_dir: &Path,
        parent_id: u32,
        storage_id: u32,
    ) -> DirectoryUploadResult {
        match self.prepare_directory_upload(device, source_dir, parent_id, storage_id) {
            Ok(prepared) => self.run_directory_upload(prepared).await,
            Err(rejected) => rejected,
        }
    }

    /// Like [`upload_directory`](Self::upload_directory), but runs on its own worker.
    /// Admission happens before this returns, so the task id is known up front.
    pub fn start_directory_upload(
        self: &Arc<Self>,
        device: &Device,
        source_dir: &Path,
        parent_id: u32,
        storage_id: u32,
    ) -> DirectoryUploadHandle {
        match self.prepare_directory_upload(device, source_dir, parent_id, storage_id) {
            Ok(prepared) => {
                let task_id = Some(prepared.task_id);
                let orchestrator = Arc::clone(self);
                let join = tokio::spawn(async move { orchestrator.run_directory_upload(prepared).await });
                DirectoryUploadHandle { task_id, join }
            }
            Err(rejected) => DirectoryUploadHandle {
                task_id: None,
                join: tokio::spawn(async move { rejected }),
            },
        }
    }

    /// Walks the tree, checks space and creates the aggregate task. `Err` carries the
    /// result to hand back when nothing should be uploaded.
    fn prepare_directory_upload(
        &self,
        device: &Device,
        source_dir: &Path,
        parent_id: u32,
        storage_id: u32,
    ) -> Result<PreparedUpload, DirectoryUploadResult> {
        let root = match self.admit_directory(source_dir) {
            Ok(root) => root,
            Err(e) => {
                warn!("Directory upload of {} rejected: {}", source_dir.display(), e);
                return Err(DirectoryUploadResult::rejected(0, e.to_string()));
            }
        };
        let folder_name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut result = DirectoryUploadResult::default();
        let files = collect_files(&root, &mut result);
        result.total_files = files.len();
        if files.is_empty() {
            result.push_error(format!("No files to upload in {}", root.display()));
            return Err(result);
        }

        let total_size: u64 = files.iter().map(|f| f.size).sum();
        let Some(storage) = device.storage(storage_id) else {
            return Err(DirectoryUploadResult::rejected(
                files.len(),
                AdmissionError::StorageNotFound { storage_id }.to_string(),
            ));
        };
        let free_space = storage.free_space;
        if total_size > free_space {
            let error = AdmissionError::InsufficientSpace {
                needed: total_size,
                available: free_space,
            };
            warn!("Directory upload of {} rejected: {}", root.display(), error);
            return Err(DirectoryUploadResult::rejected(files.len(), error.to_string()));
        }

        let task = TransferTask::new(
            Direction::Upload,
            folder_name.clone(),
            root.display().to_string(),
            format!("{}/{:#x}", device.display_name(), parent_id),
            total_size,
        )
        .directory();
        let task_id = self.board.add(task);
        result.task_id = Some(task_id);
        info!(
            "Uploading {} files ({}) from {}",
            files.len(),
            format_bytes(total_size),
            root.display()
        );

        Ok(PreparedUpload {
            task_id,
            target: Target {
                device_id: device.id,
                storage_id,
            },
            parent_id,
            root,
            folder_name,
            files,
            free_space,
            result,
        })
    }

    async fn run_directory_upload(&self, prepared: PreparedUpload) -> DirectoryUploadResult {
        let PreparedUpload {
            task_id,
            target,
            parent_id,
            root,
            folder_name,
            files,
            free_space,
            mut result,
        } = prepared;
        self.board.start(task_id);

        let status = match self.resolve_or_create_folder(target, parent_id, &folder_name).await {
            Some(top_id) => {
                self.upload_tree(task_id, target, &root, top_id, &files, free_space, &mut result)
                    .await
            }
            None => {
                result.failed = files.len();
                result.push_error(format!("Couldn't create folder \"{folder_name}\" on the device"));
                TransferStatus::failed(FailureReason::TargetFolderFailed { name: folder_name })
            }
        };

        self.board.finish(task_id, status);
        self.refresh_after_mutation(target.device_id, target.storage_id).await;
        result.status = self.board.status(task_id);
        info!(
            "Directory upload done: {} uploaded, {} failed, {} skipped of {}",
            result.uploaded, result.failed, result.skipped, result.total_files
        );
        result
    }

    /// The source must be a real folder under a permitted root.
    fn admit_directory(&self, source_dir: &Path) -> Result<PathBuf, AdmissionError> {
        let root = self.policy.check_source(source_dir)?;
        if !root.is_dir() {
            return Err(AdmissionError::NotRegularFile {
                path: source_dir.display().to_string(),
            });
        }
        Ok(root)
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload_tree(
        &self,
        task_id: Uuid,
        target: Target,
        root: &Path,
        top_id: u32,
        files: &[LocalFile],
        free_space: u64,
        result: &mut DirectoryUploadResult,
    ) -> TransferStatus {
        let cancel = match self.board.get(task_id) {
            Some(task) => task.cancel_flag(),
            None => return TransferStatus::Cancelled,
        };
        // Relative folder path -> remote object id, for this run only.
        let mut folders: HashMap<PathBuf, u32> = HashMap::new();
        let mut bytes_done: u64 = 0;

        for (index, file) in files.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                result.skipped = files.len() - index;
                info!("Directory upload cancelled, skipping {} file(s)", result.skipped);
                break;
            }

            let relative = file.path.strip_prefix(root).unwrap_or(&file.path);
            let shown = relative.display().to_string();

            // The file may have changed since the walk.
            let size = match fs::metadata(&file.path) {
                Ok(meta) => meta.len(),
                Err(e) => {
                    result.failed += 1;
                    result.push_error(format!("{shown}: can't read: {e}"));
                    warn!("Skipping {}: {}", file.path.display(), e);
                    continue;
                }
            };
            if size != file.size {
                debug!("{} changed size since the walk: {} -> {}", shown, file.size, size);
            }

            let headroom = free_space.saturating_sub(bytes_done);
            if size > headroom {
                result.failed += 1;
                result.push_error(format!(
                    "{shown}: not enough space ({} needed, {} left)",
                    format_bytes(size),
                    format_bytes(headroom)
                ));
                warn!("Not enough space left for {}", shown);
                continue;
            }

            let parent_id = match relative.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => {
                    match self.ensure_subfolders(target, top_id, dir, &mut folders).await {
                        Some(id) => id,
                        None => {
                            result.failed += 1;
                            result.push_error(format!("{shown}: couldn't create folder {}", dir.display()));
                            continue;
                        }
                    }
                }
                _ => top_id,
            };

            let transport = Arc::clone(&self.transport);
            let source = file.path.clone();
            let storage_id = target.storage_id;
            let code = tokio::task::spawn_blocking(move || {
                transport.upload_file(storage_id, parent_id, &source, &Uuid::new_v4().to_string())
            })
            .await
            .unwrap_or_else(|e| {
                warn!("Upload worker failed: {}", e);
                0
            });

            if code > 0 {
                result.uploaded += 1;
                bytes_done += size;
                self.board.update_progress(task_id, bytes_done);
                debug!("Uploaded {} ({}/{})", shown, index + 1, files.len());
            } else {
                result.failed += 1;
                result.push_error(format!("Failed to upload {shown}"));
                warn!("UploadFile returned {} for {}", code, shown);
            }
        }

        if cancel.load(Ordering::SeqCst) {
            result.push_error(CANCELLED_MESSAGE.to_string());
            TransferStatus::Cancelled
        } else if result.uploaded == 0 && result.failed > 0 {
            TransferStatus::failed(FailureReason::AllFilesFailed { failed: result.failed })
        } else {
            TransferStatus::Completed
        }
    }

    /// Makes sure every component of `relative_dir` exists under `top_id`.
    async fn ensure_subfolders(
        &self,
        target: Target,
        top_id: u32,
        relative_dir: &Path,
        folders: &mut HashMap<PathBuf, u32>,
    ) -> Option<u32> {
        let mut parent_id = top_id;
        let mut prefix = PathBuf::new();
        for component in relative_dir.components() {
            prefix.push(component);
            if let Some(&id) = folders.get(&prefix) {
                parent_id = id;
                continue;
            }
            let name = component.as_os_str().to_string_lossy();
            let id = self.resolve_or_create_folder(target, parent_id, &name).await?;
            folders.insert(prefix.clone(), id);
            parent_id = id;
        }
        Some(parent_id)
    }

    /// Finds the folder `name` under `parent_id`, creating it if needed.
    async fn resolve_or_create_folder(&self, target: Target, parent_id: u32, name: &str) -> Option<u32> {
        match self
            .lister
            .find_folder(target.device_id, target.storage_id, parent_id, name)
            .await
        {
            Ok(Some(id)) => return Some(id),
            Ok(None) => {}
            Err(e) => debug!("Couldn't list {:#x} to find {}: {}", parent_id, name, e),
        }

        let created = self.create_remote_folder(target.storage_id, parent_id, name).await;
        if created == 0 {
            warn!("CreateFolder failed for {} under {:#x}", name, parent_id);
            return None;
        }
        self.cache.invalidate(target.device_id);

        // Re-resolve; the id CreateFolder returned is the fallback.
        match self
            .lister
            .find_folder(target.device_id, target.storage_id, parent_id, name)
            .await
        {
            Ok(Some(id)) => Some(id),
            _ => Some(created),
        }
    }
}
