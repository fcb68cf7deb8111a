//! Single-file upload and download.

use log::{debug, info, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use super::task::{Direction, FailureReason, TransferStatus, TransferTask};
use super::{TransferHandle, TransferOrchestrator};
use crate::errors::AdmissionError;
use crate::transport::wire::decode_devices;
use crate::types::{Device, DeviceId, FileEntry};

impl TransferOrchestrator {
    /// Size, space and path checks for an upload, in that order. Returns the canonical
    /// source path and its size.
    pub fn admit_upload(
        &self,
        device: &Device,
        source: &Path,
        storage_id: u32,
    ) -> Result<(PathBuf, u64), AdmissionError> {
        let meta = fs::metadata(source).map_err(|e| match e.kind() {
            ErrorKind::NotFound => AdmissionError::SourceMissing {
                path: source.display().to_string(),
            },
            _ => AdmissionError::unreadable(source, &e),
        })?;
        if !meta.is_file() {
            return Err(AdmissionError::NotRegularFile {
                path: source.display().to_string(),
            });
        }

        let size = meta.len();
        if size > self.max_file_size {
            return Err(AdmissionError::FileTooLarge {
                size,
                max: self.max_file_size,
            });
        }
        let storage = device
            .storage(storage_id)
            .ok_or(AdmissionError::StorageNotFound { storage_id })?;
        if storage.free_space < size {
            return Err(AdmissionError::InsufficientSpace {
                needed: size,
                available: storage.free_space,
            });
        }

        let canonical = self.policy.check_source(source)?;
        Ok((canonical, size))
    }

    /// Admits and starts an upload of one local file into `parent_id`.
    pub fn upload_file(
        self: &Arc<Self>,
        device: &Device,
        source: &Path,
        parent_id: u32,
        storage_id: u32,
    ) -> Result<TransferHandle, AdmissionError> {
        let (canonical, size) = self.admit_upload(device, source, storage_id).inspect_err(|e| {
            warn!("Upload of {} rejected: {}", source.display(), e);
        })?;

        let file_name = canonical
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let task = TransferTask::new(
            Direction::Upload,
            file_name,
            canonical.display().to_string(),
            format!("{}/{:#x}", device.display_name(), parent_id),
            size,
        );
        let task_id = self.board.add(task);

        let orchestrator = Arc::clone(self);
        let device_id = device.id;
        let join = tokio::spawn(async move {
            orchestrator
                .run_upload(task_id, device_id, storage_id, parent_id, canonical, size)
                .await
        });
        Ok(TransferHandle { task_id, join })
    }

    async fn run_upload(
        &self,
        task_id: Uuid,
        device_id: DeviceId,
        storage_id: u32,
        parent_id: u32,
        source: PathBuf,
        size: u64,
    ) -> TransferStatus {
        self.board.start(task_id);
        info!("Uploading {} to {:#x}/{:#x}", source.display(), storage_id, parent_id);

        if let Err(e) = fs::metadata(&source) {
            warn!("Source {} vanished after admission: {}", source.display(), e);
            self.board.finish(
                task_id,
                TransferStatus::failed(FailureReason::CannotReadSource { message: e.to_string() }),
            );
            return self.final_status(task_id);
        }

        let transport = Arc::clone(&self.transport);
        let transport_task_id = task_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            transport.upload_file(storage_id, parent_id, &source, &transport_task_id)
        })
        .await
        .unwrap_or_else(|e| {
            warn!("Upload worker failed: {}", e);
            0
        });

        let status = if result > 0 {
            self.board.update_progress(task_id, size);
            TransferStatus::Completed
        } else if self.is_cancel_requested(task_id) {
            TransferStatus::Cancelled
        } else {
            warn!("UploadFile returned {} for task {}", result, task_id);
            TransferStatus::failed(FailureReason::TransferFailed)
        };
        self.board.finish(task_id, status);

        self.refresh_after_mutation(device_id, storage_id).await;
        self.final_status(task_id)
    }

    /// Size and path checks for a download. Returns the resolved destination.
    pub fn admit_download(
        &self,
        entry: &FileEntry,
        destination: &Path,
        replace: bool,
    ) -> Result<PathBuf, AdmissionError> {
        if entry.is_directory {
            return Err(AdmissionError::NotRegularFile {
                path: entry.name.clone(),
            });
        }
        if entry.size > self.max_file_size {
            return Err(AdmissionError::FileTooLarge {
                size: entry.size,
                max: self.max_file_size,
            });
        }
        let resolved = self.policy.check_destination(destination)?;
        if !replace && resolved.exists() {
            return Err(AdmissionError::DestinationExists {
                path: destination.display().to_string(),
            });
        }
        Ok(resolved)
    }

    /// Admits and starts a download of one device file to `destination`.
    ///
    /// With `replace`, an existing file at the destination is removed first.
    pub fn download_file(
        self: &Arc<Self>,
        device: &Device,
        entry: &FileEntry,
        destination: &Path,
        replace: bool,
    ) -> Result<TransferHandle, AdmissionError> {
        let resolved = self.admit_download(entry, destination, replace).inspect_err(|e| {
            warn!("Download of {} rejected: {}", entry.name, e);
        })?;

        let task = TransferTask::new(
            Direction::Download,
            entry.name.clone(),
            format!("{}/{:#x}", device.display_name(), entry.object_id),
            resolved.display().to_string(),
            entry.size,
        );
        let task_id = self.board.add(task);

        let orchestrator = Arc::clone(self);
        let device_index = device.index;
        let entry = entry.clone();
        let join = tokio::spawn(async move {
            orchestrator
                .run_download(task_id, device_index, entry, resolved, replace)
                .await
        });
        Ok(TransferHandle { task_id, join })
    }

    /// Downloads several files into `destination_dir`. Each file is admitted on its own;
    /// one rejection doesn't stop the others.
    pub fn download_files(
        self: &Arc<Self>,
        device: &Device,
        entries: &[FileEntry],
        destination_dir: &Path,
        replace: bool,
    ) -> Vec<Result<TransferHandle, AdmissionError>> {
        entries
            .iter()
            .map(|entry| self.download_file(device, entry, &destination_dir.join(&entry.name), replace))
            .collect()
    }

    async fn run_download(
        &self,
        task_id: Uuid,
        device_index: i64,
        entry: FileEntry,
        destination: PathBuf,
        replace: bool,
    ) -> TransferStatus {
        self.board.start(task_id);

        if let Err(reason) = prepare_destination(&destination, replace) {
            self.board.finish(task_id, TransferStatus::failed(reason));
            return self.final_status(task_id);
        }

        if !self.device_present(device_index).await {
            warn!("Device gone before downloading {}", entry.name);
            self.board
                .finish(task_id, TransferStatus::failed(FailureReason::DeviceDisconnected));
            return self.final_status(task_id);
        }

        info!("Downloading {} to {}", entry.name, destination.display());
        let transport = Arc::clone(&self.transport);
        let transport_task_id = task_id.to_string();
        let object_id = entry.object_id;
        let dest = destination.clone();
        let result =
            tokio::task::spawn_blocking(move || transport.download_file(object_id, &dest, &transport_task_id))
                .await
                .unwrap_or_else(|e| {
                    warn!("Download worker failed: {}", e);
                    0
                });

        let status = if result > 0 {
            if !self.settle_delay.is_zero() {
                tokio::time::sleep(self.settle_delay).await;
            }
            self.verify_download(task_id, &entry, &destination)
        } else if self.is_cancel_requested(task_id) {
            TransferStatus::Cancelled
        } else if self.device_present(device_index).await {
            warn!("DownloadFile returned {} for {}", result, entry.name);
            TransferStatus::failed(FailureReason::TransferFailed)
        } else {
            TransferStatus::failed(FailureReason::DeviceDisconnected)
        };
        self.board.finish(task_id, status);
        self.final_status(task_id)
    }

    /// The transport can report success and leave nothing behind; a missing or empty
    /// file (for a non-empty source) is deleted and reported as corrupted.
    fn verify_download(&self, task_id: Uuid, entry: &FileEntry, destination: &Path) -> TransferStatus {
        let written = fs::metadata(destination).map(|m| m.len()).ok();
        match written {
            Some(len) if len > 0 || entry.size == 0 => {
                self.board.update_progress(task_id, len);
                TransferStatus::Completed
            }
            _ => {
                warn!(
                    "Download of {} reported success but {} is {}",
                    entry.name,
                    destination.display(),
                    if written.is_some() { "empty" } else { "missing" }
                );
                if written.is_some()
                    && let Err(e) = fs::remove_file(destination)
                {
                    debug!("Couldn't remove corrupted download: {}", e);
                }
                TransferStatus::failed(FailureReason::CorruptedDownload)
            }
        }
    }

    /// Asks the bridge whether a device with this index is still attached.
    async fn device_present(&self, device_index: i64) -> bool {
        let transport = Arc::clone(&self.transport);
        let payload = tokio::task::spawn_blocking(move || transport.scan()).await.ok().flatten();
        match payload.as_deref().map(decode_devices) {
            Some(Ok(devices)) => devices.iter().any(|d| d.id == device_index),
            _ => false,
        }
    }

    fn is_cancel_requested(&self, task_id: Uuid) -> bool {
        self.board.get(task_id).is_some_and(|t| t.is_cancel_requested())
    }

    /// The task's status as recorded on the board, which may differ from what the worker
    /// tried to set (a cancel can land first).
    fn final_status(&self, task_id: Uuid) -> TransferStatus {
        self.board
            .status(task_id)
            .unwrap_or_else(|| TransferStatus::failed(FailureReason::TransferFailed))
    }
}

/// Creates the parent folder and clears the way for the new file.
fn prepare_destination(destination: &Path, replace: bool) -> Result<(), FailureReason> {
    if let Some(parent) = destination.parent()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| FailureReason::CannotCreateDirectory { message: e.to_string() })?;
    }
    if destination.exists() {
        if !replace {
            return Err(FailureReason::FileAlreadyExists);
        }
        fs::remove_file(destination).map_err(|e| FailureReason::CannotReplaceExisting { message: e.to_string() })?;
    }
    Ok(())
}
