//! Transfer orchestrator: turns upload, download and delete intents into tracked tasks.
//!
//! Intents are admitted (size, space, path security) before any task exists. Admitted
//! single-file transfers run on their own tokio task, with the blocking transport call on
//! a `spawn_blocking` worker, so a slow transfer never holds up device polling.
//!
//! - `task`: the task model and failure taxonomy
//! - `board`: active/completed collections
//! - `security`: local path checks
//! - `single`: single-file upload and download
//! - `directory_upload`: whole-tree uploads
//! - `delete`: batch deletes

mod board;
mod delete;
mod directory_upload;
pub mod security;
mod single;
pub mod task;

pub use board::TaskBoard;
pub use delete::DeleteResult;
pub use directory_upload::{DirectoryUploadHandle, DirectoryUploadResult};
pub use task::{Direction, FailureReason, TransferStatus, TransferTask};

use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cache::DirectoryCache;
use crate::config::CourierConfig;
use crate::errors::CourierError;
use crate::events::{CourierEvent, EventSink};
use crate::listing::DirectoryLister;
use crate::registry::TransferCanceller;
use crate::transport::Transport;
use crate::types::{Device, DeviceId, FileEntry};
use security::{PathPolicy, validate_folder_name};

/// An admitted transfer. Await [`TransferHandle::wait`] for its terminal status.
pub struct TransferHandle {
    pub task_id: Uuid,
    join: JoinHandle<TransferStatus>,
}

impl TransferHandle {
    pub async fn wait(self) -> TransferStatus {
        match self.join.await {
            Ok(status) => status,
            Err(e) => {
                warn!("Transfer {} worker ended abnormally: {}", self.task_id, e);
                TransferStatus::failed(FailureReason::TransferFailed)
            }
        }
    }
}

pub struct TransferOrchestrator {
    transport: Arc<dyn Transport>,
    cache: Arc<DirectoryCache>,
    lister: DirectoryLister,
    board: TaskBoard,
    events: Arc<dyn EventSink>,
    policy: PathPolicy,
    max_file_size: u64,
    settle_delay: Duration,
}

impl TransferOrchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: Arc<DirectoryCache>,
        events: Arc<dyn EventSink>,
        config: &CourierConfig,
    ) -> Self {
        Self {
            lister: DirectoryLister::new(Arc::clone(&transport), Arc::clone(&cache)),
            board: TaskBoard::new(Arc::clone(&events)),
            policy: PathPolicy::new(config.resolved_permitted_roots(), config.max_path_bytes),
            max_file_size: config.max_file_size,
            settle_delay: config.settle_delay(),
            transport,
            cache,
            events,
        }
    }

    pub fn board(&self) -> &TaskBoard {
        &self.board
    }

    pub fn active_tasks(&self) -> Vec<TransferTask> {
        self.board.active()
    }

    pub fn completed_tasks(&self) -> Vec<TransferTask> {
        self.board.completed()
    }

    pub fn task(&self, id: Uuid) -> Option<TransferTask> {
        self.board.get(id)
    }

    pub fn clear_completed(&self) {
        self.board.clear_completed();
    }

    /// Lists a device folder, from the cache when possible.
    pub async fn list_directory(
        &self,
        device_id: DeviceId,
        storage_id: u32,
        parent_id: u32,
    ) -> Result<Vec<FileEntry>, CourierError> {
        self.lister.list(device_id, storage_id, parent_id).await
    }

    /// Marks the task cancelled and asks the transport to stop it. The transport call may
    /// still run to completion, but the task's status is final.
    pub fn cancel_task(&self, id: Uuid) -> bool {
        if !self.board.request_cancel(id) {
            debug!("Cancel ignored, task {} isn't active", id);
            return false;
        }
        self.transport.cancel_task(&id.to_string());
        self.board.finish(id, TransferStatus::Cancelled);
        info!("Cancelled task {}", id);
        true
    }

    pub fn cancel_all(&self) {
        let ids = self.board.active_ids();
        if !ids.is_empty() {
            info!("Cancelling {} active task(s)", ids.len());
        }
        for id in ids {
            self.cancel_task(id);
        }
    }

    /// Creates a folder on the device and returns its object id.
    pub async fn create_folder(
        &self,
        device: &Device,
        storage_id: u32,
        parent_id: u32,
        name: &str,
    ) -> Result<u32, CourierError> {
        validate_folder_name(name)?;
        if device.storage(storage_id).is_none() {
            return Err(CourierError::StorageNotFound { storage_id });
        }

        let object_id = self.create_remote_folder(storage_id, parent_id, name).await;
        if object_id == 0 {
            return Err(CourierError::FolderCreationFailed { name: name.to_string() });
        }
        self.cache.invalidate(device.id);
        self.events.emit(CourierEvent::FileListShouldRefresh { device_id: device.id });
        info!("Created folder {} ({:#x}) under {:#x}", name, object_id, parent_id);
        Ok(object_id)
    }

    /// Calls the transport's `CreateFolder`; 0 means failure.
    async fn create_remote_folder(&self, storage_id: u32, parent_id: u32, name: &str) -> u32 {
        let transport = Arc::clone(&self.transport);
        let name = name.to_string();
        tokio::task::spawn_blocking(move || transport.create_folder(storage_id, parent_id, &name))
            .await
            .unwrap_or_else(|e| {
                warn!("CreateFolder worker failed: {}", e);
                0
            })
    }

    /// After a mutating transfer: refresh the bridge's storage figures, drop cached
    /// listings, give the bridge a moment, then tell the UI to reload.
    async fn refresh_after_mutation(&self, device_id: DeviceId, storage_id: u32) {
        let transport = Arc::clone(&self.transport);
        let refreshed = tokio::task::spawn_blocking(move || {
            let storage = transport.refresh_storage(storage_id);
            let cache = transport.reset_device_cache();
            (storage, cache)
        })
        .await;
        match refreshed {
            Ok((storage, cache)) if storage <= 0 || cache <= 0 => {
                debug!("Bridge refresh returned storage={} cache={}", storage, cache);
            }
            Ok(_) => {}
            Err(e) => warn!("Bridge refresh worker failed: {}", e),
        }

        self.cache.invalidate(device_id);
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        self.events.emit(CourierEvent::FileListShouldRefresh { device_id });
    }
}

impl TransferCanceller for TransferOrchestrator {
    fn cancel_all(&self) {
        TransferOrchestrator::cancel_all(self);
    }
}
