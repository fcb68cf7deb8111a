//! Deleting objects on the device.

use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::TransferOrchestrator;
use crate::events::CourierEvent;
use crate::types::{Device, FileEntry};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub deleted: usize,
    /// Names of the entries that couldn't be deleted.
    pub failed: Vec<String>,
}

impl TransferOrchestrator {
    /// Deletes each entry independently, then drops the device's cached listings and
    /// re-lists the affected folders.
    pub async fn delete_objects(&self, device: &Device, entries: &[FileEntry]) -> DeleteResult {
        let mut result = DeleteResult::default();
        for entry in entries {
            let transport = Arc::clone(&self.transport);
            let object_id = entry.object_id;
            let code = tokio::task::spawn_blocking(move || transport.delete_object(object_id))
                .await
                .unwrap_or_else(|e| {
                    warn!("Delete worker failed: {}", e);
                    0
                });
            if code > 0 {
                result.deleted += 1;
            } else {
                warn!("DeleteObject returned {} for {} ({:#x})", code, entry.name, object_id);
                result.failed.push(entry.name.clone());
            }
        }

        self.cache.invalidate(device.id);
        let parents: BTreeSet<(u32, u32)> = entries.iter().map(|e| (e.storage_id, e.parent_id)).collect();
        for (storage_id, parent_id) in parents {
            if let Err(e) = self.lister.list(device.id, storage_id, parent_id).await {
                warn!("Couldn't re-list {:#x} after delete: {}", parent_id, e);
            }
        }
        self.events.emit(CourierEvent::FileListShouldRefresh { device_id: device.id });

        info!("Deleted {} of {} object(s)", result.deleted, entries.len());
        result
    }
}
