//! Cache-first directory listing.

use log::{debug, warn};
use std::sync::Arc;

use crate::cache::DirectoryCache;
use crate::errors::CourierError;
use crate::transport::Transport;
use crate::transport::wire::decode_files;
use crate::types::{DeviceId, FileEntry};

/// Lists folders through the [`DirectoryCache`], falling back to the transport on a miss.
///
/// Failed listings are never cached.
pub struct DirectoryLister {
    transport: Arc<dyn Transport>,
    cache: Arc<DirectoryCache>,
}

impl DirectoryLister {
    pub fn new(transport: Arc<dyn Transport>, cache: Arc<DirectoryCache>) -> Self {
        Self { transport, cache }
    }

    pub fn cache(&self) -> &Arc<DirectoryCache> {
        &self.cache
    }

    pub async fn list(
        &self,
        device_id: DeviceId,
        storage_id: u32,
        parent_id: u32,
    ) -> Result<Vec<FileEntry>, CourierError> {
        if let Some(entries) = self.cache.get(device_id, storage_id, parent_id) {
            debug!(
                "Listing cache HIT for storage={:#x} parent={:#x}, {} entries",
                storage_id,
                parent_id,
                entries.len()
            );
            return Ok(entries);
        }
        debug!("Listing cache MISS for storage={:#x} parent={:#x}", storage_id, parent_id);

        let transport = Arc::clone(&self.transport);
        let payload = tokio::task::spawn_blocking(move || transport.list_files(storage_id, parent_id))
            .await
            .map_err(|e| CourierError::Other {
                message: format!("Listing task failed: {e}"),
            })?;

        let Some(payload) = payload else {
            warn!("ListFiles returned nothing for storage={:#x} parent={:#x}", storage_id, parent_id);
            return Err(CourierError::TransportUnavailable {
                operation: "ListFiles".to_string(),
            });
        };

        let entries = decode_files(&payload).map_err(|e| {
            warn!("Couldn't decode ListFiles payload: {}", e);
            CourierError::InvalidPayload {
                operation: "ListFiles".to_string(),
                message: e.to_string(),
            }
        })?;

        self.cache.put(device_id, storage_id, parent_id, entries.clone());
        Ok(entries)
    }

    /// Object id of the folder called `name` directly under `parent_id`, if any.
    pub async fn find_folder(
        &self,
        device_id: DeviceId,
        storage_id: u32,
        parent_id: u32,
        name: &str,
    ) -> Result<Option<u32>, CourierError> {
        let entries = self.list(device_id, storage_id, parent_id).await?;
        Ok(entries
            .into_iter()
            .find(|e| e.is_directory && e.name == name)
            .map(|e| e.object_id))
    }
}
