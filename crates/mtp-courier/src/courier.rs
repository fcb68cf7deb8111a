//! Composition root.

use log::info;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::cache::DirectoryCache;
use crate::config::CourierConfig;
use crate::errors::CourierError;
use crate::events::{BroadcastEvents, CourierEvent};
use crate::registry::{DeviceRegistry, TransferCanceller};
use crate::transfer::TransferOrchestrator;
use crate::transport::Transport;
use crate::types::{Device, DeviceId, FileEntry};

/// Owns one instance of every service, wired to a single transport.
pub struct Courier {
    config: CourierConfig,
    events: Arc<BroadcastEvents>,
    cache: Arc<DirectoryCache>,
    orchestrator: Arc<TransferOrchestrator>,
    registry: Arc<DeviceRegistry>,
}

impl Courier {
    pub fn new(transport: Arc<dyn Transport>, config: CourierConfig) -> Self {
        let config = config.sanitized();
        let events = Arc::new(BroadcastEvents::new(config.event_channel_capacity));
        let cache = Arc::new(DirectoryCache::new(config.listing_cache_ttl()));
        let orchestrator = Arc::new(TransferOrchestrator::new(
            Arc::clone(&transport),
            Arc::clone(&cache),
            events.clone(),
            &config,
        ));
        let canceller: Arc<dyn TransferCanceller> = orchestrator.clone();
        let registry = Arc::new(DeviceRegistry::new(
            transport,
            Arc::clone(&cache),
            events.clone(),
            canceller,
            &config,
        ));
        Self {
            config,
            events,
            cache,
            orchestrator,
            registry,
        }
    }

    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<TransferOrchestrator> {
        &self.orchestrator
    }

    pub fn cache(&self) -> &Arc<DirectoryCache> {
        &self.cache
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CourierEvent> {
        self.events.subscribe()
    }

    /// Starts device polling. Must be called from within a tokio runtime.
    pub fn start(&self) {
        self.registry.start_polling();
    }

    /// Stops polling and cancels every active transfer.
    pub fn shutdown(&self) {
        self.registry.stop_polling();
        self.orchestrator.cancel_all();
        info!("Courier shut down");
    }

    pub fn selected_device(&self) -> Option<Device> {
        self.registry.selected_device()
    }

    /// Lists a folder of a device from the current scan.
    pub async fn list_directory(
        &self,
        device_id: DeviceId,
        storage_id: u32,
        parent_id: u32,
    ) -> Result<Vec<FileEntry>, CourierError> {
        let device = self
            .registry
            .device(device_id)
            .ok_or(CourierError::DeviceNotFound { device_id })?;
        if device.storage(storage_id).is_none() {
            return Err(CourierError::StorageNotFound { storage_id });
        }
        self.orchestrator.list_directory(device_id, storage_id, parent_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ROOT_PARENT_ID;
    use crate::test_support::FakeTransport;
    use crate::transfer::{Direction, TransferStatus, TransferTask};

    const STORAGE: u32 = 0x10001;

    fn courier() -> (Arc<FakeTransport>, Courier) {
        let fake = Arc::new(FakeTransport::new());
        let config = CourierConfig {
            settle_delay_ms: 0,
            permitted_roots: Some(Vec::new()),
            ..CourierConfig::default()
        };
        let courier = Courier::new(fake.clone(), config);
        (fake, courier)
    }

    #[tokio::test]
    async fn test_list_directory_for_scanned_device() {
        let (fake, courier) = courier();
        fake.push_devices(&[FakeTransport::device_json(0, "Pixel", STORAGE, 1024)]);
        fake.add_file(STORAGE, ROOT_PARENT_ID, 9, "notes.txt", 3);
        courier.registry().scan_once().await;
        let device = courier.selected_device().unwrap();

        let entries = courier.list_directory(device.id, STORAGE, ROOT_PARENT_ID).await.unwrap();
        assert_eq!(entries.len(), 1);

        let err = courier
            .list_directory(DeviceId::new_v4(), STORAGE, ROOT_PARENT_ID)
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::DeviceNotFound { .. }));

        let err = courier.list_directory(device.id, 0x99, ROOT_PARENT_ID).await.unwrap_err();
        assert_eq!(err, CourierError::StorageNotFound { storage_id: 0x99 });
    }

    #[tokio::test]
    async fn test_disconnect_cancels_active_transfers() {
        let (fake, courier) = courier();
        fake.push_devices(&[FakeTransport::device_json(0, "Pixel", STORAGE, 1024)]);
        courier.registry().scan_once().await;
        let device_id = courier.selected_device().unwrap().id;
        courier.list_directory(device_id, STORAGE, ROOT_PARENT_ID).await.unwrap();
        let task_id = courier
            .orchestrator()
            .board()
            .add(TransferTask::new(Direction::Download, "a.jpg", "Pixel/1", "/tmp/a.jpg", 5));
        let mut events = courier.subscribe();

        fake.push_devices(&[]);
        courier.registry().scan_once().await;

        assert!(courier.registry().devices().is_empty());
        assert!(courier.selected_device().is_none());
        assert!(courier.cache().is_empty());
        assert_eq!(
            courier.orchestrator().task(task_id).map(|t| t.status),
            Some(TransferStatus::Cancelled)
        );

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.name());
        }
        assert!(names.contains(&"device-disconnected"));
        assert!(names.contains(&"task-list-changed"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_polling() {
        let (_fake, courier) = courier();
        courier.start();
        assert!(courier.registry().is_polling());
        courier.shutdown();
        assert!(!courier.registry().is_polling());
    }
}
