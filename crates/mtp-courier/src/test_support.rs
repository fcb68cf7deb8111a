//! In-memory transport and collaborators for unit tests.

use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::events::{CourierEvent, EventSink};
use crate::ignore_poison::IgnorePoison;
use crate::registry::TransferCanceller;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub(crate) struct FakeObject {
    pub id: u32,
    pub parent_id: u32,
    pub storage_id: u32,
    pub name: String,
    pub size: u64,
    pub is_folder: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UploadCall {
    pub storage_id: u32,
    pub parent_id: u32,
    pub source: PathBuf,
    pub task_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DownloadBehavior {
    /// Writes the object's bytes and reports success.
    Write,
    /// Reports success but leaves an empty file behind.
    WriteEmpty,
    /// Reports failure without touching the destination.
    Fail,
}

type UploadHook = Arc<dyn Fn(&Path) + Send + Sync>;

struct FakeState {
    scan_queue: VecDeque<Option<String>>,
    default_scan: Option<String>,
    objects: Vec<FakeObject>,
    next_object_id: u32,
    listing_unavailable: bool,
    failing_uploads: HashSet<String>,
    failing_deletes: HashSet<u32>,
    create_folder_fails: bool,
    download_behavior: DownloadBehavior,
    upload_hook: Option<UploadHook>,
    scan_delay: Duration,
    uploads: Vec<UploadCall>,
    downloads: Vec<(u32, PathBuf)>,
    created_folders: Vec<(u32, u32, String)>,
    deleted: Vec<u32>,
    cancelled: Vec<String>,
    refreshed_storages: Vec<u32>,
    cache_resets: usize,
}

/// Scripted bridge. Holds a flat object tree and records every call.
pub(crate) struct FakeTransport {
    state: Mutex<FakeState>,
    scan_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                scan_queue: VecDeque::new(),
                default_scan: Some("[]".to_string()),
                objects: Vec::new(),
                next_object_id: 1000,
                listing_unavailable: false,
                failing_uploads: HashSet::new(),
                failing_deletes: HashSet::new(),
                create_folder_fails: false,
                download_behavior: DownloadBehavior::Write,
                upload_hook: None,
                scan_delay: Duration::ZERO,
                uploads: Vec::new(),
                downloads: Vec::new(),
                created_folders: Vec::new(),
                deleted: Vec::new(),
                cancelled: Vec::new(),
                refreshed_storages: Vec::new(),
                cache_resets: 0,
            }),
            scan_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// JSON for one device record with a single storage.
    pub fn device_json(index: i64, name: &str, storage_id: u32, free_space: u64) -> serde_json::Value {
        json!({
            "id": index,
            "name": name,
            "manufacturer": "Google",
            "model": "Pixel 8",
            "serialNumber": format!("SERIAL{index}"),
            "storage": [{
                "id": storage_id,
                "description": "Internal shared storage",
                "freeSpace": free_space,
                "maxCapacity": free_space * 2,
            }],
            "mtpSupport": null,
        })
    }

    /// Queues the payload for the next `scan` call.
    pub fn push_scan(&self, payload: Option<&str>) {
        self.state
            .lock_ignore_poison()
            .scan_queue
            .push_back(payload.map(str::to_string));
    }

    pub fn push_devices(&self, devices: &[serde_json::Value]) {
        self.push_scan(Some(&serde_json::Value::Array(devices.to_vec()).to_string()));
    }

    /// What `scan` returns once the queue is drained.
    pub fn set_default_scan(&self, payload: Option<&str>) {
        self.state.lock_ignore_poison().default_scan = payload.map(str::to_string);
    }

    pub fn add_folder(&self, storage_id: u32, parent_id: u32, id: u32, name: &str) {
        self.add_object(storage_id, parent_id, id, name, 0, true);
    }

    pub fn add_file(&self, storage_id: u32, parent_id: u32, id: u32, name: &str, size: u64) {
        self.add_object(storage_id, parent_id, id, name, size, false);
    }

    fn add_object(&self, storage_id: u32, parent_id: u32, id: u32, name: &str, size: u64, is_folder: bool) {
        self.state.lock_ignore_poison().objects.push(FakeObject {
            id,
            parent_id,
            storage_id,
            name: name.to_string(),
            size,
            is_folder,
        });
    }

    pub fn set_listing_unavailable(&self, unavailable: bool) {
        self.state.lock_ignore_poison().listing_unavailable = unavailable;
    }

    /// Uploads of a file with this name report failure.
    pub fn fail_upload_of(&self, file_name: &str) {
        self.state.lock_ignore_poison().failing_uploads.insert(file_name.to_string());
    }

    pub fn fail_delete_of(&self, object_id: u32) {
        self.state.lock_ignore_poison().failing_deletes.insert(object_id);
    }

    pub fn set_create_folder_fails(&self, fails: bool) {
        self.state.lock_ignore_poison().create_folder_fails = fails;
    }

    pub fn set_download_behavior(&self, behavior: DownloadBehavior) {
        self.state.lock_ignore_poison().download_behavior = behavior;
    }

    /// Called after every upload with the source path, outside the fake's lock.
    /// Makes every `scan` block the calling thread for `delay`, like a slow USB bus.
    pub fn set_scan_delay(&self, delay: Duration) {
        self.state.lock_ignore_poison().scan_delay = delay;
    }

    pub fn on_upload(&self, hook: impl Fn(&Path) + Send + Sync + 'static) {
        self.state.lock_ignore_poison().upload_hook = Some(Arc::new(hook));
    }

    pub fn objects(&self) -> Vec<FakeObject> {
        self.state.lock_ignore_poison().objects.clone()
    }

    pub fn uploads(&self) -> Vec<UploadCall> {
        self.state.lock_ignore_poison().uploads.clone()
    }

    pub fn downloads(&self) -> Vec<(u32, PathBuf)> {
        self.state.lock_ignore_poison().downloads.clone()
    }

    pub fn created_folders(&self) -> Vec<(u32, u32, String)> {
        self.state.lock_ignore_poison().created_folders.clone()
    }

    pub fn deleted(&self) -> Vec<u32> {
        self.state.lock_ignore_poison().deleted.clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.state.lock_ignore_poison().cancelled.clone()
    }

    pub fn refreshed_storages(&self) -> Vec<u32> {
        self.state.lock_ignore_poison().refreshed_storages.clone()
    }

    pub fn cache_resets(&self) -> usize {
        self.state.lock_ignore_poison().cache_resets
    }

    pub fn scan_calls(&self) -> usize {
        self.scan_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

impl Transport for FakeTransport {
    fn scan(&self) -> Option<String> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.state.lock_ignore_poison().scan_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut state = self.state.lock_ignore_poison();
        match state.scan_queue.pop_front() {
            Some(payload) => payload,
            None => state.default_scan.clone(),
        }
    }

    fn list_files(&self, storage_id: u32, parent_id: u32) -> Option<String> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock_ignore_poison();
        if state.listing_unavailable {
            return None;
        }
        let records: Vec<serde_json::Value> = state
            .objects
            .iter()
            .filter(|o| o.storage_id == storage_id && o.parent_id == parent_id)
            .map(|o| {
                json!({
                    "id": o.id,
                    "parentId": o.parent_id,
                    "storageId": o.storage_id,
                    "name": o.name,
                    "size": o.size,
                    "isFolder": o.is_folder,
                    "modTime": 1_700_000_000,
                })
            })
            .collect();
        Some(serde_json::Value::Array(records).to_string())
    }

    fn upload_file(&self, storage_id: u32, parent_id: u32, source: &Path, task_id: &str) -> i32 {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (result, hook) = {
            let mut state = self.state.lock_ignore_poison();
            state.uploads.push(UploadCall {
                storage_id,
                parent_id,
                source: source.to_path_buf(),
                task_id: task_id.to_string(),
            });
            let result = if state.failing_uploads.contains(&name) {
                0
            } else {
                let id = state.next_object_id;
                state.next_object_id += 1;
                let size = std::fs::metadata(source).map(|m| m.len()).unwrap_or(0);
                state.objects.push(FakeObject {
                    id,
                    parent_id,
                    storage_id,
                    name,
                    size,
                    is_folder: false,
                });
                1
            };
            (result, state.upload_hook.clone())
        };
        if let Some(hook) = hook {
            hook(source);
        }
        result
    }

    fn download_file(&self, object_id: u32, destination: &Path, _task_id: &str) -> i32 {
        let mut state = self.state.lock_ignore_poison();
        state.downloads.push((object_id, destination.to_path_buf()));
        let size = state.objects.iter().find(|o| o.id == object_id).map(|o| o.size);
        match (state.download_behavior, size) {
            (DownloadBehavior::Fail, _) | (_, None) => 0,
            (DownloadBehavior::WriteEmpty, Some(_)) => match std::fs::write(destination, b"") {
                Ok(()) => 1,
                Err(_) => 0,
            },
            (DownloadBehavior::Write, Some(size)) => {
                let bytes = vec![b'x'; size as usize];
                match std::fs::write(destination, bytes) {
                    Ok(()) => 1,
                    Err(_) => 0,
                }
            }
        }
    }

    fn create_folder(&self, storage_id: u32, parent_id: u32, name: &str) -> u32 {
        let mut state = self.state.lock_ignore_poison();
        state.created_folders.push((storage_id, parent_id, name.to_string()));
        if state.create_folder_fails {
            return 0;
        }
        let id = state.next_object_id;
        state.next_object_id += 1;
        state.objects.push(FakeObject {
            id,
            parent_id,
            storage_id,
            name: name.to_string(),
            size: 0,
            is_folder: true,
        });
        id
    }

    fn delete_object(&self, object_id: u32) -> i32 {
        let mut state = self.state.lock_ignore_poison();
        if state.failing_deletes.contains(&object_id) {
            return 0;
        }
        state.deleted.push(object_id);
        let before = state.objects.len();
        state.objects.retain(|o| o.id != object_id);
        if state.objects.len() < before { 1 } else { 0 }
    }

    fn cancel_task(&self, task_id: &str) {
        self.state.lock_ignore_poison().cancelled.push(task_id.to_string());
    }

    fn refresh_storage(&self, storage_id: u32) -> i32 {
        self.state.lock_ignore_poison().refreshed_storages.push(storage_id);
        1
    }

    fn reset_device_cache(&self) -> i32 {
        self.state.lock_ignore_poison().cache_resets += 1;
        1
    }
}

/// Keeps every emitted event.
#[derive(Default)]
pub(crate) struct RecordingEvents {
    events: Mutex<Vec<CourierEvent>>,
}

impl RecordingEvents {
    pub fn events(&self) -> Vec<CourierEvent> {
        self.events.lock_ignore_poison().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock_ignore_poison().iter().map(CourierEvent::name).collect()
    }

    pub fn clear(&self) {
        self.events.lock_ignore_poison().clear();
    }
}

impl EventSink for RecordingEvents {
    fn emit(&self, event: CourierEvent) {
        self.events.lock_ignore_poison().push(event);
    }
}

#[derive(Default)]
pub(crate) struct CountingCanceller {
    calls: AtomicUsize,
}

impl CountingCanceller {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TransferCanceller for CountingCanceller {
    fn cancel_all(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}
