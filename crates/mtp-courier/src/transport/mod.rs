//! Boundary to the native MTP bridge.
//!
//! The bridge is synchronous: every call blocks until the device answers. Callers run
//! these on blocking worker threads (`tokio::task::spawn_blocking`), never on the poll
//! timer or the async runtime's core threads.
//!
//! - `bridge_string`: ownership of bridge-allocated strings
//! - `wire`: JSON records returned by `scan` and `list_files`
//! - `kalam`: the FFI binding (feature `kalam`)

pub mod bridge_string;
#[cfg(feature = "kalam")]
pub mod kalam;
pub mod wire;

use std::path::Path;

#[cfg(feature = "kalam")]
pub use kalam::KalamBridge;

/// The operations the native bridge exposes.
///
/// Integer results follow the bridge's convention: a positive value is success (or, for
/// `create_folder`, the new object id), anything else is failure.
pub trait Transport: Send + Sync {
    /// JSON array of devices, or `None` if the bridge couldn't talk to USB at all.
    fn scan(&self) -> Option<String>;
    /// JSON array of entries under `parent_id`, or `None` on failure.
    fn list_files(&self, storage_id: u32, parent_id: u32) -> Option<String>;
    fn upload_file(&self, storage_id: u32, parent_id: u32, source: &Path, task_id: &str) -> i32;
    fn download_file(&self, object_id: u32, destination: &Path, task_id: &str) -> i32;
    /// Returns the new object id, or 0 on failure.
    fn create_folder(&self, storage_id: u32, parent_id: u32, name: &str) -> u32;
    fn delete_object(&self, object_id: u32) -> i32;
    /// Best effort; the in-flight call may still run to completion.
    fn cancel_task(&self, task_id: &str);
    fn refresh_storage(&self, storage_id: u32) -> i32;
    fn reset_device_cache(&self) -> i32;
}
