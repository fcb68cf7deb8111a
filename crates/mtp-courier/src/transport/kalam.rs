//! FFI binding to the native Kalam bridge.
//!
//! This is the only module that touches raw pointers. Strings going in are borrowed
//! `CString`s that live for the duration of the call; strings coming out are wrapped in
//! [`BridgeString`](super::bridge_string::BridgeString) and freed through `Kalam_FreeString`.

use log::{debug, warn};
use std::ffi::{CString, c_char};
use std::path::Path;

use super::Transport;
use super::bridge_string::take_bridge_string;

#[link(name = "kalam")]
unsafe extern "C" {
    fn Kalam_Init();
    fn Kalam_Scan() -> *mut c_char;
    fn Kalam_ListFiles(storage_id: u32, parent_id: u32) -> *mut c_char;
    fn Kalam_FreeString(s: *mut c_char);
    fn Kalam_CreateFolder(storage_id: u32, parent_id: u32, name: *mut c_char) -> u32;
    fn Kalam_DeleteObject(object_id: u32) -> i32;
    fn Kalam_DownloadFile(object_id: u32, destination: *mut c_char, task_id: *mut c_char) -> i32;
    fn Kalam_UploadFile(storage_id: u32, parent_id: u32, source: *mut c_char, task_id: *mut c_char) -> i32;
    fn Kalam_CancelTask(task_id: *mut c_char);
    fn Kalam_RefreshStorage(storage_id: u32) -> i32;
    fn Kalam_ResetDeviceCache() -> i32;
}

unsafe extern "C" fn free_kalam_string(s: *mut c_char) {
    // SAFETY: only called by BridgeString with a pointer Kalam allocated.
    unsafe { Kalam_FreeString(s) }
}

/// Converts a Rust string for the bridge. Interior NULs can't cross the boundary.
fn to_c_string(value: &str, what: &str) -> Option<CString> {
    match CString::new(value) {
        Ok(s) => Some(s),
        Err(_) => {
            warn!("Kalam: {} contains a NUL byte, not calling the bridge", what);
            None
        }
    }
}

fn path_to_c_string(path: &Path, what: &str) -> Option<CString> {
    to_c_string(&path.to_string_lossy(), what)
}

/// The bridge's calls take `char *` but never write through them.
fn as_mut_ptr(s: &CString) -> *mut c_char {
    s.as_ptr().cast_mut()
}

pub struct KalamBridge {
    _private: (),
}

impl KalamBridge {
    /// Initializes the bridge. Call once per process.
    pub fn init() -> Self {
        // SAFETY: no arguments; the bridge guards against repeated init itself.
        unsafe { Kalam_Init() };
        debug!("Kalam bridge initialized");
        Self { _private: () }
    }
}

impl Transport for KalamBridge {
    fn scan(&self) -> Option<String> {
        // SAFETY: the returned pointer is owned by us and freed by take_bridge_string.
        unsafe { take_bridge_string(Kalam_Scan(), free_kalam_string) }
    }

    fn list_files(&self, storage_id: u32, parent_id: u32) -> Option<String> {
        // SAFETY: as above.
        unsafe { take_bridge_string(Kalam_ListFiles(storage_id, parent_id), free_kalam_string) }
    }

    fn upload_file(&self, storage_id: u32, parent_id: u32, source: &Path, task_id: &str) -> i32 {
        let (Some(source), Some(task)) = (path_to_c_string(source, "source path"), to_c_string(task_id, "task id"))
        else {
            return 0;
        };
        // SAFETY: both strings outlive the call.
        unsafe { Kalam_UploadFile(storage_id, parent_id, as_mut_ptr(&source), as_mut_ptr(&task)) }
    }

    fn download_file(&self, object_id: u32, destination: &Path, task_id: &str) -> i32 {
        let (Some(dest), Some(task)) = (
            path_to_c_string(destination, "destination path"),
            to_c_string(task_id, "task id"),
        ) else {
            return 0;
        };
        // SAFETY: both strings outlive the call.
        unsafe { Kalam_DownloadFile(object_id, as_mut_ptr(&dest), as_mut_ptr(&task)) }
    }

    fn create_folder(&self, storage_id: u32, parent_id: u32, name: &str) -> u32 {
        let Some(name) = to_c_string(name, "folder name") else {
            return 0;
        };
        // SAFETY: the string outlives the call.
        unsafe { Kalam_CreateFolder(storage_id, parent_id, as_mut_ptr(&name)) }
    }

    fn delete_object(&self, object_id: u32) -> i32 {
        // SAFETY: plain integer call.
        unsafe { Kalam_DeleteObject(object_id) }
    }

    fn cancel_task(&self, task_id: &str) {
        if let Some(task) = to_c_string(task_id, "task id") {
            // SAFETY: the string outlives the call.
            unsafe { Kalam_CancelTask(as_mut_ptr(&task)) }
        }
    }

    fn refresh_storage(&self, storage_id: u32) -> i32 {
        // SAFETY: plain integer call.
        unsafe { Kalam_RefreshStorage(storage_id) }
    }

    fn reset_device_cache(&self) -> i32 {
        // SAFETY: plain call.
        unsafe { Kalam_ResetDeviceCache() }
    }
}
