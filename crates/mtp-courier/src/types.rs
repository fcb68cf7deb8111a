//! Domain types shared by the registry, the listing cache and the transfer orchestrator.
//!
//! These are serialized to JSON (camelCase) for whatever front end consumes the events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Stable identifier of a device for the lifetime of the process.
///
/// Independent of the bridge's device index, which may be reassigned between polls.
pub type DeviceId = Uuid;

/// Information about a storage area on an MTP device.
///
/// Android devices typically have one or more storages: "Internal Storage", "SD Card", etc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Storage {
    /// MTP storage handle.
    pub storage_id: u32,
    /// In bytes.
    pub max_capacity: u64,
    /// In bytes.
    pub free_space: u64,
    /// For example, "Internal shared storage".
    pub description: String,
}

impl Storage {
    pub fn used_space(&self) -> u64 {
        self.max_capacity.saturating_sub(self.free_space)
    }

    /// 0.0 to 100.0. Zero when the capacity is unknown.
    pub fn usage_percentage(&self) -> f64 {
        if self.max_capacity == 0 {
            return 0.0;
        }
        self.used_space() as f64 / self.max_capacity as f64 * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MtpSupport {
    pub mtp_version: String,
    pub device_version: String,
    pub vendor_extension: String,
}

/// A connected MTP device as of the latest successful scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: DeviceId,
    /// Bridge-local ordinal. Not stable, only used to reconcile `id`.
    pub index: i64,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    /// Replaced wholesale on every scan.
    pub storages: Vec<Storage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtp_support: Option<MtpSupport>,
    pub is_connected: bool,
}

impl Device {
    /// Prefers the reported name, falls back to "manufacturer model".
    pub fn display_name(&self) -> String {
        if !self.name.is_empty() && self.name != "Unknown Device" {
            return self.name.clone();
        }
        format!("{} {}", self.manufacturer, self.model).trim().to_string()
    }

    pub fn storage(&self, storage_id: u32) -> Option<&Storage> {
        self.storages.iter().find(|s| s.storage_id == storage_id)
    }

    pub fn total_capacity(&self) -> u64 {
        self.storages.iter().map(|s| s.max_capacity).sum()
    }

    pub fn total_free_space(&self) -> u64 {
        self.storages.iter().map(|s| s.free_space).sum()
    }
}

/// A file or folder on the device, as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub object_id: u32,
    pub parent_id: u32,
    pub storage_id: u32,
    pub name: String,
    /// Always 0 for directories.
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    pub is_directory: bool,
    /// "folder", or the upper-cased extension ("JPG"), or empty.
    pub file_type: String,
}

impl FileEntry {
    /// `None` for directories, whose size the device doesn't report.
    pub fn display_size(&self) -> Option<u64> {
        if self.is_directory { None } else { Some(self.size) }
    }

    /// Size for space arithmetic: directories count as 0.
    pub fn arithmetic_size(&self) -> u64 {
        if self.is_directory { 0 } else { self.size }
    }

    pub fn formatted_size(&self) -> String {
        match self.display_size() {
            Some(size) => format_bytes(size),
            None => "--".to_string(),
        }
    }
}

/// Derives the type label shown for a listing entry.
pub fn file_type_label(name: &str, is_directory: bool) -> String {
    if is_directory {
        return "folder".to_string();
    }
    Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_uppercase())
        .unwrap_or_default()
}

/// Formats bytes in human-readable form.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.1} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
