//! JSON records produced by the native bridge.
//!
//! The bridge serializes nil slices as `null`, so list fields accept `null` as empty.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::types::{FileEntry, MtpSupport, Storage, file_type_label};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireDevice {
    /// Bridge-local index; not stable across polls.
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub storage: Vec<WireStorage>,
    #[serde(default)]
    pub mtp_support: Option<WireMtpSupport>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireStorage {
    pub id: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub free_space: u64,
    #[serde(default)]
    pub max_capacity: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMtpSupport {
    #[serde(default)]
    pub mtp_version: String,
    #[serde(default)]
    pub device_version: String,
    #[serde(default)]
    pub vendor_extension: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFile {
    pub id: u32,
    pub parent_id: u32,
    pub storage_id: u32,
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub is_folder: bool,
    /// Epoch seconds; zero or negative means "no date".
    #[serde(default)]
    pub mod_time: i64,
}

impl From<WireStorage> for Storage {
    fn from(s: WireStorage) -> Self {
        Storage {
            storage_id: s.id,
            max_capacity: s.max_capacity,
            free_space: s.free_space,
            description: s.description,
        }
    }
}

impl From<WireMtpSupport> for MtpSupport {
    fn from(m: WireMtpSupport) -> Self {
        MtpSupport {
            mtp_version: m.mtp_version,
            device_version: m.device_version,
            vendor_extension: m.vendor_extension,
        }
    }
}

impl WireFile {
    /// Converts to a listing entry. Entries without a name are dropped.
    pub fn into_entry(self) -> Option<FileEntry> {
        if self.name.is_empty() {
            return None;
        }
        let modified = if self.mod_time > 0 {
            DateTime::<Utc>::from_timestamp(self.mod_time, 0)
        } else {
            None
        };
        let file_type = file_type_label(&self.name, self.is_folder);
        Some(FileEntry {
            object_id: self.id,
            parent_id: self.parent_id,
            storage_id: self.storage_id,
            size: if self.is_folder { 0 } else { self.size },
            name: self.name,
            modified,
            is_directory: self.is_folder,
            file_type,
        })
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decodes a `Scan` payload. A JSON `null` means no devices.
pub fn decode_devices(payload: &str) -> Result<Vec<WireDevice>, serde_json::Error> {
    Ok(serde_json::from_str::<Option<Vec<WireDevice>>>(payload)?.unwrap_or_default())
}

/// Decodes a `ListFiles` payload. A JSON `null` means an empty folder.
pub fn decode_files(payload: &str) -> Result<Vec<FileEntry>, serde_json::Error> {
    let files = serde_json::from_str::<Option<Vec<WireFile>>>(payload)?.unwrap_or_default();
    Ok(files.into_iter().filter_map(WireFile::into_entry).collect())
}
