//! Error types for device and transfer operations.

use serde::Serialize;
use std::path::Path;

use crate::types::{DeviceId, format_bytes};

/// Errors from device-level operations (selection, listing, folder creation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum CourierError {
    /// Device is not in the current scan result (may have been unplugged).
    DeviceNotFound { device_id: DeviceId },
    /// The bridge returned nothing for a call that must return a payload.
    TransportUnavailable { operation: String },
    /// The bridge returned a payload we couldn't decode.
    InvalidPayload { operation: String, message: String },
    /// The device has no storage with this id.
    StorageNotFound { storage_id: u32 },
    /// The bridge refused to create a folder.
    FolderCreationFailed { name: String },
    /// A folder name failed validation.
    InvalidName { name: String, reason: String },
    /// Other error.
    Other { message: String },
}

impl CourierError {
    /// Returns a user-friendly message for this error.
    pub fn user_message(&self) -> String {
        match self {
            Self::DeviceNotFound { .. } => "Device not found. It may have been unplugged.".to_string(),
            Self::TransportUnavailable { .. } => {
                "The device isn't responding. Check the USB cable and that file transfer mode is on.".to_string()
            }
            Self::InvalidPayload { .. } => "The device sent data we couldn't read. Try reconnecting.".to_string(),
            Self::StorageNotFound { .. } => "That storage is no longer available on the device.".to_string(),
            Self::FolderCreationFailed { name } => format!("Couldn't create folder \"{}\" on the device.", name),
            Self::InvalidName { reason, .. } => reason.clone(),
            Self::Other { message } => message.clone(),
        }
    }
}

impl std::fmt::Display for CourierError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeviceNotFound { device_id } => write!(f, "Device not found: {device_id}"),
            Self::TransportUnavailable { operation } => write!(f, "Transport returned nothing for {operation}"),
            Self::InvalidPayload { operation, message } => {
                write!(f, "Undecodable {operation} payload: {message}")
            }
            Self::StorageNotFound { storage_id } => write!(f, "Storage not found: {storage_id:#x}"),
            Self::FolderCreationFailed { name } => write!(f, "Folder creation failed: {name}"),
            Self::InvalidName { name, reason } => write!(f, "Invalid name \"{name}\": {reason}"),
            Self::Other { message } => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for CourierError {}

/// Why an upload or download intent was rejected before any task was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum AdmissionError {
    SourceMissing { path: String },
    NotRegularFile { path: String },
    FileTooLarge { size: u64, max: u64 },
    InsufficientSpace { needed: u64, available: u64 },
    StorageNotFound { storage_id: u32 },
    PathTooLong { bytes: usize, max: usize },
    ControlCharacter { path: String },
    RelativePath { path: String },
    PathTraversal { path: String },
    SymbolicLink { path: String },
    OutsidePermittedRoots { path: String },
    Unreadable { path: String, message: String },
    DestinationExists { path: String },
}

impl AdmissionError {
    pub(crate) fn unreadable(path: &Path, err: &std::io::Error) -> Self {
        Self::Unreadable {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SourceMissing { path } => write!(f, "File doesn't exist: {path}"),
            Self::NotRegularFile { path } => write!(f, "Not a regular file: {path}"),
            Self::FileTooLarge { size, max } => {
                write!(f, "File is {}, over the {} limit", format_bytes(*size), format_bytes(*max))
            }
            Self::InsufficientSpace { needed, available } => write!(
                f,
                "Insufficient storage space: needed {}, available {}",
                format_bytes(*needed),
                format_bytes(*available)
            ),
            Self::StorageNotFound { storage_id } => write!(f, "Storage not found: {storage_id:#x}"),
            Self::PathTooLong { bytes, max } => {
                write!(f, "Path is {} bytes, which exceeds the {} byte limit", bytes, max)
            }
            Self::ControlCharacter { path } => write!(f, "Path contains a control character: {path:?}"),
            Self::RelativePath { path } => write!(f, "Path is not absolute: {path}"),
            Self::PathTraversal { path } => write!(f, "Path contains parent directory (..): {path}"),
            Self::SymbolicLink { path } => write!(f, "Symbolic links aren't transferred: {path}"),
            Self::OutsidePermittedRoots { path } => {
                write!(f, "Path is outside the allowed folders: {path}")
            }
            Self::Unreadable { path, message } => write!(f, "Can't read {path}: {message}"),
            Self::DestinationExists { path } => write!(f, "A file already exists at {path}"),
        }
    }
}

impl std::error::Error for AdmissionError {}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_courier_error_display() {
        let err = CourierError::StorageNotFound { storage_id: 0x10001 };
        assert_eq!(err.to_string(), "Storage not found: 0x10001");

        let err = CourierError::TransportUnavailable {
            operation: "ListFiles".to_string(),
        };
        assert_eq!(err.to_string(), "Transport returned nothing for ListFiles");
    }

    #[test]
    fn test_courier_error_user_messages_are_not_empty() {
        let errors = vec![
            CourierError::DeviceNotFound {
                device_id: Uuid::new_v4(),
            },
            CourierError::TransportUnavailable {
                operation: "Scan".to_string(),
            },
            CourierError::InvalidPayload {
                operation: "Scan".to_string(),
                message: "eof".to_string(),
            },
            CourierError::StorageNotFound { storage_id: 1 },
            CourierError::FolderCreationFailed {
                name: "Photos".to_string(),
            },
            CourierError::InvalidName {
                name: "".to_string(),
                reason: "Name can't be empty".to_string(),
            },
            CourierError::Other {
                message: "boom".to_string(),
            },
        ];
        for err in errors {
            assert!(!err.to_string().is_empty());
            assert!(!err.user_message().is_empty());
        }
    }

    #[test]
    fn test_courier_error_serialization() {
        let err = CourierError::FolderCreationFailed {
            name: "Photos".to_string(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"type\":\"folderCreationFailed\""), "JSON: {}", json);
        assert!(json.contains("\"name\":\"Photos\""), "JSON: {}", json);
    }

    #[test]
    fn test_admission_error_display() {
        let err = AdmissionError::InsufficientSpace {
            needed: 2048,
            available: 1024,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient storage space: needed 2.0 KB, available 1.0 KB"
        );

        let err = AdmissionError::PathTooLong { bytes: 5000, max: 4096 };
        assert!(err.to_string().contains("4096"));
    }

    #[test]
    fn test_admission_error_serialization() {
        let err = AdmissionError::OutsidePermittedRoots {
            path: "/etc/passwd".to_string(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"kind\":\"outsidePermittedRoots\""), "JSON: {}", json);
    }
}
