//! Transfer task model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Upload,
    Download,
}

/// Why a task ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum FailureReason {
    CannotReadSource { message: String },
    CannotCreateDirectory { message: String },
    CannotReplaceExisting { message: String },
    FileAlreadyExists,
    DeviceDisconnected,
    /// The transport call returned a non-success code.
    TransferFailed,
    /// The transport reported success but the local file is missing or empty.
    CorruptedDownload,
    /// Directory upload where no file made it.
    AllFilesFailed { failed: usize },
    /// The remote folder for a directory upload couldn't be found or created.
    TargetFolderFailed { name: String },
}

impl FailureReason {
    pub fn user_message(&self) -> String {
        match self {
            Self::CannotReadSource { message } => format!("Couldn't read the source file: {message}"),
            Self::CannotCreateDirectory { message } => format!("Couldn't create the destination folder: {message}"),
            Self::CannotReplaceExisting { message } => format!("Couldn't replace the existing file: {message}"),
            Self::FileAlreadyExists => "A file with this name already exists.".to_string(),
            Self::DeviceDisconnected => "The device was disconnected.".to_string(),
            Self::TransferFailed => "The transfer failed.".to_string(),
            Self::CorruptedDownload => "The downloaded file is empty or missing.".to_string(),
            Self::AllFilesFailed { failed } => format!("None of the {failed} files could be uploaded."),
            Self::TargetFolderFailed { name } => format!("Couldn't create folder \"{name}\" on the device."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum TransferStatus {
    Pending,
    Transferring,
    Completed,
    Failed { reason: FailureReason },
    Cancelled,
}

impl TransferStatus {
    pub fn failed(reason: FailureReason) -> Self {
        Self::Failed { reason }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. } | Self::Cancelled)
    }
}

/// One tracked transfer: a single file, or a whole directory upload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferTask {
    pub id: Uuid,
    pub direction: Direction,
    /// True for the aggregate task of a directory upload.
    pub is_directory: bool,
    pub file_name: String,
    pub source: String,
    pub destination: String,
    pub total_size: u64,
    pub transferred: u64,
    pub status: TransferStatus,
    /// Bytes per second since the task started.
    pub speed: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip)]
    cancel: Arc<AtomicBool>,
}

impl TransferTask {
    pub fn new(
        direction: Direction,
        file_name: impl Into<String>,
        source: impl Into<String>,
        destination: impl Into<String>,
        total_size: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            direction,
            is_directory: false,
            file_name: file_name.into(),
            source: source.into(),
            destination: destination.into(),
            total_size,
            transferred: 0,
            status: TransferStatus::Pending,
            speed: 0.0,
            start_time: None,
            end_time: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn directory(mut self) -> Self {
        self.is_directory = true;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 0.0 to 1.0.
    pub fn progress(&self) -> f64 {
        if self.total_size == 0 {
            return if self.status == TransferStatus::Completed { 1.0 } else { 0.0 };
        }
        (self.transferred as f64 / self.total_size as f64).min(1.0)
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub(crate) fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// `Pending -> Transferring`. The start time is recorded only the first time.
    pub fn start(&mut self) -> bool {
        if self.status != TransferStatus::Pending {
            return false;
        }
        self.status = TransferStatus::Transferring;
        if self.start_time.is_none() {
            self.start_time = Some(Utc::now());
        }
        true
    }

    /// Progress never goes backwards and never exceeds the total.
    pub fn update_progress(&mut self, transferred: u64) {
        if self.is_terminal() {
            return;
        }
        let clamped = transferred.min(self.total_size);
        if clamped <= self.transferred {
            return;
        }
        self.transferred = clamped;
        if let Some(start) = self.start_time {
            let elapsed = (Utc::now() - start).num_milliseconds();
            if elapsed > 0 {
                self.speed = self.transferred as f64 / (elapsed as f64 / 1000.0);
            }
        }
    }

    /// Moves to a terminal status. Returns `false` (and changes nothing) if already terminal.
    pub fn finish(&mut self, status: TransferStatus) -> bool {
        if self.is_terminal() || !status.is_terminal() {
            return false;
        }
        if status == TransferStatus::Completed {
            self.update_progress(self.total_size);
        }
        self.status = status;
        self.end_time = Some(Utc::now());
        true
    }
}
