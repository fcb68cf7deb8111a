// Warn on redundant path prefixes (e.g., std::path::Path when Path is imported)
#![warn(unused_qualifications)]
// Use log::* macros instead of println!/eprintln! for proper log level control
#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Device discovery, directory caching and transfer orchestration for MTP devices.
//!
//! The protocol work happens in a native bridge behind the [`transport::Transport`]
//! trait. This crate polls it for devices, caches folder listings, and turns upload,
//! download and delete requests into tracked, cancellable tasks. [`Courier`] wires the
//! services together.

pub mod cache;
pub mod config;
mod courier;
pub mod errors;
pub mod events;
mod ignore_poison;
pub mod listing;
pub mod registry;
#[cfg(test)]
mod test_support;
pub mod transfer;
pub mod transport;
pub mod types;

pub use courier::Courier;
pub use errors::{AdmissionError, CourierError};
pub use events::{BroadcastEvents, CourierEvent, EventSink};
pub use transfer::{DirectoryUploadResult, TransferStatus, TransferTask};
pub use types::{Device, DeviceId, FileEntry, Storage};
