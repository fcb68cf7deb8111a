//! Directory listing cache, keyed by (device, storage, parent).
//!
//! Invalidation is always device-wide: after any mutation every listing of that device is
//! dropped, so a listing fetched before the mutation is never served after it.

use log::debug;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::ignore_poison::IgnorePoisonRw;
use crate::types::{DeviceId, FileEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ListingKey {
    device_id: DeviceId,
    storage_id: u32,
    parent_id: u32,
}

struct CachedListing {
    entries: Vec<FileEntry>,
    cached_at: Instant,
}

pub struct DirectoryCache {
    listings: RwLock<HashMap<ListingKey, CachedListing>>,
    /// `None` keeps entries until invalidated.
    ttl: Option<Duration>,
}

impl DirectoryCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            listings: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns the cached listing, unless it's absent or older than the TTL.
    pub fn get(&self, device_id: DeviceId, storage_id: u32, parent_id: u32) -> Option<Vec<FileEntry>> {
        let key = ListingKey {
            device_id,
            storage_id,
            parent_id,
        };
        let listings = self.listings.read_ignore_poison();
        let cached = listings.get(&key)?;
        if let Some(ttl) = self.ttl
            && cached.cached_at.elapsed() >= ttl
        {
            debug!(
                "Listing cache STALE for storage={:#x} parent={:#x} (age={:?})",
                storage_id,
                parent_id,
                cached.cached_at.elapsed()
            );
            return None;
        }
        Some(cached.entries.clone())
    }

    pub fn put(&self, device_id: DeviceId, storage_id: u32, parent_id: u32, entries: Vec<FileEntry>) {
        let key = ListingKey {
            device_id,
            storage_id,
            parent_id,
        };
        self.listings.write_ignore_poison().insert(
            key,
            CachedListing {
                entries,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drops every listing of `device_id`.
    pub fn invalidate(&self, device_id: DeviceId) {
        let mut listings = self.listings.write_ignore_poison();
        let before = listings.len();
        listings.retain(|key, _| key.device_id != device_id);
        debug!(
            "Invalidated {} cached listing(s) for device {}",
            before - listings.len(),
            device_id
        );
    }

    /// Drops everything. Used on disconnect.
    pub fn clear(&self) {
        self.listings.write_ignore_poison().clear();
    }

    pub fn len(&self) -> usize {
        self.listings.read_ignore_poison().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
