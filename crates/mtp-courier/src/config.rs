//! Runtime configuration.
//!
//! Every field has a default, so a partial (or missing) settings file is fine. Values read
//! from disk go through [`CourierConfig::sanitized`] before use.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Object id the bridge uses for "device root", both for listing and as an upload parent.
pub const ROOT_PARENT_ID: u32 = 0xFFFF_FFFF;

/// 10 GiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024 * 1024;

pub const DEFAULT_MAX_PATH_BYTES: usize = 4096;

const CONFIG_DIR_NAME: &str = "mtp-courier";
const CONFIG_FILE_NAME: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CourierConfig {
    /// Poll interval with no device attached, and the backoff base.
    pub min_scan_interval_secs: f64,
    /// Poll interval once at least one device is present.
    pub connected_scan_interval_secs: f64,
    /// Upper bound for the backoff interval.
    pub max_scan_interval_secs: f64,
    /// The poll timer is only rescheduled when the interval moves by more than this.
    pub reschedule_tolerance_secs: f64,
    /// Consecutive failures before automatic polling stops.
    pub max_failures_before_manual_refresh: u32,
    pub max_file_size: u64,
    pub max_path_bytes: usize,
    /// Directories uploads may come from and downloads may land in. `None` means the
    /// user's Downloads, Desktop and Documents folders.
    pub permitted_roots: Option<Vec<PathBuf>>,
    /// `None` keeps listings until the next invalidation.
    pub listing_cache_ttl_secs: Option<u64>,
    /// Pause after a transfer before telling the UI to reload, so the bridge's
    /// free-space counters catch up.
    pub settle_delay_ms: u64,
    pub event_channel_capacity: usize,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            min_scan_interval_secs: 3.0,
            connected_scan_interval_secs: 5.0,
            max_scan_interval_secs: 30.0,
            reschedule_tolerance_secs: 0.5,
            max_failures_before_manual_refresh: 3,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_path_bytes: DEFAULT_MAX_PATH_BYTES,
            permitted_roots: None,
            listing_cache_ttl_secs: Some(60),
            settle_delay_ms: 500,
            event_channel_capacity: 256,
        }
    }
}

impl CourierConfig {
    /// Clamps values that would break the scan-interval invariants.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if !(self.min_scan_interval_secs.is_finite() && self.min_scan_interval_secs >= 1.0) {
            warn!(
                "Invalid minScanIntervalSecs {}, using {}",
                self.min_scan_interval_secs, defaults.min_scan_interval_secs
            );
            self.min_scan_interval_secs = defaults.min_scan_interval_secs;
        }
        if !(self.max_scan_interval_secs.is_finite() && self.max_scan_interval_secs >= self.min_scan_interval_secs) {
            self.max_scan_interval_secs = self.min_scan_interval_secs.max(defaults.max_scan_interval_secs);
        }
        if !self.connected_scan_interval_secs.is_finite() {
            self.connected_scan_interval_secs = defaults.connected_scan_interval_secs;
        }
        self.connected_scan_interval_secs = self
            .connected_scan_interval_secs
            .clamp(self.min_scan_interval_secs, self.max_scan_interval_secs);
        if !(self.reschedule_tolerance_secs.is_finite() && self.reschedule_tolerance_secs >= 0.0) {
            self.reschedule_tolerance_secs = defaults.reschedule_tolerance_secs;
        }
        if self.max_failures_before_manual_refresh == 0 {
            self.max_failures_before_manual_refresh = 1;
        }
        if self.max_path_bytes == 0 {
            self.max_path_bytes = DEFAULT_MAX_PATH_BYTES;
        }
        if self.event_channel_capacity == 0 {
            self.event_channel_capacity = defaults.event_channel_capacity;
        }
        self
    }

    pub fn min_scan_interval(&self) -> Duration {
        Duration::from_secs_f64(self.min_scan_interval_secs)
    }

    pub fn connected_scan_interval(&self) -> Duration {
        Duration::from_secs_f64(self.connected_scan_interval_secs)
    }

    pub fn max_scan_interval(&self) -> Duration {
        Duration::from_secs_f64(self.max_scan_interval_secs)
    }

    pub fn reschedule_tolerance(&self) -> Duration {
        Duration::from_secs_f64(self.reschedule_tolerance_secs)
    }

    pub fn listing_cache_ttl(&self) -> Option<Duration> {
        self.listing_cache_ttl_secs.map(Duration::from_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// The configured roots, or the user's Downloads/Desktop/Documents folders.
    pub fn resolved_permitted_roots(&self) -> Vec<PathBuf> {
        match &self.permitted_roots {
            Some(roots) => roots.clone(),
            None => [dirs::download_dir(), dirs::desktop_dir(), dirs::document_dir()]
                .into_iter()
                .flatten()
                .collect(),
        }
    }
}

/// `<config dir>/mtp-courier/settings.json`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Loads settings from a JSON file.
/// Returns defaults if the file doesn't exist or can't be parsed.
pub fn load_config(path: &Path) -> CourierConfig {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            debug!("No config at {} ({}), using defaults", path.display(), e);
            return CourierConfig::default();
        }
    };

    match serde_json::from_str::<CourierConfig>(&contents) {
        Ok(config) => config.sanitized(),
        Err(e) => {
            warn!("Ignoring malformed config {}: {}", path.display(), e);
            CourierConfig::default()
        }
    }
}
