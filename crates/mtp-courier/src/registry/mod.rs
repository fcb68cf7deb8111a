//! Device registry: polls the transport and keeps the list of connected devices.
//!
//! One poll loop runs at a time. Each tick does a single [`DeviceRegistry::scan_once`],
//! then sleeps for whatever interval the resulting [`ScanState`] asks for. After enough
//! consecutive failures the loop exits and stays stopped until
//! [`DeviceRegistry::manual_refresh`].
//!
//! Stopping is cooperative: a stop request only interrupts the sleep, so a scan that has
//! started always records its outcome.
//!
//! Device identity: the bridge reports devices by a local index that it may reassign. We
//! map each index to a UUID the first time we see it and keep that mapping for the life
//! of the process.

mod scan_state;

pub use scan_state::{ScanPhase, ScanPolicy, ScanState};

use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cache::DirectoryCache;
use crate::config::CourierConfig;
use crate::errors::CourierError;
use crate::events::{CourierEvent, EventSink};
use crate::ignore_poison::{IgnorePoison, IgnorePoisonRw};
use crate::transport::Transport;
use crate::transport::wire::{WireDevice, decode_devices};
use crate::types::{Device, DeviceId};

/// Cancels in-flight transfers when the selected device goes away.
pub trait TransferCanceller: Send + Sync {
    fn cancel_all(&self);
}

#[derive(Debug, Default)]
struct DeviceSet {
    devices: Vec<Device>,
    selected: Option<DeviceId>,
    /// Shown until the user selects a device or refreshes.
    connection_error: Option<String>,
}

/// Serializable view of the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub devices: Vec<Device>,
    pub selected: Option<DeviceId>,
    pub connection_error: Option<String>,
    pub phase: ScanPhase,
    pub interval_secs: f64,
    pub consecutive_failures: u32,
    pub manual_refresh_required: bool,
    pub has_scanned_once: bool,
}

/// A running poll loop and the signal that ends it.
struct Poller {
    stop: Arc<Notify>,
    join: JoinHandle<()>,
}

impl Poller {
    fn stop(&self) {
        // notify_one keeps a permit, so a loop that is mid-scan stops at its next sleep.
        self.stop.notify_one();
    }
}

/// Puts the phase back if a scan's future is dropped before it records an outcome.
struct ScanInFlight<'a> {
    state: &'a Mutex<ScanState>,
    finished: bool,
}

impl Drop for ScanInFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let mut state = self.state.lock_ignore_poison();
            *state = state.abandon_scan();
            debug!("Scan abandoned before completing, phase is now {:?}", state.phase);
        }
    }
}

pub struct DeviceRegistry {
    transport: Arc<dyn Transport>,
    cache: Arc<DirectoryCache>,
    events: Arc<dyn EventSink>,
    canceller: Arc<dyn TransferCanceller>,
    policy: ScanPolicy,
    state: Mutex<ScanState>,
    devices: RwLock<DeviceSet>,
    /// Bridge index -> stable id. Never evicted.
    identities: Mutex<HashMap<i64, DeviceId>>,
    poller: Mutex<Option<Poller>>,
}

impl DeviceRegistry {
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: Arc<DirectoryCache>,
        events: Arc<dyn EventSink>,
        canceller: Arc<dyn TransferCanceller>,
        config: &CourierConfig,
    ) -> Self {
        let policy = ScanPolicy::from_config(config);
        Self {
            transport,
            cache,
            events,
            canceller,
            policy,
            state: Mutex::new(ScanState::initial(&policy)),
            devices: RwLock::new(DeviceSet::default()),
            identities: Mutex::new(HashMap::new()),
            poller: Mutex::new(None),
        }
    }

    /// Starts the poll loop on the current tokio runtime, replacing any running loop.
    ///
    /// A replaced loop that is mid-scan finishes that scan, then exits.
    pub fn start_polling(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        let stop = Arc::new(Notify::new());
        let stop_signal = Arc::clone(&stop);
        let join = tokio::spawn(async move {
            loop {
                registry.scan_once().await;
                let state = registry.scan_state();
                if state.manual_refresh_required {
                    warn!(
                        "Device polling stopped after {} consecutive failures, waiting for manual refresh",
                        state.consecutive_failures
                    );
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(state.interval) => {}
                    _ = stop_signal.notified() => {
                        debug!("Poll loop received stop signal");
                        break;
                    }
                }
            }
        });

        if let Some(previous) = self.poller.lock_ignore_poison().replace(Poller { stop, join }) {
            previous.stop();
        }
        info!("Device polling started");
    }

    pub fn stop_polling(&self) {
        if let Some(poller) = self.poller.lock_ignore_poison().take() {
            poller.stop();
            info!("Device polling stopped");
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poller
            .lock_ignore_poison()
            .as_ref()
            .is_some_and(|poller| !poller.join.is_finished())
    }

    /// Runs one scan. Returns `false` without calling the transport if a scan is already
    /// in flight or polling is waiting for a manual refresh.
    pub async fn scan_once(&self) -> bool {
        {
            let mut state = self.state.lock_ignore_poison();
            let Some(scanning) = state.begin_scan() else {
                debug!("Scan skipped, phase is {:?}", state.phase);
                return false;
            };
            *state = scanning;
        }
        let mut in_flight = ScanInFlight {
            state: &self.state,
            finished: false,
        };

        let transport = Arc::clone(&self.transport);
        let payload = match tokio::task::spawn_blocking(move || transport.scan()).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Scan task failed: {}", e);
                None
            }
        };

        let outcome = match payload {
            None => Err("The device bridge didn't respond".to_string()),
            Some(json) => decode_devices(&json).map_err(|e| {
                warn!("Couldn't decode Scan payload: {}", e);
                format!("Unreadable device list: {e}")
            }),
        };

        in_flight.finished = true;
        match outcome {
            Ok(records) => self.apply_scan(records),
            Err(reason) => self.apply_failure(reason),
        }
        self.emit_scan_state();
        true
    }

    /// Selects a device from the current list and clears any connection error.
    pub fn select_device(&self, device_id: DeviceId) -> Result<(), CourierError> {
        let (devices, selected) = {
            let mut set = self.devices.write_ignore_poison();
            if !set.devices.iter().any(|d| d.id == device_id) {
                return Err(CourierError::DeviceNotFound { device_id });
            }
            set.selected = Some(device_id);
            set.connection_error = None;
            (set.devices.clone(), set.selected)
        };
        info!("Selected device {}", device_id);
        self.events.emit(CourierEvent::DeviceListChanged { devices, selected });
        Ok(())
    }

    /// Clears the failure history and restarts polling at the minimum interval.
    pub fn manual_refresh(self: &Arc<Self>) {
        {
            let mut state = self.state.lock_ignore_poison();
            *state = state.after_manual_refresh(&self.policy);
        }
        self.devices.write_ignore_poison().connection_error = None;
        info!("Manual refresh requested");
        self.emit_scan_state();
        self.start_polling();
    }

    pub fn scan_state(&self) -> ScanState {
        self.state.lock_ignore_poison().clone()
    }

    pub fn devices(&self) -> Vec<Device> {
        self.devices.read_ignore_poison().devices.clone()
    }

    pub fn device(&self, device_id: DeviceId) -> Option<Device> {
        self.devices
            .read_ignore_poison()
            .devices
            .iter()
            .find(|d| d.id == device_id)
            .cloned()
    }

    pub fn selected_device(&self) -> Option<Device> {
        let set = self.devices.read_ignore_poison();
        let selected = set.selected?;
        set.devices.iter().find(|d| d.id == selected).cloned()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.scan_state();
        let set = self.devices.read_ignore_poison();
        RegistrySnapshot {
            devices: set.devices.clone(),
            selected: set.selected,
            connection_error: set.connection_error.clone(),
            phase: state.phase,
            interval_secs: state.interval.as_secs_f64(),
            consecutive_failures: state.consecutive_failures,
            manual_refresh_required: state.manual_refresh_required,
            has_scanned_once: state.has_scanned_once,
        }
    }

    /// A clean decode counts as success even when the list is empty, so an empty bus
    /// resets the failure counter (unless the selected device just vanished).
    fn apply_scan(&self, records: Vec<WireDevice>) {
        let devices = self.reconcile(records);
        let ids: Vec<DeviceId> = devices.iter().map(|d| d.id).collect();

        let selected = self.devices.read_ignore_poison().selected;
        if let Some(selected) = selected
            && !ids.contains(&selected)
        {
            info!("Selected device {} is gone ({} device(s) remain)", selected, ids.len());
            self.disconnect(Some(selected), "The device was disconnected".to_string());
            let mut state = self.state.lock_ignore_poison();
            *state = state.after_disconnect(&self.policy, ids);
            return;
        }

        let changed = {
            let mut guard = self.devices.write_ignore_poison();
            let set = &mut *guard;
            let changed = set.devices != devices;
            set.devices = devices;
            if set.selected.is_none()
                && let [only] = set.devices.as_slice()
            {
                info!("Auto-selected the only device: {}", only.display_name());
                set.selected = Some(only.id);
                set.connection_error = None;
                true
            } else {
                changed
            }
        };

        {
            let mut state = self.state.lock_ignore_poison();
            *state = state.after_success(&self.policy, ids);
        }

        if changed {
            let set = self.devices.read_ignore_poison();
            debug!("Device list changed, {} device(s)", set.devices.len());
            self.events.emit(CourierEvent::DeviceListChanged {
                devices: set.devices.clone(),
                selected: set.selected,
            });
        }
    }

    fn apply_failure(&self, reason: String) {
        let (had_devices, selected) = {
            let set = self.devices.read_ignore_poison();
            (!set.devices.is_empty() || set.selected.is_some(), set.selected)
        };
        if had_devices {
            self.disconnect(selected, reason);
        } else {
            debug!("Scan failed with no devices known: {}", reason);
        }

        let mut state = self.state.lock_ignore_poison();
        *state = state.after_failure(&self.policy);
        debug!(
            "Scan failure #{}, next scan in {:?}",
            state.consecutive_failures, state.interval
        );
    }

    /// Clears devices, selection and every cached listing, and cancels all transfers.
    fn disconnect(&self, device_id: Option<DeviceId>, reason: String) {
        {
            let mut set = self.devices.write_ignore_poison();
            set.devices.clear();
            set.selected = None;
            set.connection_error = Some(reason);
        }
        self.cache.clear();
        self.canceller.cancel_all();

        self.events.emit(CourierEvent::DeviceDisconnected { device_id });
        self.events.emit(CourierEvent::DeviceListChanged {
            devices: Vec::new(),
            selected: None,
        });
    }

    /// Assigns stable ids to raw records.
    fn reconcile(&self, records: Vec<WireDevice>) -> Vec<Device> {
        let mut identities = self.identities.lock_ignore_poison();
        records
            .into_iter()
            .map(|record| {
                let id = *identities.entry(record.id).or_insert_with(|| {
                    let id = Uuid::new_v4();
                    debug!("New device index {} -> {}", record.id, id);
                    id
                });
                Device {
                    id,
                    index: record.id,
                    name: record.name,
                    manufacturer: record.manufacturer,
                    model: record.model,
                    serial_number: record.serial_number,
                    storages: record.storage.into_iter().map(Into::into).collect(),
                    mtp_support: record.mtp_support.map(Into::into),
                    is_connected: true,
                }
            })
            .collect()
    }

    fn emit_scan_state(&self) {
        let state = self.scan_state();
        self.events.emit(CourierEvent::ScanStateChanged {
            interval_secs: state.interval.as_secs_f64(),
            consecutive_failures: state.consecutive_failures,
            manual_refresh_required: state.manual_refresh_required,
        });
    }
}
