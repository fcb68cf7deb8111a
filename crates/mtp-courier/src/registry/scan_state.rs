//! Poll scheduling and failure bookkeeping for the device registry.
//!
//! [`ScanState`] is an immutable snapshot. Every transition returns a new value, and the
//! registry swaps it in under one lock, so readers never see the interval and the failure
//! counter from two different transitions.

use serde::Serialize;
use std::time::Duration;

use crate::config::CourierConfig;
use crate::types::DeviceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanPhase {
    /// Waiting for the next timer fire.
    Idle,
    /// A `Scan` call is in flight.
    Scanning,
    /// The last scan failed; the interval has been stretched.
    Backoff,
    /// Polling stopped after too many failures. Only a manual refresh restarts it.
    ManualRefreshRequired,
}

/// Interval and threshold settings, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanPolicy {
    pub min_interval: Duration,
    pub connected_interval: Duration,
    pub max_interval: Duration,
    pub reschedule_tolerance: Duration,
    pub failure_threshold: u32,
}

impl ScanPolicy {
    pub fn from_config(config: &CourierConfig) -> Self {
        Self {
            min_interval: config.min_scan_interval(),
            connected_interval: config.connected_scan_interval(),
            max_interval: config.max_scan_interval(),
            reschedule_tolerance: config.reschedule_tolerance(),
            failure_threshold: config.max_failures_before_manual_refresh.max(1),
        }
    }

    /// `min * 2^failures`, capped at the maximum.
    pub fn backoff_interval(&self, failures: u32) -> Duration {
        // 2^5 already exceeds any sane max/min ratio; capping the shift avoids overflow.
        let factor = 1u32 << failures.min(16);
        self.min_interval.saturating_mul(factor).min(self.max_interval)
    }
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self::from_config(&CourierConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanState {
    pub phase: ScanPhase,
    /// The interval the poll timer is currently scheduled with.
    pub interval: Duration,
    pub consecutive_failures: u32,
    pub manual_refresh_required: bool,
    pub has_scanned_once: bool,
    /// Device ids reported by the latest decodable scan.
    pub last_device_ids: Vec<DeviceId>,
}

impl ScanState {
    pub fn initial(policy: &ScanPolicy) -> Self {
        Self {
            phase: ScanPhase::Idle,
            interval: policy.min_interval,
            consecutive_failures: 0,
            manual_refresh_required: false,
            has_scanned_once: false,
            last_device_ids: Vec::new(),
        }
    }

    /// `None` if a scan is already running or polling has given up.
    pub fn begin_scan(&self) -> Option<Self> {
        match self.phase {
            ScanPhase::Scanning | ScanPhase::ManualRefreshRequired => None,
            ScanPhase::Idle | ScanPhase::Backoff => Some(Self {
                phase: ScanPhase::Scanning,
                ..self.clone()
            }),
        }
    }

    /// A decodable device list came back and the selection (if any) is still present.
    pub fn after_success(&self, policy: &ScanPolicy, device_ids: Vec<DeviceId>) -> Self {
        let desired = if device_ids.is_empty() {
            policy.min_interval
        } else {
            policy.connected_interval
        };
        Self {
            phase: ScanPhase::Idle,
            interval: reschedule(self.interval, desired, policy.reschedule_tolerance),
            consecutive_failures: 0,
            manual_refresh_required: false,
            has_scanned_once: true,
            last_device_ids: device_ids,
        }
    }

    /// The scan decoded, but the selected device is gone. Counts as one failure.
    pub fn after_disconnect(&self, policy: &ScanPolicy, device_ids: Vec<DeviceId>) -> Self {
        Self {
            has_scanned_once: true,
            last_device_ids: device_ids,
            ..self.after_failure(policy)
        }
    }

    /// The scan returned nothing or something undecodable.
    pub fn after_failure(&self, policy: &ScanPolicy) -> Self {
        let failures = self.consecutive_failures.saturating_add(1);
        let give_up = failures >= policy.failure_threshold;
        Self {
            phase: if give_up {
                ScanPhase::ManualRefreshRequired
            } else {
                ScanPhase::Backoff
            },
            interval: policy.backoff_interval(failures),
            consecutive_failures: failures,
            manual_refresh_required: give_up,
            has_scanned_once: self.has_scanned_once,
            last_device_ids: self.last_device_ids.clone(),
        }
    }

    /// Back to defaults. An in-flight scan keeps its `Scanning` guard so it can't overlap
    /// with the scan the refresh triggers.
    pub fn after_manual_refresh(&self, policy: &ScanPolicy) -> Self {
        Self {
            phase: if self.phase == ScanPhase::Scanning {
                ScanPhase::Scanning
            } else {
                ScanPhase::Idle
            },
            has_scanned_once: self.has_scanned_once,
            ..Self::initial(policy)
        }
    }

    /// A scan ended without an outcome (its future was dropped). Releases the `Scanning`
    /// guard and leaves the counters alone.
    pub fn abandon_scan(&self) -> Self {
        if self.phase != ScanPhase::Scanning {
            return self.clone();
        }
        Self {
            phase: if self.consecutive_failures > 0 {
                ScanPhase::Backoff
            } else {
                ScanPhase::Idle
            },
            ..self.clone()
        }
    }
}

/// Keeps the current interval unless the desired one differs by more than `tolerance`.
fn reschedule(current: Duration, desired: Duration, tolerance: Duration) -> Duration {
    if current.abs_diff(desired) > tolerance { desired } else { current }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn scanned(state: &ScanState, policy: &ScanPolicy, ids: Vec<DeviceId>) -> ScanState {
        state.begin_scan().unwrap().after_success(policy, ids)
    }

    fn failed(state: &ScanState, policy: &ScanPolicy) -> ScanState {
        state.begin_scan().unwrap().after_failure(policy)
    }

    #[test]
    fn test_initial_state() {
        let policy = ScanPolicy::default();
        let state = ScanState::initial(&policy);
        assert_eq!(state.phase, ScanPhase::Idle);
        assert_eq!(state.interval, secs(3));
        assert_eq!(state.consecutive_failures, 0);
        assert!(!state.manual_refresh_required);
        assert!(!state.has_scanned_once);
    }

    #[test]
    fn test_scans_never_overlap() {
        let policy = ScanPolicy::default();
        let scanning = ScanState::initial(&policy).begin_scan().unwrap();
        assert!(scanning.begin_scan().is_none());
    }

    #[test]
    fn test_healthy_intervals() {
        let policy = ScanPolicy::default();
        let state = scanned(&ScanState::initial(&policy), &policy, vec![DeviceId::new_v4()]);
        assert_eq!(state.interval, secs(5));
        assert_eq!(state.phase, ScanPhase::Idle);
        assert!(state.has_scanned_once);

        let state = scanned(&state, &policy, vec![]);
        assert_eq!(state.interval, secs(3));
    }

    #[test]
    fn test_reschedule_tolerance() {
        assert_eq!(
            reschedule(Duration::from_millis(3000), Duration::from_millis(3400), Duration::from_millis(500)),
            Duration::from_millis(3000)
        );
        assert_eq!(
            reschedule(Duration::from_millis(3000), Duration::from_millis(3600), Duration::from_millis(500)),
            Duration::from_millis(3600)
        );
    }

    #[test]
    fn test_backoff_then_manual_refresh_required() {
        let policy = ScanPolicy::default();
        let state = failed(&ScanState::initial(&policy), &policy);
        assert_eq!(state.phase, ScanPhase::Backoff);
        assert_eq!(state.consecutive_failures, 1);
        assert_eq!(state.interval, secs(6));

        let state = failed(&state, &policy);
        assert_eq!(state.interval, secs(12));
        assert!(!state.manual_refresh_required);

        let state = failed(&state, &policy);
        assert_eq!(state.consecutive_failures, 3);
        assert_eq!(state.interval, secs(24));
        assert!(state.manual_refresh_required);
        assert_eq!(state.phase, ScanPhase::ManualRefreshRequired);
        assert!(state.begin_scan().is_none(), "polling stays stopped");
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = ScanPolicy {
            failure_threshold: 100,
            ..ScanPolicy::default()
        };
        assert_eq!(policy.backoff_interval(4), secs(30));
        assert_eq!(policy.backoff_interval(40), secs(30));
    }

    #[test]
    fn test_success_resets_failures() {
        let policy = ScanPolicy::default();
        let state = failed(&failed(&ScanState::initial(&policy), &policy), &policy);
        let state = scanned(&state, &policy, vec![DeviceId::new_v4()]);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.interval, secs(5));

        // A clean empty list is a success too.
        let state = failed(&failed(&state, &policy), &policy);
        let state = scanned(&state, &policy, vec![]);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.interval, secs(3));
    }

    #[test]
    fn test_disconnect_counts_as_failure() {
        let policy = ScanPolicy::default();
        let state = scanned(&ScanState::initial(&policy), &policy, vec![DeviceId::new_v4()]);
        let state = state.begin_scan().unwrap().after_disconnect(&policy, vec![]);
        assert_eq!(state.consecutive_failures, 1);
        assert_eq!(state.interval, secs(6));
        assert!(state.last_device_ids.is_empty());
    }

    #[test]
    fn test_manual_refresh_resets() {
        let policy = ScanPolicy::default();
        let mut state = ScanState::initial(&policy);
        for _ in 0..3 {
            state = failed(&state, &policy);
        }
        assert!(state.manual_refresh_required);

        let state = state.after_manual_refresh(&policy);
        assert!(!state.manual_refresh_required);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.interval, secs(3));
        assert_eq!(state.phase, ScanPhase::Idle);
        assert!(state.begin_scan().is_some());
    }

    #[test]
    fn test_manual_refresh_keeps_scanning_guard() {
        let policy = ScanPolicy::default();
        let scanning = ScanState::initial(&policy).begin_scan().unwrap();
        assert_eq!(scanning.after_manual_refresh(&policy).phase, ScanPhase::Scanning);
    }

    #[test]
    fn test_abandon_scan_releases_guard() {
        let policy = ScanPolicy::default();
        let scanning = ScanState::initial(&policy).begin_scan().unwrap();
        let released = scanning.abandon_scan();
        assert_eq!(released.phase, ScanPhase::Idle);
        assert!(released.begin_scan().is_some());

        let backing_off = failed(&ScanState::initial(&policy), &policy);
        let released = backing_off.begin_scan().unwrap().abandon_scan();
        assert_eq!(released.phase, ScanPhase::Backoff);
        assert_eq!(released.consecutive_failures, 1);

        // Outside a scan it changes nothing.
        let idle = ScanState::initial(&policy);
        assert_eq!(idle.abandon_scan(), idle);
    }

    #[derive(Clone, Copy, Debug)]
    enum Outcome {
        Empty,
        Devices,
        Failure,
        Disconnect,
    }

    /// Every outcome sequence up to length 7 keeps the interval within bounds.
    #[test]
    fn test_interval_always_within_bounds() {
        let policy = ScanPolicy::default();
        let outcomes = [Outcome::Empty, Outcome::Devices, Outcome::Failure, Outcome::Disconnect];
        let device = DeviceId::new_v4();

        let mut frontier = vec![ScanState::initial(&policy)];
        for _ in 0..7 {
            let mut next = Vec::new();
            for state in &frontier {
                let Some(scanning) = state.begin_scan() else {
                    // Stopped: a manual refresh is the only way on.
                    assert!(state.manual_refresh_required);
                    next.push(state.after_manual_refresh(&policy));
                    continue;
                };
                for outcome in outcomes {
                    let after = match outcome {
                        Outcome::Empty => scanning.after_success(&policy, vec![]),
                        Outcome::Devices => scanning.after_success(&policy, vec![device]),
                        Outcome::Failure => scanning.after_failure(&policy),
                        Outcome::Disconnect => scanning.after_disconnect(&policy, vec![]),
                    };
                    assert!(
                        after.interval >= secs(3) && after.interval <= secs(30),
                        "{:?} after {:?} gave {:?}",
                        outcome,
                        state,
                        after.interval
                    );
                    assert_eq!(
                        after.manual_refresh_required,
                        after.consecutive_failures >= policy.failure_threshold
                    );
                    next.push(after);
                }
            }
            frontier = next;
        }
    }
}
