//! Host Blacklist: a process-wide, short-TTL deny-list of
//! marketplace hosts that have misbehaved (dead SSH, failed health probes).
//!
//! Grounded on `tower-resilience-ratelimiter`'s `Mutex<HashMap<..>>`
//! admission map, but the entry here carries a `reason` and an absolute
//! `expires_at` instead of a sliding window, since a blacklist entry decays
//! by a single TTL rather than the window/permit model rate limiting uses.

use chrono::{DateTime, Utc};
use gpufleet_core::model::MachineId;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

const DEFAULT_TTL: Duration = Duration::from_secs(6 * 3600);

#[derive(Debug, Clone)]
pub struct BlacklistEntry {
    pub reason: String,
    pub expires_at: DateTime<Utc>,
}

/// Safe for concurrent reads and writes: every operation takes the same
/// `Mutex` briefly, there is no separate read path that could observe a
/// half-written entry.
#[derive(Default)]
pub struct HostBlacklist {
    entries: Mutex<HashMap<MachineId, BlacklistEntry>>,
}

impl HostBlacklist {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts or refreshes the entry for `machine_id`. A second call before
    /// expiry extends the TTL from now rather than stacking durations.
    pub fn blacklist(&self, machine_id: &MachineId, reason: impl Into<String>, ttl: Duration) {
        let reason = reason.into();
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());

        #[cfg(feature = "tracing")]
        tracing::warn!(machine_id = %machine_id, reason = %reason, "host blacklisted");
        #[cfg(feature = "metrics")]
        metrics::counter!("gpufleet_blacklist_entries_total").increment(1);

        self.entries.lock().unwrap().insert(
            machine_id.clone(),
            BlacklistEntry { reason, expires_at },
        );
    }

    pub fn blacklist_default_ttl(&self, machine_id: &MachineId, reason: impl Into<String>) {
        self.blacklist(machine_id, reason, DEFAULT_TTL);
    }

    /// `true` iff an unexpired entry exists. Does not prune on its own: an
    /// expired entry is treated as absent here but only physically removed
    /// by [`HostBlacklist::prune_expired`].
    pub fn is_blacklisted(&self, machine_id: &MachineId) -> bool {
        self.entries
            .lock()
            .unwrap()
            .get(machine_id)
            .is_some_and(|entry| entry.expires_at > Utc::now())
    }

    pub fn reason(&self, machine_id: &MachineId) -> Option<String> {
        self.entries
            .lock()
            .unwrap()
            .get(machine_id)
            .filter(|entry| entry.expires_at > Utc::now())
            .map(|entry| entry.reason.clone())
    }

    /// Filters listed hosts out of an offer query result, as the offer query
    /// layer is required to.
    pub fn filter_out<T>(
        &self,
        candidates: Vec<T>,
        machine_id_of: impl Fn(&T) -> &MachineId,
    ) -> Vec<T> {
        candidates
            .into_iter()
            .filter(|c| !self.is_blacklisted(machine_id_of(c)))
            .collect()
    }

    /// Removes expired entries. Intended to be called periodically by a
    /// background sweep; never required for correctness of
    /// [`HostBlacklist::is_blacklisted`], only for bounding memory.
    pub fn prune_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blacklisted_host_is_reported_until_ttl_expires() {
        let blacklist = HostBlacklist::new();
        let machine = "m-1".to_string();

        assert!(!blacklist.is_blacklisted(&machine));
        blacklist.blacklist(&machine, "ssh unreachable", Duration::from_millis(20));
        assert!(blacklist.is_blacklisted(&machine));
        assert_eq!(blacklist.reason(&machine).as_deref(), Some("ssh unreachable"));

        std::thread::sleep(Duration::from_millis(30));
        assert!(!blacklist.is_blacklisted(&machine));
    }

    #[test]
    fn second_blacklist_call_refreshes_ttl() {
        let blacklist = HostBlacklist::new();
        let machine = "m-2".to_string();

        blacklist.blacklist(&machine, "first", Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(5));
        blacklist.blacklist(&machine, "second", Duration::from_millis(200));
        std::thread::sleep(Duration::from_millis(20));

        assert!(blacklist.is_blacklisted(&machine));
        assert_eq!(blacklist.reason(&machine).as_deref(), Some("second"));
    }

    #[test]
    fn prune_expired_removes_only_dead_entries() {
        let blacklist = HostBlacklist::new();
        blacklist.blacklist(&"expired".to_string(), "r", Duration::from_millis(1));
        blacklist.blacklist(&"alive".to_string(), "r", Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(10));

        let pruned = blacklist.prune_expired();
        assert_eq!(pruned, 1);
        assert_eq!(blacklist.len(), 1);
        assert!(blacklist.is_blacklisted(&"alive".to_string()));
    }

    #[test]
    fn filter_out_drops_blacklisted_candidates() {
        let blacklist = HostBlacklist::new();
        blacklist.blacklist(&"bad".to_string(), "r", Duration::from_secs(60));

        let candidates = vec!["good".to_string(), "bad".to_string()];
        let filtered = blacklist.filter_out(candidates, |c| c);
        assert_eq!(filtered, vec!["good".to_string()]);
    }
}
