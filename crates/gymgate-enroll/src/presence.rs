//! Device presence tracking.
//!
//! Presence is derived, never stored: a device is reachable when its agent
//! heartbeated within the reachability window, and eligible for enrollment
//! when it is also self-reported `online` and advertises the capability.
//! Staleness is strictly time-threshold based; there is no heartbeat
//! sequence to compare.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;

use gymgate_store::document::capability;
use gymgate_store::{DocumentStore, PresenceDoc, now_millis};

use crate::error::EnrollError;

/// A presence document plus the derived reachability judgment.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub presence: PresenceDoc,
    pub is_reachable: bool,
}

/// Why a device cannot take an enrollment command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    /// No presence document exists for the device.
    NotFound,
    /// The agent has not heartbeated within the reachability window.
    StaleHeartbeat { age_secs: u64 },
    /// The device reports a state other than `online`.
    NotOnline { state: String },
    /// The device does not advertise the enrollment capability.
    NotCapable,
    /// The device's mailbox already holds an active command.
    Busy,
}

impl std::fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "no presence record found"),
            Self::StaleHeartbeat { age_secs } => {
                write!(f, "no heartbeat for {age_secs}s")
            }
            Self::NotOnline { state } => write!(f, "device state is '{state}'"),
            Self::NotCapable => write!(f, "device does not support enrollment"),
            Self::Busy => write!(f, "another enrollment is already in progress"),
        }
    }
}

/// Availability verdict for one device at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Availability {
    pub available: bool,
    pub reason: Option<UnavailableReason>,
    pub info: Option<DeviceSnapshot>,
}

impl Availability {
    fn available(info: DeviceSnapshot) -> Self {
        Self {
            available: true,
            reason: None,
            info: Some(info),
        }
    }

    fn unavailable(reason: UnavailableReason, info: Option<DeviceSnapshot>) -> Self {
        Self {
            available: false,
            reason: Some(reason),
            info,
        }
    }
}

/// Derives online/offline judgments from heartbeat recency and
/// self-reported state. Read-only: never writes to the store.
pub struct PresenceTracker<S> {
    store: Arc<S>,
    window: Duration,
    cache: Option<Arc<PresenceCache>>,
}

impl<S: DocumentStore> PresenceTracker<S> {
    pub fn new(store: Arc<S>, window: Duration) -> Self {
        Self {
            store,
            window,
            cache: None,
        }
    }

    /// Attach a listing cache. Availability checks always read live; only
    /// `list_devices` consults the cache.
    pub fn with_cache(mut self, cache: Arc<PresenceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    fn snapshot(&self, presence: PresenceDoc) -> DeviceSnapshot {
        let age_millis = now_millis().saturating_sub(presence.last_heartbeat);
        let window_millis = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);
        DeviceSnapshot {
            is_reachable: age_millis < window_millis,
            presence,
        }
    }

    /// List every registered device under a scope with its derived
    /// reachability flag.
    pub async fn list_devices(&self, scope_id: &str) -> Result<Vec<DeviceSnapshot>, EnrollError> {
        if let Some(cache) = &self.cache {
            if let Some(devices) = cache.get(scope_id).await {
                debug!(scope_id, count = devices.len(), "Device listing served from cache");
                return Ok(devices);
            }
        }

        let devices: Vec<DeviceSnapshot> = self
            .store
            .list_presence(scope_id)
            .await?
            .into_iter()
            .map(|doc| self.snapshot(doc))
            .collect();

        if let Some(cache) = &self.cache {
            cache.put(scope_id, devices.clone()).await;
        }
        Ok(devices)
    }

    /// Judge whether a device can take an enrollment command right now.
    ///
    /// Always reads live presence; returns a structured reason for every
    /// negative case so callers can tell a missing device from a silent one
    /// from a busy one.
    pub async fn check_availability(
        &self,
        scope_id: &str,
        device_id: &str,
    ) -> Result<Availability, EnrollError> {
        let Some(presence) = self.store.read_presence(scope_id, device_id).await? else {
            return Ok(Availability::unavailable(UnavailableReason::NotFound, None));
        };

        let snapshot = self.snapshot(presence);
        if !snapshot.is_reachable {
            let age_millis = now_millis().saturating_sub(snapshot.presence.last_heartbeat);
            let age_secs = u64::try_from(age_millis / 1000).unwrap_or(0);
            return Ok(Availability::unavailable(
                UnavailableReason::StaleHeartbeat { age_secs },
                Some(snapshot),
            ));
        }
        if !snapshot.presence.is_online() {
            let state = snapshot.presence.reported_state.clone();
            return Ok(Availability::unavailable(
                UnavailableReason::NotOnline { state },
                Some(snapshot),
            ));
        }
        if !snapshot.presence.has_capability(capability::ENROLLMENT) {
            return Ok(Availability::unavailable(
                UnavailableReason::NotCapable,
                Some(snapshot),
            ));
        }
        Ok(Availability::available(snapshot))
    }
}

/// TTL'd cache for device listings.
///
/// Owned by the composition root and injected where needed; dashboards that
/// poll the device list share one instance and call [`invalidate`] after
/// anything that changes the fleet.
///
/// [`invalidate`]: PresenceCache::invalidate
pub struct PresenceCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, Vec<DeviceSnapshot>)>>,
}

impl PresenceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fresh cached listing for a scope, if any.
    pub async fn get(&self, scope_id: &str) -> Option<Vec<DeviceSnapshot>> {
        let entries = self.entries.read().await;
        let (stored_at, devices) = entries.get(scope_id)?;
        if stored_at.elapsed() >= self.ttl {
            return None;
        }
        Some(devices.clone())
    }

    pub async fn put(&self, scope_id: &str, devices: Vec<DeviceSnapshot>) {
        let mut entries = self.entries.write().await;
        entries.insert(scope_id.to_string(), (Instant::now(), devices));
    }

    /// Drop the cached listing for a scope.
    pub async fn invalidate(&self, scope_id: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(scope_id);
    }
}
