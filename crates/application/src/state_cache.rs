use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use domain::device::{DeviceKind, PayloadFormat};
use domain::state::StateEntry;
use serde_json::Value;
use tracing::{debug, warn};

use crate::device_registry::DeviceRegistry;

/// Latest-writer-wins per-device state cache. Guarded by a single
/// `std::sync::RwLock`; never held across an `.await` — lookups against
/// the device registry happen before the lock is taken.
pub struct StateCache {
    device_registry: Arc<DeviceRegistry>,
    states: RwLock<HashMap<String, StateEntry>>,
}

impl StateCache {
    pub fn new(device_registry: Arc<DeviceRegistry>) -> Arc<Self> {
        Arc::new(Self {
            device_registry,
            states: RwLock::new(HashMap::new()),
        })
    }

    /// Applies an incoming bus message to the cache. Drops the message
    /// silently (besides a log line) if no device owns this status topic,
    /// or if a `nested_params` device's payload is missing its `params`
    /// object.
    pub async fn apply(&self, topic: &str, payload: &Value) {
        let devices = self.device_registry.list().await;
        let Some(device) = devices.values().find(|d| d.status_topic == topic) else {
            debug!(topic, "no device is subscribed to this status topic, dropping message");
            return;
        };

        let state_fields = match device.payload_format {
            PayloadFormat::NestedParams => match payload.get("params") {
                Some(params @ Value::Object(_)) => params.clone(),
                _ => {
                    warn!(
                        topic,
                        device_id = %device.device_id,
                        "nested_params device message is missing a params object, dropping"
                    );
                    return;
                }
            },
            PayloadFormat::Flat => payload.clone(),
        };

        let entry = StateEntry {
            timestamp: Utc::now(),
            state_fields,
            last_raw_payload: payload.clone(),
        };
        self.states
            .write()
            .unwrap()
            .insert(device.device_id.clone(), entry);
    }

    pub fn get(&self, device_id: &str) -> Option<StateEntry> {
        self.states.read().unwrap().get(device_id).cloned()
    }

    pub fn all(&self) -> HashMap<String, StateEntry> {
        self.states.read().unwrap().clone()
    }

    /// Every device of `kind`, paired with its cached state if any. Devices
    /// with no cached state yet are still present in the result, mapped to
    /// `None` — mirroring `get_states_by_type` in the original state
    /// manager, which inserts an empty placeholder rather than omitting
    /// the device.
    pub async fn by_type(&self, kind: DeviceKind) -> HashMap<String, Option<StateEntry>> {
        let devices = self.device_registry.list().await;
        let states = self.states.read().unwrap();
        devices
            .values()
            .filter(|d| d.kind == kind)
            .map(|d| (d.device_id.clone(), states.get(&d.device_id).cloned()))
            .collect()
    }

    pub fn clear(&self, device_id: &str) {
        self.states.write().unwrap().remove(device_id);
    }

    pub fn clear_all(&self) {
        self.states.write().unwrap().clear();
    }
}
