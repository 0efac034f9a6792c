use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The latest observed state for a single device: the unwrapped data
/// fields plus the raw payload the engine received, for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEntry {
    pub timestamp: DateTime<Utc>,
    pub state_fields: Value,
    pub last_raw_payload: Value,
}
