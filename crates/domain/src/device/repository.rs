use std::collections::HashMap;

use async_trait::async_trait;

use super::Device;
use crate::error::Result;

/// Whole-collection persistence for device definitions. The devices file is
/// a single JSON object keyed by `device_id`, rewritten atomically on every
/// mutation, so the contract is load/save of the full map rather than
/// per-entity CRUD.
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn load(&self) -> Result<HashMap<String, Device>>;
    async fn save(&self, devices: &HashMap<String, Device>) -> Result<()>;
}
