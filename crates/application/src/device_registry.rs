use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use domain::device::{Device, DeviceKind, DeviceRepository, render_payload_template};
use domain::error::{EngineError, Result};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

/// Source of truth for device definitions: the in-memory map is the fast
/// path, every mutation re-derives the whole map and persists it through
/// the repository before the mutation is considered committed.
pub struct DeviceRegistry {
    repo: Arc<dyn DeviceRepository>,
    devices: Mutex<HashMap<String, Device>>,
}

impl DeviceRegistry {
    pub async fn load(repo: Arc<dyn DeviceRepository>) -> Result<Arc<Self>> {
        let devices = repo.load().await?;
        Ok(Arc::new(Self {
            repo,
            devices: Mutex::new(devices),
        }))
    }

    pub async fn list(&self) -> HashMap<String, Device> {
        self.devices.lock().await.clone()
    }

    pub async fn get(&self, device_id: &str) -> Result<Device> {
        self.devices
            .lock()
            .await
            .get(device_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("设备 ID '{device_id}' 未找到")))
    }

    pub async fn add(&self, device: Device) -> Result<Device> {
        device.validate()?;
        let mut guard = self.devices.lock().await;
        if guard.contains_key(&device.device_id) {
            return Err(EngineError::Conflict(format!(
                "设备ID '{}' 已存在",
                device.device_id
            )));
        }

        let mut candidate = guard.clone();
        candidate.insert(device.device_id.clone(), device.clone());
        self.repo.save(&candidate).await?;
        *guard = candidate;
        Ok(device)
    }

    /// Shallow-merges `patch` onto the existing device, re-validates the
    /// result, and rejects any attempt to change the id.
    pub async fn update(&self, device_id: &str, patch: Value) -> Result<Device> {
        let mut guard = self.devices.lock().await;
        let existing = guard
            .get(device_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("设备ID '{device_id}' 不存在")))?;

        if let Some(new_id) = patch
            .get("device_id")
            .or_else(|| patch.get("id"))
            .and_then(|v| v.as_str())
        {
            if new_id != device_id {
                return Err(EngineError::Validation("不允许修改设备ID".into()));
            }
        }

        let mut merged_value = serde_json::to_value(&existing)
            .map_err(|e| EngineError::Internal(format!("serializing device: {e}")))?;
        merge_shallow(&mut merged_value, &patch);
        let mut merged: Device = serde_json::from_value(merged_value)
            .map_err(|e| EngineError::Validation(format!("invalid device update: {e}")))?;
        merged.device_id = device_id.to_string();
        merged.validate()?;

        let mut candidate = guard.clone();
        candidate.insert(device_id.to_string(), merged.clone());
        self.repo.save(&candidate).await?;
        *guard = candidate;
        Ok(merged)
    }

    pub async fn delete(&self, device_id: &str) -> Result<()> {
        let mut guard = self.devices.lock().await;
        if !guard.contains_key(device_id) {
            return Err(EngineError::NotFound(format!(
                "设备ID '{device_id}' 不存在"
            )));
        }
        let mut candidate = guard.clone();
        candidate.remove(device_id);
        self.repo.save(&candidate).await?;
        *guard = candidate;
        Ok(())
    }

    /// Status topics across every sensor-type device, for subscription.
    pub async fn status_topics(&self) -> HashSet<String> {
        self.devices
            .lock()
            .await
            .values()
            .filter(|d| d.kind == DeviceKind::Sensor)
            .map(|d| d.status_topic.clone())
            .collect()
    }

    pub async fn resolve_command(
        &self,
        device_id: &str,
        command: &str,
        params: &HashMap<String, Value>,
    ) -> Result<(String, Value)> {
        let guard = self.devices.lock().await;
        let device = guard
            .get(device_id)
            .ok_or_else(|| EngineError::NotFound(format!("设备 ID '{device_id}' 未找到")))?;
        let command_topic = device.command_topic.clone().ok_or_else(|| {
            EngineError::Validation(format!("设备 {device_id} 未定义 command_topic"))
        })?;
        let command_def = device.commands.get(command).ok_or_else(|| {
            EngineError::Validation(format!("设备 {device_id} 不支持命令: {command}"))
        })?;
        let payload = render_payload_template(&command_def.payload_template, params)?;
        Ok((command_topic, payload))
    }
}

fn merge_shallow(base: &mut Value, patch: &Value) {
    let (Value::Object(base_map), Value::Object(patch_map)) = (base, patch) else {
        warn!("device patch is not a JSON object, ignoring");
        return;
    };
    for (key, value) in patch_map {
        base_map.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use domain::device::{CommandDef, PayloadFormat};
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct InMemoryDeviceRepository {
        saved: StdMutex<HashMap<String, Device>>,
    }

    #[async_trait]
    impl DeviceRepository for InMemoryDeviceRepository {
        async fn load(&self) -> Result<HashMap<String, Device>> {
            Ok(self.saved.lock().unwrap().clone())
        }
        async fn save(&self, devices: &HashMap<String, Device>) -> Result<()> {
            *self.saved.lock().unwrap() = devices.clone();
            Ok(())
        }
    }

    fn sensor(id: &str) -> Device {
        Device {
            device_id: id.to_string(),
            name: "Living room sensor".into(),
            kind: DeviceKind::Sensor,
            status_topic: "/h/sensors/lr/temp".into(),
            payload_format: PayloadFormat::Flat,
            command_topic: None,
            commands: Default::default(),
            data_fields: Some(vec!["temp".into()]),
        }
    }

    fn actuator(id: &str) -> Device {
        let mut commands = HashMap::new();
        commands.insert(
            "cool".to_string(),
            CommandDef {
                payload_template: json!({"mode": "cool", "target": "{t}"}),
                param_schema: None,
            },
        );
        Device {
            device_id: id.to_string(),
            name: "Living room AC".into(),
            kind: DeviceKind::Actuator,
            status_topic: "/h/dev/ac_lr/state".into(),
            payload_format: PayloadFormat::Flat,
            command_topic: Some("/h/dev/ac_lr/set".into()),
            commands,
            data_fields: None,
        }
    }

    async fn registry() -> Arc<DeviceRegistry> {
        DeviceRegistry::load(Arc::new(InMemoryDeviceRepository::default()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn add_then_get_round_trips() {
        let registry = registry().await;
        registry.add(sensor("sensor_lr")).await.unwrap();
        let loaded = registry.get("sensor_lr").await.unwrap();
        assert_eq!(loaded.status_topic, "/h/sensors/lr/temp");
    }

    #[tokio::test]
    async fn duplicate_id_is_a_conflict() {
        let registry = registry().await;
        registry.add(sensor("sensor_lr")).await.unwrap();
        let err = registry.add(sensor("sensor_lr")).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn status_topics_only_include_sensors() {
        let registry = registry().await;
        registry.add(sensor("sensor_lr")).await.unwrap();
        registry.add(actuator("ac_lr")).await.unwrap();
        let topics = registry.status_topics().await;
        assert_eq!(topics.len(), 1);
        assert!(topics.contains("/h/sensors/lr/temp"));
    }

    #[tokio::test]
    async fn update_cannot_change_id() {
        let registry = registry().await;
        registry.add(sensor("sensor_lr")).await.unwrap();
        let err = registry
            .update("sensor_lr", json!({"device_id": "other"}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn update_merges_shallowly_and_keeps_other_fields() {
        let registry = registry().await;
        registry.add(sensor("sensor_lr")).await.unwrap();
        let updated = registry
            .update("sensor_lr", json!({"name": "Renamed sensor"}))
            .await
            .unwrap();
        assert_eq!(updated.name, "Renamed sensor");
        assert_eq!(updated.status_topic, "/h/sensors/lr/temp");
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let registry = registry().await;
        let err = registry.delete("missing").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn resolve_command_renders_template() {
        let registry = registry().await;
        registry.add(actuator("ac_lr")).await.unwrap();
        let params: HashMap<String, Value> = [("t".to_string(), json!(22))].into_iter().collect();
        let (topic, payload) = registry
            .resolve_command("ac_lr", "cool", &params)
            .await
            .unwrap();
        assert_eq!(topic, "/h/dev/ac_lr/set");
        assert_eq!(payload, json!({"mode": "cool", "target": 22}));
    }

    #[tokio::test]
    async fn resolve_unknown_command_is_a_validation_error() {
        let registry = registry().await;
        registry.add(actuator("ac_lr")).await.unwrap();
        let err = registry
            .resolve_command("ac_lr", "boost", &HashMap::new())
            .await
            .unwrap_err();
        match err {
            EngineError::Validation(msg) => assert!(msg.contains("boost")),
            other => panic!("expected Validation, got {other:?}"),
        }
    }
}
