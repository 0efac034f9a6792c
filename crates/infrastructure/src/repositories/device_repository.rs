use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use domain::device::{Device, DeviceRepository};
use domain::error::Result;

use crate::fs;

/// JSON file-backed device registry storage: a single object keyed by
/// `device_id`, rewritten atomically on every save.
pub struct FileDeviceRepository {
    path: PathBuf,
}

impl FileDeviceRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DeviceRepository for FileDeviceRepository {
    async fn load(&self) -> Result<HashMap<String, Device>> {
        let mut devices: HashMap<String, Device> = fs::read_json(&self.path).await?;
        for (id, device) in devices.iter_mut() {
            device.device_id = id.clone();
        }
        Ok(devices)
    }

    async fn save(&self, devices: &HashMap<String, Device>) -> Result<()> {
        fs::write_json_atomic(&self.path, devices).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::device::{DeviceKind, PayloadFormat};

    fn sensor(id: &str) -> Device {
        Device {
            device_id: id.to_string(),
            name: "sensor".into(),
            kind: DeviceKind::Sensor,
            status_topic: "/h/sensors/lr/temp".into(),
            payload_format: PayloadFormat::Flat,
            command_topic: None,
            commands: Default::default(),
            data_fields: Some(vec!["temp".into()]),
        }
    }

    #[tokio::test]
    async fn round_trips_device_id_through_the_map_key() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileDeviceRepository::new(dir.path().join("devices.json"));

        let mut devices = HashMap::new();
        devices.insert("sensor_lr".to_string(), sensor("sensor_lr"));
        repo.save(&devices).await.unwrap();

        let loaded = repo.load().await.unwrap();
        assert_eq!(loaded["sensor_lr"].device_id, "sensor_lr");
        assert_eq!(loaded["sensor_lr"].status_topic, "/h/sensors/lr/temp");
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileDeviceRepository::new(dir.path().join("devices.json"));
        assert!(repo.load().await.unwrap().is_empty());
    }
}
