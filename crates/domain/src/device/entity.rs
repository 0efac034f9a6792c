use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Sensor,
    Actuator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    Flat,
    NestedParams,
}

impl Default for PayloadFormat {
    fn default() -> Self {
        PayloadFormat::Flat
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandDef {
    pub payload_template: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param_schema: Option<serde_json::Value>,
}

/// A device definition as stored in the devices file, keyed by `device_id`
/// at the repository layer (the id itself is not part of the JSON value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    #[serde(skip)]
    pub device_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    pub status_topic: String,
    #[serde(default)]
    pub payload_format: PayloadFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub commands: HashMap<String, CommandDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_fields: Option<Vec<String>>,
}

impl Device {
    /// Validates the invariants from the device model: required fields per
    /// kind, non-empty command set for actuators.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::Validation("name is required".into()));
        }
        if self.status_topic.trim().is_empty() {
            return Err(EngineError::Validation("status_topic is required".into()));
        }
        match self.kind {
            DeviceKind::Sensor => match &self.data_fields {
                Some(fields) if !fields.is_empty() => {}
                _ => {
                    return Err(EngineError::Validation(
                        "sensor devices require non-empty data_fields".into(),
                    ));
                }
            },
            DeviceKind::Actuator => {
                let command_topic = self.command_topic.as_deref().unwrap_or("");
                if command_topic.trim().is_empty() {
                    return Err(EngineError::Validation(
                        "actuator devices require command_topic".into(),
                    ));
                }
                if self.commands.is_empty() {
                    return Err(EngineError::Validation(
                        "actuator devices require at least one command".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}
