//! Infrastructure layer - external integrations: file-backed persistence,
//! the MQTT broker client, and configuration loading.

pub mod config;
pub mod fs;
pub mod mqtt;
pub mod repositories;

pub use config::AppConfig;
pub use mqtt::{MqttMessage, MqttTransport, MqttTransportOptions};
pub use repositories::{FileDeviceRepository, FileRuleRepository};
pub use rumqttc::QoS;
