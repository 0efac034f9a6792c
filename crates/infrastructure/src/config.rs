use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_topic_base")]
    pub topic_base: String,
}

fn default_topic_base() -> String {
    "home".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub uri: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct CorsConfig {
    #[serde(default)]
    pub allowed_origins: Option<Vec<String>>,
}

/// Top-level application configuration, loaded from a required base file
/// plus optional overlay files and environment variables.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub secret_key: String,
    /// Carried for interface parity with the external auth collaborator;
    /// unused by the engine core.
    #[serde(default)]
    pub jwt_secret_key: Option<String>,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub mqtt: MqttConfig,
    pub app: AppServerConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub admin_user: Option<String>,
}

impl AppConfig {
    /// Loads configuration from `{config_dir}/default.toml`, overlaid by an
    /// optional `{config_dir}/{RUN_MODE}.toml`, then `ENGINE__`-prefixed
    /// environment variables. The base file is required; missing mandatory
    /// keys surface as a `ConfigError` that aborts startup.
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .set_default("mqtt.topic_base", "home")?
            .set_default("app.debug", false)?
            .add_source(File::with_name(&format!("{config_dir}/default")).required(true))
            .add_source(File::with_name(&format!("{config_dir}/{run_mode}")).required(false))
            .add_source(Environment::with_prefix("ENGINE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
