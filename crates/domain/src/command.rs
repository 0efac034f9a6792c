use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandSource {
    RuleEngine,
    Api,
}

/// A record of one outbound publish attempt, kept in a bounded ring by the
/// bus client regardless of broker-ack outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRecord {
    pub timestamp: DateTime<Utc>,
    pub topic: String,
    pub payload: Value,
    pub source: CommandSource,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_message_id: Option<u16>,
}
