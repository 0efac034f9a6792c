use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use domain::device::PayloadFormat;
use domain::error::Result;
use domain::rule::{Action, Condition, Rule};
use serde_json::Value;
use tracing::warn;

use crate::device_registry::DeviceRegistry;
use crate::rule_store::RuleStore;

/// Receives the resolved `(topic, payload)` of a firing rule. Injected by
/// the bus client at wiring time so the evaluator never depends on the
/// transport directly.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, topic: String, payload: Value);
}

/// Matches incoming bus messages against the currently-enabled rule set.
/// The enabled-rules snapshot is published wholesale on `reload()` and
/// read without a lock — an `RwLock` read guard over an `Arc` clone, so
/// readers never block on a writer that is mid-reload.
pub struct RuleEvaluator {
    rule_store: Arc<RuleStore>,
    device_registry: Arc<DeviceRegistry>,
    snapshot: RwLock<Arc<Vec<Rule>>>,
    handler: RwLock<Option<Arc<dyn ActionHandler>>>,
}

impl RuleEvaluator {
    pub fn new(rule_store: Arc<RuleStore>, device_registry: Arc<DeviceRegistry>) -> Arc<Self> {
        Arc::new(Self {
            rule_store,
            device_registry,
            snapshot: RwLock::new(Arc::new(Vec::new())),
            handler: RwLock::new(None),
        })
    }

    pub async fn reload(&self) -> Result<()> {
        let enabled: Vec<Rule> = self
            .rule_store
            .list()
            .await
            .into_iter()
            .filter(|r| r.enabled)
            .collect();
        *self.snapshot.write().unwrap() = Arc::new(enabled);
        Ok(())
    }

    pub fn trigger_topics(&self) -> HashSet<String> {
        self.snapshot
            .read()
            .unwrap()
            .iter()
            .map(|r| r.trigger.topic.clone())
            .collect()
    }

    pub fn set_action_handler(&self, handler: Arc<dyn ActionHandler>) {
        *self.handler.write().unwrap() = Some(handler);
    }

    pub async fn process(&self, topic: &str, payload: &Value) {
        let handler = self.handler.read().unwrap().clone();
        let Some(handler) = handler else {
            warn!("no action handler set on the rule evaluator, dropping message");
            return;
        };

        let snapshot = self.snapshot.read().unwrap().clone();
        let devices = self.device_registry.list().await;
        let triggering_device = devices.values().find(|d| d.status_topic == topic);

        for rule in snapshot.iter() {
            if rule.trigger.topic != topic {
                continue;
            }
            let Some(data_value) =
                extract_data_value(triggering_device.map(|d| d.payload_format), &rule.trigger.condition, payload)
            else {
                continue;
            };
            if !rule.trigger.condition.evaluate(&data_value) {
                continue;
            }

            if let Some((resolved_topic, resolved_payload)) =
                self.resolve_action(&rule.name, &rule.action).await
            {
                handler.handle(resolved_topic, resolved_payload).await;
            }
        }
    }

    async fn resolve_action(&self, rule_name: &str, action: &Action) -> Option<(String, Value)> {
        match action {
            Action::DeviceCommand {
                device_id,
                command,
                params,
            } => match self
                .device_registry
                .resolve_command(device_id, command, params)
                .await
            {
                Ok((topic, payload)) => Some((topic, payload)),
                Err(e) => {
                    warn!(rule = %rule_name, device_id, command, error = %e, "failed to resolve device command, skipping");
                    None
                }
            },
            Action::MqttPublish { topic, payload } => Some((topic.clone(), payload.clone())),
        }
    }
}

fn extract_data_value(
    payload_format: Option<PayloadFormat>,
    condition: &Condition,
    payload: &Value,
) -> Option<Value> {
    let source = match payload_format {
        Some(PayloadFormat::NestedParams) => payload.get("params")?,
        _ => payload,
    };
    source.get(&condition.data_key).cloned()
}
