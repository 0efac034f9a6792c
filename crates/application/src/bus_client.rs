use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use domain::command::{CommandRecord, CommandSource};
use domain::error::{EngineError, Result};
use infrastructure::{MqttTransport, MqttTransportOptions, QoS};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::device_registry::DeviceRegistry;
use crate::rule_evaluator::{ActionHandler, RuleEvaluator};
use crate::rule_store::RuleChangeListener;
use crate::state_cache::StateCache;

const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Bridges the broker to the in-process components: dispatches incoming
/// messages to `StateCache::apply` then `RuleEvaluator::process`, publishes
/// outbound commands, and records every publish attempt in a bounded ring
/// regardless of broker-ack outcome.
pub struct BusClient {
    transport: MqttTransport,
    device_registry: Arc<DeviceRegistry>,
    rule_evaluator: Arc<RuleEvaluator>,
    state_cache: Arc<StateCache>,
    history: TokioMutex<VecDeque<CommandRecord>>,
    history_capacity: usize,
    dispatch_handle: TokioMutex<Option<JoinHandle<()>>>,
}

impl BusClient {
    pub fn new(
        opts: MqttTransportOptions,
        device_registry: Arc<DeviceRegistry>,
        rule_evaluator: Arc<RuleEvaluator>,
        state_cache: Arc<StateCache>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport: MqttTransport::start(opts),
            device_registry,
            rule_evaluator,
            state_cache,
            history: TokioMutex::new(VecDeque::with_capacity(DEFAULT_HISTORY_CAPACITY)),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            dispatch_handle: TokioMutex::new(None),
        })
    }

    /// Reconciles subscriptions, then spawns the dispatch loop that fans
    /// broker messages out to `StateCache` and `RuleEvaluator`.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.reconcile_subscriptions().await?;

        let this = self.clone();
        let mut rx = self.transport.message_receiver();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => this.dispatch(msg.topic, msg.payload).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "bus dispatch lagged behind the broker, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("bus message channel closed, dispatch loop exiting");
                        break;
                    }
                }
            }
        });
        *self.dispatch_handle.lock().await = Some(handle);
        Ok(())
    }

    async fn dispatch(&self, topic: String, payload: Vec<u8>) {
        let text = match std::str::from_utf8(&payload) {
            Ok(t) => t,
            Err(e) => {
                warn!(topic, error = %e, "dropping message with invalid utf-8 payload");
                return;
            }
        };
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(topic, error = %e, "dropping message with invalid JSON payload");
                return;
            }
        };
        self.state_cache.apply(&topic, &value).await;
        self.rule_evaluator.process(&topic, &value).await;
    }

    /// Cancels the background poll task and waits for the dispatch loop to
    /// exit, bounded by the transport's own cancellation.
    pub async fn stop(&self) {
        self.transport.stop().await;
        if let Some(handle) = self.dispatch_handle.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
    }

    /// Subscribes to the union of device status topics and rule trigger
    /// topics not already subscribed. Never unsubscribes; pruning topics
    /// that are no longer needed is optional and left for later.
    pub async fn reconcile_subscriptions(&self) -> Result<()> {
        let mut needed = self.device_registry.status_topics().await;
        needed.extend(self.rule_evaluator.trigger_topics());
        for topic in needed {
            self.transport.subscribe(&topic).await?;
        }
        Ok(())
    }

    pub async fn publish(
        &self,
        topic: &str,
        payload: Value,
        qos: QoS,
        retain: bool,
        source: CommandSource,
    ) -> Result<()> {
        if !self.transport.is_connected() {
            self.record(topic, payload, source, false).await;
            return Err(EngineError::Unavailable(
                "mqtt broker is disconnected".into(),
            ));
        }

        let bytes = match serde_json::to_vec(&payload) {
            Ok(b) => b,
            Err(e) => {
                self.record(topic, payload, source, false).await;
                return Err(EngineError::Internal(format!(
                    "serializing outbound payload: {e}"
                )));
            }
        };

        let result = self.transport.publish(topic, &bytes, qos, retain).await;
        self.record(topic, payload, source, result.is_ok()).await;
        result
    }

    async fn record(&self, topic: &str, payload: Value, source: CommandSource, success: bool) {
        let mut history = self.history.lock().await;
        if history.len() >= self.history_capacity {
            history.pop_front();
        }
        history.push_back(CommandRecord {
            timestamp: Utc::now(),
            topic: topic.to_string(),
            payload,
            source,
            success,
            broker_message_id: None,
        });
    }

    pub async fn history(&self) -> Vec<CommandRecord> {
        self.history.lock().await.iter().cloned().collect()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}

#[async_trait]
impl ActionHandler for BusClient {
    async fn handle(&self, topic: String, payload: Value) {
        let _ = self
            .publish(&topic, payload, QoS::AtLeastOnce, false, CommandSource::RuleEngine)
            .await;
    }
}

#[async_trait]
impl RuleChangeListener for BusClient {
    /// Reloads the evaluator's enabled-rule snapshot, then reconciles
    /// subscriptions against the new trigger-topic set. Both complete
    /// before the RuleStore mutation that triggered this callback returns
    /// to its caller.
    async fn on_rules_changed(&self) -> Result<()> {
        self.rule_evaluator.reload().await?;
        self.reconcile_subscriptions().await
    }
}
