use std::sync::Arc;

use application::{BusClient, DeviceRegistry, RuleEvaluator, RuleStore, StateCache};
use domain::error::{EngineError, Result};
use infrastructure::AppConfig;

/// Process-wide shared state. Every orchestration component is optional so
/// that handlers registered before wiring completes (or exercised in a
/// test harness that only needs a subset) fail with a `503` envelope
/// instead of panicking on a missing field.
pub struct AppState {
    pub config: AppConfig,
    pub device_registry: Option<Arc<DeviceRegistry>>,
    pub state_cache: Option<Arc<StateCache>>,
    pub rule_store: Option<Arc<RuleStore>>,
    pub rule_evaluator: Option<Arc<RuleEvaluator>>,
    pub bus_client: Option<Arc<BusClient>>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            device_registry: None,
            state_cache: None,
            rule_store: None,
            rule_evaluator: None,
            bus_client: None,
        }
    }

    pub fn device_registry(&self) -> Result<Arc<DeviceRegistry>> {
        self.device_registry
            .clone()
            .ok_or_else(|| unavailable("device registry"))
    }

    pub fn state_cache(&self) -> Result<Arc<StateCache>> {
        self.state_cache
            .clone()
            .ok_or_else(|| unavailable("state cache"))
    }

    pub fn rule_store(&self) -> Result<Arc<RuleStore>> {
        self.rule_store.clone().ok_or_else(|| unavailable("rule store"))
    }

    pub fn rule_evaluator(&self) -> Result<Arc<RuleEvaluator>> {
        self.rule_evaluator
            .clone()
            .ok_or_else(|| unavailable("rule evaluator"))
    }

    pub fn bus_client(&self) -> Result<Arc<BusClient>> {
        self.bus_client.clone().ok_or_else(|| unavailable("bus client"))
    }
}

fn unavailable(component: &str) -> EngineError {
    EngineError::Unavailable(format!("{component} is not initialized"))
}
