//! Application layer — orchestration of the domain model against
//! infrastructure: the device registry, state cache, rule store, rule
//! evaluator, and the bus client that bridges them all to the broker.

pub mod bus_client;
pub mod device_registry;
pub mod rule_evaluator;
pub mod rule_store;
pub mod state_cache;

pub use bus_client::BusClient;
pub use device_registry::DeviceRegistry;
pub use rule_evaluator::{ActionHandler, RuleEvaluator};
pub use rule_store::{RuleChangeListener, RuleLookupKey, RuleStore};
pub use state_cache::StateCache;
