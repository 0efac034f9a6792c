mod entity;
mod repository;

pub use entity::{Action, Condition, Operator, Rule, Trigger};
pub use repository::RuleRepository;
