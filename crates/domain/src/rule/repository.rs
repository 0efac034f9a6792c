use async_trait::async_trait;

use super::Rule;
use crate::error::Result;

/// Whole-collection persistence for rule definitions. The rules file is a
/// single JSON array, rewritten atomically on every mutation.
#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn load(&self) -> Result<Vec<Rule>>;
    async fn save(&self, rules: &[Rule]) -> Result<()>;
}
