use std::path::PathBuf;

use async_trait::async_trait;
use domain::error::Result;
use domain::rule::{Rule, RuleRepository};

use crate::fs;

/// JSON file-backed rule store: a single array, rewritten atomically on
/// every save.
pub struct FileRuleRepository {
    path: PathBuf,
}

impl FileRuleRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RuleRepository for FileRuleRepository {
    async fn load(&self) -> Result<Vec<Rule>> {
        fs::read_json(&self.path).await
    }

    async fn save(&self, rules: &[Rule]) -> Result<()> {
        fs::write_json_atomic(&self.path, &rules.to_vec()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::rule::{Action, Condition, Operator, Trigger};
    use serde_json::json;

    fn rule(id: &str) -> Rule {
        Rule {
            rule_id: id.to_string(),
            name: "cool when hot".into(),
            enabled: true,
            trigger: Trigger {
                topic: "/h/sensors/lr/temp".into(),
                condition: Condition {
                    data_key: "temp".into(),
                    operator: Operator::Gt,
                    value: json!(28),
                },
            },
            action: Action::DeviceCommand {
                device_id: "ac_lr".into(),
                command: "cool".into(),
                params: Default::default(),
            },
        }
    }

    #[tokio::test]
    async fn round_trips_rule_list() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileRuleRepository::new(dir.path().join("rules.json"));

        repo.save(&[rule("r1")]).await.unwrap();
        let loaded = repo.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].rule_id, "r1");
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileRuleRepository::new(dir.path().join("rules.json"));
        assert!(repo.load().await.unwrap().is_empty());
    }
}
