use std::sync::Arc;

use async_trait::async_trait;
use domain::error::{EngineError, Result};
use domain::rule::{Rule, RuleRepository};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Identifies a rule by `id` or by `name` for lookup/modify/delete, per the
/// `?by=id|name` query parameter on the HTTP surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleLookupKey {
    Id,
    Name,
}

/// Invoked after a rule-store mutation has been durably persisted, so the
/// evaluator and bus client can catch up. One-way dependency: RuleStore
/// never holds a reference back to the evaluator or bus client directly,
/// avoiding the RuleStore -> RuleEvaluator -> BusClient -> RuleStore cycle.
#[async_trait]
pub trait RuleChangeListener: Send + Sync {
    async fn on_rules_changed(&self) -> Result<()>;
}

/// Durable rule list. Every mutation builds the full candidate list,
/// persists it, and only then swaps it into the in-memory copy — so a
/// persistence failure never needs to be rolled back, it simply never
/// lands.
pub struct RuleStore {
    repo: Arc<dyn RuleRepository>,
    rules: Mutex<Vec<Rule>>,
    listener: Mutex<Option<Arc<dyn RuleChangeListener>>>,
}

impl RuleStore {
    pub async fn load(repo: Arc<dyn RuleRepository>) -> Result<Arc<Self>> {
        let rules = repo.load().await?;
        Ok(Arc::new(Self {
            repo,
            rules: Mutex::new(rules),
            listener: Mutex::new(None),
        }))
    }

    pub async fn set_listener(&self, listener: Arc<dyn RuleChangeListener>) {
        *self.listener.lock().await = Some(listener);
    }

    pub async fn list(&self) -> Vec<Rule> {
        self.rules.lock().await.clone()
    }

    pub async fn get(&self, identifier: &str, key: RuleLookupKey) -> Result<Rule> {
        self.rules
            .lock()
            .await
            .iter()
            .find(|r| matches_identifier(r, identifier, key))
            .cloned()
            .ok_or_else(|| not_found(identifier, key))
    }

    pub async fn add(&self, mut rule: Rule) -> Result<Rule> {
        let mut guard = self.rules.lock().await;

        if rule.rule_id.trim().is_empty() {
            rule.rule_id = Uuid::new_v4().to_string();
        }
        if guard.iter().any(|r| r.rule_id == rule.rule_id) {
            return Err(EngineError::Conflict(format!(
                "rule id '{}' already exists",
                rule.rule_id
            )));
        }
        if guard.iter().any(|r| r.name == rule.name) {
            warn!(name = %rule.name, "rule name already in use by another rule, adding anyway");
        }

        let mut candidate = guard.clone();
        candidate.push(rule.clone());
        self.repo.save(&candidate).await?;
        *guard = candidate;
        drop(guard);

        self.notify().await?;
        Ok(rule)
    }

    pub async fn modify(
        &self,
        identifier: &str,
        key: RuleLookupKey,
        mut rule: Rule,
    ) -> Result<Rule> {
        let mut guard = self.rules.lock().await;
        let index = guard
            .iter()
            .position(|r| matches_identifier(r, identifier, key))
            .ok_or_else(|| not_found(identifier, key))?;

        if guard
            .iter()
            .enumerate()
            .any(|(i, r)| i != index && r.name == rule.name)
        {
            return Err(EngineError::Conflict(format!(
                "rule name '{}' conflicts with another rule",
                rule.name
            )));
        }
        if rule.rule_id.trim().is_empty() {
            rule.rule_id = guard[index].rule_id.clone();
        }

        let mut candidate = guard.clone();
        candidate[index] = rule.clone();
        self.repo.save(&candidate).await?;
        *guard = candidate;
        drop(guard);

        self.notify().await?;
        Ok(rule)
    }

    pub async fn delete(&self, identifier: &str, key: RuleLookupKey) -> Result<()> {
        let mut guard = self.rules.lock().await;
        let index = guard
            .iter()
            .position(|r| matches_identifier(r, identifier, key))
            .ok_or_else(|| not_found(identifier, key))?;

        let mut candidate = guard.clone();
        candidate.remove(index);
        self.repo.save(&candidate).await?;
        *guard = candidate;
        drop(guard);

        self.notify().await
    }

    async fn notify(&self) -> Result<()> {
        let listener = self.listener.lock().await.clone();
        if let Some(listener) = listener {
            listener.on_rules_changed().await?;
        }
        Ok(())
    }
}

fn matches_identifier(rule: &Rule, identifier: &str, key: RuleLookupKey) -> bool {
    match key {
        RuleLookupKey::Id => rule.rule_id == identifier,
        RuleLookupKey::Name => rule.name == identifier,
    }
}

fn not_found(identifier: &str, key: RuleLookupKey) -> EngineError {
    let key_name = match key {
        RuleLookupKey::Id => "id",
        RuleLookupKey::Name => "name",
    };
    EngineError::NotFound(format!("未找到 {key_name} 为 '{identifier}' 的规则"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::rule::{Action, Condition, Operator, Trigger};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct InMemoryRuleRepository {
        saved: StdMutex<Vec<Rule>>,
    }

    #[async_trait]
    impl RuleRepository for InMemoryRuleRepository {
        async fn load(&self) -> Result<Vec<Rule>> {
            Ok(self.saved.lock().unwrap().clone())
        }
        async fn save(&self, rules: &[Rule]) -> Result<()> {
            *self.saved.lock().unwrap() = rules.to_vec();
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingListener {
        notifications: AtomicUsize,
    }

    #[async_trait]
    impl RuleChangeListener for CountingListener {
        async fn on_rules_changed(&self) -> Result<()> {
            self.notifications.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn rule(name: &str) -> Rule {
        Rule {
            rule_id: String::new(),
            name: name.to_string(),
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
    async fn add_assigns_id_when_absent() {
        let store = RuleStore::load(Arc::new(InMemoryRuleRepository::default()))
            .await
            .unwrap();
        let added = store.add(rule("cool when hot")).await.unwrap();
        assert!(!added.rule_id.is_empty());
    }

    #[tokio::test]
    async fn add_then_list_then_get_round_trips() {
        let store = RuleStore::load(Arc::new(InMemoryRuleRepository::default()))
            .await
            .unwrap();
        let added = store.add(rule("cool when hot")).await.unwrap();
        assert_eq!(store.list().await.len(), 1);
        let fetched = store.get(&added.rule_id, RuleLookupKey::Id).await.unwrap();
        assert_eq!(fetched.name, "cool when hot");
    }

    #[tokio::test]
    async fn modify_then_get_reflects_change() {
        let store = RuleStore::load(Arc::new(InMemoryRuleRepository::default()))
            .await
            .unwrap();
        let added = store.add(rule("cool when hot")).await.unwrap();
        let mut updated = added.clone();
        updated.enabled = false;
        store
            .modify(&added.rule_id, RuleLookupKey::Id, updated)
            .await
            .unwrap();
        let fetched = store.get(&added.rule_id, RuleLookupKey::Id).await.unwrap();
        assert!(!fetched.enabled);
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let store = RuleStore::load(Arc::new(InMemoryRuleRepository::default()))
            .await
            .unwrap();
        let added = store.add(rule("cool when hot")).await.unwrap();
        store.delete(&added.rule_id, RuleLookupKey::Id).await.unwrap();
        let err = store.get(&added.rule_id, RuleLookupKey::Id).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let store = RuleStore::load(Arc::new(InMemoryRuleRepository::default()))
            .await
            .unwrap();
        let mut first = rule("a");
        first.rule_id = "r1".into();
        store.add(first).await.unwrap();
        let mut second = rule("b");
        second.rule_id = "r1".into();
        let err = store.add(second).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn duplicate_name_is_accepted_with_a_warning() {
        let store = RuleStore::load(Arc::new(InMemoryRuleRepository::default()))
            .await
            .unwrap();
        store.add(rule("same name")).await.unwrap();
        let second = store.add(rule("same name")).await.unwrap();
        assert_eq!(store.list().await.len(), 2);
        assert_eq!(second.name, "same name");
    }

    #[tokio::test]
    async fn mutations_notify_the_listener() {
        let store = RuleStore::load(Arc::new(InMemoryRuleRepository::default()))
            .await
            .unwrap();
        let listener = Arc::new(CountingListener::default());
        store.set_listener(listener.clone()).await;

        let added = store.add(rule("cool when hot")).await.unwrap();
        store
            .modify(&added.rule_id, RuleLookupKey::Id, added.clone())
            .await
            .unwrap();
        store.delete(&added.rule_id, RuleLookupKey::Id).await.unwrap();

        assert_eq!(listener.notifications.load(Ordering::SeqCst), 3);
    }
}
