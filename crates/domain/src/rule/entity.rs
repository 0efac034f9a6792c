use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub data_key: String,
    pub operator: Operator,
    pub value: Value,
}

impl Condition {
    /// Evaluates the condition against an observed value. Numeric
    /// comparison is attempted first (both sides coerced to `f64`); on
    /// failure, `==`/`!=` fall back to string comparison, any other
    /// operator evaluates to false.
    pub fn evaluate(&self, data_value: &Value) -> bool {
        if let (Some(d), Some(t)) = (value_as_f64(data_value), value_as_f64(&self.value)) {
            return match self.operator {
                Operator::Gt => d > t,
                Operator::Lt => d < t,
                Operator::Ge => d >= t,
                Operator::Le => d <= t,
                Operator::Eq => d == t,
                Operator::Ne => d != t,
            };
        }
        match self.operator {
            Operator::Eq => value_as_plain_string(data_value) == value_as_plain_string(&self.value),
            Operator::Ne => value_as_plain_string(data_value) != value_as_plain_string(&self.value),
            other => {
                tracing::warn!(
                    operator = ?other,
                    ?data_value,
                    "cannot numerically compare condition value, treating as false"
                );
                false
            }
        }
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn value_as_plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub topic: String,
    pub condition: Condition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    DeviceCommand {
        device_id: String,
        command: String,
        #[serde(default)]
        params: HashMap<String, Value>,
    },
    MqttPublish {
        topic: String,
        payload: Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub rule_id: String,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    pub trigger: Trigger,
    pub action: Action,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn condition(op: Operator, value: Value) -> Condition {
        Condition {
            data_key: "temp".into(),
            operator: op,
            value,
        }
    }

    #[test]
    fn gt_excludes_exact_boundary() {
        assert!(!condition(Operator::Gt, json!(28)).evaluate(&json!(28)));
        assert!(condition(Operator::Gt, json!(28)).evaluate(&json!(29)));
    }

    #[test]
    fn ge_includes_exact_boundary() {
        assert!(condition(Operator::Ge, json!(28)).evaluate(&json!(28)));
    }

    #[test]
    fn numeric_strings_are_coerced() {
        assert!(condition(Operator::Gt, json!(20)).evaluate(&json!("25")));
        assert!(condition(Operator::Eq, json!(25.0)).evaluate(&json!("25")));
    }

    #[test]
    fn non_numeric_eq_falls_back_to_string_compare() {
        assert!(condition(Operator::Eq, json!("on")).evaluate(&json!("on")));
        assert!(condition(Operator::Ne, json!("on")).evaluate(&json!("off")));
    }

    #[test]
    fn non_numeric_ordering_operator_is_false() {
        assert!(!condition(Operator::Gt, json!(20)).evaluate(&json!("abc")));
    }

    #[test]
    fn operator_tokens_round_trip_through_serde() {
        let rule_json = json!({
            "name": "r",
            "enabled": true,
            "trigger": {"topic": "t", "condition": {"data_key": "temp", "operator": ">=", "value": 28}},
            "action": {"type": "mqtt_publish", "topic": "t2", "payload": {"a": 1}}
        });
        let rule: Rule = serde_json::from_value(rule_json).unwrap();
        assert!(matches!(rule.trigger.condition.operator, Operator::Ge));
        assert_eq!(rule.rule_id, "");
    }

    #[test]
    fn device_command_action_round_trips() {
        let rule_json = json!({
            "rule_id": "r1",
            "name": "r",
            "enabled": true,
            "trigger": {"topic": "t", "condition": {"data_key": "temp", "operator": ">", "value": 28}},
            "action": {"type": "device_command", "device_id": "ac_lr", "command": "cool", "params": {"t": 22}}
        });
        let rule: Rule = serde_json::from_value(rule_json).unwrap();
        match rule.action {
            Action::DeviceCommand {
                device_id, command, ..
            } => {
                assert_eq!(device_id, "ac_lr");
                assert_eq!(command, "cool");
            }
            _ => panic!("expected device_command action"),
        }
    }
}
