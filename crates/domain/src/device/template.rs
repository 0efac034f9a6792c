use std::collections::HashMap;

use serde_json::Value;

use crate::error::{EngineError, Result};

/// Renders a payload template against caller-supplied params: substitutes
/// `{name}` placeholders in string values, then coerces the result to int,
/// then float, else leaves it as a string. Non-string template values pass
/// through unchanged. A template that is not itself an object is returned
/// as-is (with a warning logged by the caller's tracing subscriber).
pub fn render_payload_template(
    template: &Value,
    params: &HashMap<String, Value>,
) -> Result<Value> {
    let Some(map) = template.as_object() else {
        tracing::warn!(?template, "payload template is not an object, passing through unchanged");
        return Ok(template.clone());
    };

    let mut rendered = serde_json::Map::with_capacity(map.len());
    for (key, value_template) in map {
        let rendered_value = match value_template.as_str() {
            Some(s) if s.contains('{') && s.contains('}') => {
                coerce_numeric(substitute_placeholders(s, params)?)
            }
            _ => value_template.clone(),
        };
        rendered.insert(key.clone(), rendered_value);
    }
    Ok(Value::Object(rendered))
}

fn substitute_placeholders(template: &str, params: &HashMap<String, Value>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after.find('}').ok_or_else(|| {
            EngineError::Validation(format!("unterminated placeholder in template: {template}"))
        })?;
        let name = &after[..end];
        let value = params.get(name).ok_or_else(|| {
            EngineError::Validation(format!("missing param for placeholder: {name}"))
        })?;
        out.push_str(&value_to_plain_string(value));
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn value_to_plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn coerce_numeric(s: String) -> Value {
    if let Ok(i) = s.parse::<i64>() {
        Value::from(i)
    } else if let Ok(f) = s.parse::<f64>() {
        Value::from(f)
    } else {
        Value::String(s)
    }
}
