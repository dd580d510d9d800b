use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single Storm configuration value, carried end to end as a typed sum
/// rather than recovered from a string by pattern-matching at the last
/// moment (see SPEC_FULL.md §9, "Typed Storm configuration").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<ConfigValue>),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

pub type ConfigMap = BTreeMap<String, ConfigValue>;

/// Keys whose value is always serialized as a quoted string regardless of
/// its apparent scalar type, because Storm's own config loader expects a
/// string there even when the value looks numeric (e.g. `"2.0.0"`).
const ALWAYS_QUOTED_KEYS: &[&str] = &["topology.version"];

/// Render a Storm configuration map as `storm.yaml`-compatible text,
/// preserving each value's apparent scalar type: booleans and numbers
/// unquoted, strings and list-of-string quoted, lists as flow sequences.
/// This is the exact contract topology submission relies on (spec.md §6).
pub fn render_storm_yaml(config: &ConfigMap) -> String {
    let mut out = String::new();
    for (key, value) in config {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(&render_scalar(key, value));
        out.push('\n');
    }
    out
}

fn render_scalar(key: &str, value: &ConfigValue) -> String {
    if ALWAYS_QUOTED_KEYS.contains(&key) {
        return quote(&display_value(value));
    }
    match value {
        ConfigValue::Bool(b) => b.to_string(),
        ConfigValue::Int(i) => i.to_string(),
        ConfigValue::Float(f) => f.to_string(),
        ConfigValue::String(s) => quote(s),
        ConfigValue::List(items) => {
            let rendered: Vec<String> = items
                .iter()
                .map(|item| render_scalar_for_list(item))
                .collect();
            format!("[{}]", rendered.join(", "))
        }
    }
}

fn render_scalar_for_list(value: &ConfigValue) -> String {
    match value {
        ConfigValue::Bool(b) => b.to_string(),
        ConfigValue::Int(i) => i.to_string(),
        ConfigValue::Float(f) => f.to_string(),
        ConfigValue::String(s) => quote(s),
        ConfigValue::List(items) => {
            let rendered: Vec<String> = items.iter().map(render_scalar_for_list).collect();
            format!("[{}]", rendered.join(", "))
        }
    }
}

fn display_value(value: &ConfigValue) -> String {
    match value {
        ConfigValue::Bool(b) => b.to_string(),
        ConfigValue::Int(i) => i.to_string(),
        ConfigValue::Float(f) => f.to_string(),
        ConfigValue::String(s) => s.clone(),
        ConfigValue::List(_) => String::new(),
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Render a Storm configuration map as a JSON object with the same
/// type-preservation contract, used for the Nimbus submission RPC payload.
pub fn to_json_value(config: &ConfigMap) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (key, value) in config {
        let rendered = if ALWAYS_QUOTED_KEYS.contains(&key.as_str()) {
            serde_json::Value::String(display_value(value))
        } else {
            config_value_to_json(value)
        };
        map.insert(key.clone(), rendered);
    }
    serde_json::Value::Object(map)
}

fn config_value_to_json(value: &ConfigValue) -> serde_json::Value {
    match value {
        ConfigValue::Bool(b) => serde_json::Value::Bool(*b),
        ConfigValue::Int(i) => serde_json::Value::Number((*i).into()),
        ConfigValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ConfigValue::String(s) => serde_json::Value::String(s.clone()),
        ConfigValue::List(items) => {
            serde_json::Value::Array(items.iter().map(config_value_to_json).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, ConfigValue)]) -> ConfigMap {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn version_is_always_quoted_even_when_numeric_looking() {
        let cfg = map(&[("topology.version", ConfigValue::String("1.2.3".into()))]);
        let yaml = render_storm_yaml(&cfg);
        assert_eq!(yaml.trim(), "topology.version: \"1.2.3\"");
    }

    #[test]
    fn bool_and_int_are_unquoted() {
        let cfg = map(&[
            ("topology.debug", ConfigValue::Bool(true)),
            ("topology.workers", ConfigValue::Int(4)),
        ]);
        let yaml = render_storm_yaml(&cfg);
        assert!(yaml.contains("topology.debug: true"));
        assert!(yaml.contains("topology.workers: 4"));
    }

    #[test]
    fn lists_render_as_flow_sequences_of_quoted_strings() {
        let cfg = map(&[(
            "nimbus.seeds",
            ConfigValue::List(vec![
                ConfigValue::String("a".into()),
                ConfigValue::String("b".into()),
            ]),
        )]);
        let yaml = render_storm_yaml(&cfg);
        assert_eq!(yaml.trim(), "nimbus.seeds: [\"a\", \"b\"]");
    }

    #[test]
    fn json_rendering_preserves_types_for_submission_payload() {
        let cfg = map(&[
            ("topology.version", ConfigValue::String("1.0.0".into())),
            ("topology.workers", ConfigValue::Int(2)),
        ]);
        let json = to_json_value(&cfg);
        assert_eq!(json["topology.version"], serde_json::json!("1.0.0"));
        assert_eq!(json["topology.workers"], serde_json::json!(2));
    }

    #[test]
    fn round_trip_preserves_type_for_every_scalar_kind() {
        let original = map(&[
            ("a", ConfigValue::Bool(false)),
            ("b", ConfigValue::Int(-7)),
            ("c", ConfigValue::Float(3.5)),
            ("d", ConfigValue::String("x".into())),
            (
                "e",
                ConfigValue::List(vec![ConfigValue::Int(1), ConfigValue::Int(2)]),
            ),
        ]);
        let serialized = serde_json::to_string(&original).unwrap();
        let parsed: ConfigMap = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, parsed);
    }
}
