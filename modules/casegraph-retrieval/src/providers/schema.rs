use schemars::{schema_for, JsonSchema};
use serde_json::{Map, Value};

/// JSON schema for a tool input: every object closed and fully required, with
/// `$ref`s to local definitions inlined.
pub(crate) fn tool_schema<T: JsonSchema>() -> Value {
    let mut value = serde_json::to_value(schema_for!(T)).unwrap_or_default();
    let definitions = match &mut value {
        Value::Object(map) => {
            map.remove("$schema");
            map.remove("definitions")
        }
        _ => None,
    };
    let definitions = match definitions {
        Some(Value::Object(defs)) => defs,
        _ => Map::new(),
    };
    rewrite(&mut value, &definitions);
    value
}

fn rewrite(value: &mut Value, definitions: &Map<String, Value>) {
    match value {
        Value::Object(map) => {
            let target = map
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|r| r.strip_prefix("#/definitions/"))
                .and_then(|name| definitions.get(name))
                .cloned();
            if let Some(mut target) = target {
                rewrite(&mut target, definitions);
                *value = target;
                return;
            }

            if map.get("type").and_then(Value::as_str) == Some("object") {
                map.insert("additionalProperties".into(), Value::Bool(false));
                if let Some(Value::Object(props)) = map.get("properties") {
                    let required = props.keys().cloned().map(Value::String).collect();
                    map.insert("required".into(), Value::Array(required));
                }
            }
            for v in map.values_mut() {
                rewrite(v, definitions);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite(item, definitions);
            }
        }
        _ => {}
    }
}
