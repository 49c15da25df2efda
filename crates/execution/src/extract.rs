//! Output extraction from JSON response bodies.

use jobworker_core::{Param, ParamType, ParamValue};
use serde_json::Value as JsonValue;

/// Navigate a JSON value with a dot path.
///
/// Supports `data.items[0].id` and `data.items.0.id`. Returns `None` when
/// any segment is missing.
pub fn navigate(json: &JsonValue, path: &str) -> Option<JsonValue> {
    let mut current = json;

    for part in path.split('.') {
        if part.is_empty() {
            continue;
        }

        // Handle array indexing (e.g., "items[0]")
        if let Some(bracket_pos) = part.find('[') {
            let key = &part[..bracket_pos];
            if !key.is_empty() {
                current = current.get(key)?;
            }
            for index in part[bracket_pos..].split('[').skip(1) {
                let index: usize = index.strip_suffix(']')?.parse().ok()?;
                current = current.get(index)?;
            }
        } else if let (JsonValue::Array(items), Ok(index)) = (current, part.parse::<usize>()) {
            current = items.get(index)?;
        } else {
            current = current.get(part)?;
        }
    }

    Some(current.clone())
}

/// Convert a JSON value to the param's declared type.
pub fn coerce(value: &JsonValue, param_type: ParamType) -> Option<ParamValue> {
    match (param_type, value) {
        (_, JsonValue::Null) => None,
        (ParamType::String, JsonValue::String(s)) => Some(ParamValue::Text(s.clone())),
        (ParamType::String, other) => Some(ParamValue::Text(other.to_string())),
        (ParamType::Boolean, JsonValue::Bool(b)) => Some(ParamValue::Bool(*b)),
        (ParamType::Boolean, JsonValue::String(s)) => Some(ParamValue::Bool(matches!(
            s.as_str(),
            "true" | "True" | "TRUE" | "t" | "T" | "1"
        ))),
        (ParamType::Boolean, JsonValue::Number(n)) => {
            Some(ParamValue::Bool(n.as_f64().is_some_and(|n| n != 0.0)))
        }
        (ParamType::Number, JsonValue::Number(n)) => n.as_f64().map(ParamValue::Number),
        (ParamType::Number, JsonValue::String(s)) => s.trim().parse().ok().map(ParamValue::Number),
        (ParamType::Number, JsonValue::Bool(b)) => Some(ParamValue::Number(if *b { 1.0 } else { 0.0 })),
        _ => None,
    }
}

/// Fill every output param from `body`.
///
/// Params whose field is absent from the body, or a body that is not JSON,
/// leave the value unset. Returns the number of params filled.
pub fn apply_outputs(params: &mut [Param], body: &str) -> usize {
    let Ok(json) = serde_json::from_str::<JsonValue>(body) else {
        return 0;
    };

    let mut filled = 0;
    for param in params.iter_mut().filter(|p| p.is_output()) {
        param.value = navigate(&json, &param.field).and_then(|v| coerce(&v, param.param_type));
        if param.value.is_some() {
            filled += 1;
        }
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_navigate() {
        let body = json!({"data": {"items": [{"id": 7}, {"id": 8}], "token": "abc"}});
        assert_eq!(navigate(&body, "data.token"), Some(json!("abc")));
        assert_eq!(navigate(&body, "data.items[1].id"), Some(json!(8)));
        assert_eq!(navigate(&body, "data.items.0.id"), Some(json!(7)));
        assert_eq!(navigate(&body, "data.items[5].id"), None);
        assert_eq!(navigate(&body, "data.nope"), None);
    }

    #[test]
    fn test_coerce_by_type() {
        assert_eq!(coerce(&json!("x"), ParamType::String), Some(ParamValue::Text("x".into())));
        assert_eq!(coerce(&json!(12), ParamType::String), Some(ParamValue::Text("12".into())));
        assert_eq!(coerce(&json!({"a": 1}), ParamType::String), Some(ParamValue::Text(r#"{"a":1}"#.into())));
        assert_eq!(coerce(&json!(true), ParamType::Boolean), Some(ParamValue::Bool(true)));
        assert_eq!(coerce(&json!("1"), ParamType::Boolean), Some(ParamValue::Bool(true)));
        assert_eq!(coerce(&json!("no"), ParamType::Boolean), Some(ParamValue::Bool(false)));
        assert_eq!(coerce(&json!(0), ParamType::Boolean), Some(ParamValue::Bool(false)));
        assert_eq!(coerce(&json!(2.5), ParamType::Number), Some(ParamValue::Number(2.5)));
        assert_eq!(coerce(&json!("17"), ParamType::Number), Some(ParamValue::Number(17.0)));
        assert_eq!(coerce(&json!("abc"), ParamType::Number), None);
        assert_eq!(coerce(&json!(null), ParamType::String), None);
    }

    #[test]
    fn test_apply_outputs_renders_losslessly() {
        let mut params = vec![
            Param::new("id", ParamType::Number).with_field("data.id"),
            Param::new("name", ParamType::String).with_field("data.name"),
            Param::new("ok", ParamType::Boolean).with_field("data.ok"),
            Param::new("missing", ParamType::String).with_field("data.nothing"),
            Param::new("input", ParamType::String).with_value("kept"),
        ];
        let filled = apply_outputs(
            &mut params,
            r#"{"data":{"id":1234567,"name":"Widget","ok":true}}"#,
        );
        assert_eq!(filled, 3);
        let rendered: Vec<String> = params.iter().map(Param::render).collect();
        assert_eq!(rendered, vec!["1234567", "Widget", "true", "", "kept"]);
        assert!(params[3].value.is_none());
    }

    #[test]
    fn test_apply_outputs_ignores_non_json_body() {
        let mut params = vec![Param::new("id", ParamType::Number).with_field("id")];
        assert_eq!(apply_outputs(&mut params, "<html>oops</html>"), 0);
        assert!(params[0].value.is_none());
    }
}
