use crate::error::{AssistantError, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

/// A function invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: Map<String, Value>,
}

#[derive(Deserialize)]
struct RawCall {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Parses `{"name": ..., "arguments": ...}`. `arguments` may be an object,
/// a JSON-encoded object string, or absent.
pub fn parse_function_call(json: &str) -> Result<FunctionCall> {
    let raw: RawCall = serde_json::from_str(json)
        .map_err(|e| AssistantError::invalid(format!("failed to parse function call: {e}")))?;

    if raw.name.trim().is_empty() {
        return Err(AssistantError::invalid("function call has no name"));
    }

    let arguments = match raw.arguments {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        Value::String(encoded) if encoded.trim().is_empty() => Map::new(),
        Value::String(encoded) => match serde_json::from_str::<Value>(&encoded) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(AssistantError::invalid("function arguments must be an object")),
            Err(e) => {
                return Err(AssistantError::invalid(format!(
                    "failed to parse function arguments: {e}"
                )))
            }
        },
        _ => return Err(AssistantError::invalid("function arguments must be an object")),
    };

    Ok(FunctionCall {
        name: raw.name,
        arguments,
    })
}
