use crate::context::RequestContext;
use crate::error::{AssistantError, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: String,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParamSchema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSchema {
    pub fn new(param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            param_type,
            description: description.into(),
            allowed: Vec::new(),
            items: None,
            default: None,
        }
    }

    pub fn one_of(mut self, allowed: &[&str]) -> Self {
        self.allowed = allowed.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn items(mut self, items: ParamSchema) -> Self {
        self.items = Some(Box::new(items));
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    fn matches(&self, value: &Value) -> bool {
        let type_ok = match self.param_type {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        };
        if !type_ok {
            return false;
        }
        match value.as_str() {
            Some(s) if !self.allowed.is_empty() => self.allowed.iter().any(|a| a == s),
            _ => true,
        }
    }

    /// Returns the value restricted to what the schema accepts, or `None`.
    /// Array elements that do not match `items` are dropped.
    fn coerce(&self, name: &str, value: Value) -> Option<Value> {
        if !self.matches(&value) {
            return None;
        }
        match (value, &self.items) {
            (Value::Array(elements), Some(items)) => {
                let total = elements.len();
                let kept: Vec<Value> = elements.into_iter().filter(|e| items.matches(e)).collect();
                if kept.len() != total {
                    tracing::warn!(
                        param = %name,
                        dropped = total - kept.len(),
                        "dropping array elements that do not match schema"
                    );
                }
                Some(Value::Array(kept))
            }
            (value, _) => Some(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: BTreeMap<String, ParamSchema>,
    pub required: BTreeSet<String>,
}

impl FunctionDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: BTreeMap::new(),
            required: BTreeSet::new(),
        }
    }

    pub fn param(mut self, name: &str, schema: ParamSchema) -> Self {
        self.parameters.insert(name.to_string(), schema);
        self
    }

    pub fn required_param(mut self, name: &str, schema: ParamSchema) -> Self {
        self.parameters.insert(name.to_string(), schema);
        self.required.insert(name.to_string());
        self
    }
}

/// Parameters that passed schema filtering, ready to decode into a typed record.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionArgs {
    function: String,
    values: Map<String, Value>,
}

impl FunctionArgs {
    pub fn new(function: impl Into<String>, values: Map<String, Value>) -> Self {
        Self {
            function: function.into(),
            values,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.values.clone())).map_err(|e| {
            AssistantError::invalid(format!("invalid arguments for {}: {e}", self.function))
        })
    }
}

#[async_trait::async_trait]
pub trait FunctionHandler: Send + Sync {
    async fn call(&self, ctx: &RequestContext, args: FunctionArgs) -> Result<Value>;
}

#[derive(Clone)]
struct Entry {
    definition: Arc<FunctionDefinition>,
    handler: Arc<dyn FunctionHandler>,
}

/// Process-wide function catalog. Lookups share a read lock; registration is exclusive.
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, definition: FunctionDefinition, handler: Arc<dyn FunctionHandler>) -> Result<()> {
        if definition.name.trim().is_empty() {
            return Err(AssistantError::invalid("function name must be non-empty"));
        }
        if let Some(missing) = definition
            .required
            .iter()
            .find(|r| !definition.parameters.contains_key(*r))
        {
            return Err(AssistantError::invalid(format!(
                "required parameter not in schema: {missing}"
            )));
        }

        let mut entries = self.entries.write();
        if entries.contains_key(&definition.name) {
            return Err(AssistantError::invalid(format!(
                "function already registered: {}",
                definition.name
            )));
        }
        tracing::debug!(name = %definition.name, "registering function");
        entries.insert(
            definition.name.clone(),
            Entry {
                definition: Arc::new(definition),
                handler,
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn definition(&self, name: &str) -> Option<Arc<FunctionDefinition>> {
        self.entries.read().get(name).map(|e| e.definition.clone())
    }

    /// All definitions, sorted by name.
    pub fn definitions(&self) -> Vec<FunctionDefinition> {
        let mut defs: Vec<FunctionDefinition> = self
            .entries
            .read()
            .values()
            .map(|e| e.definition.as_ref().clone())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub async fn call(&self, ctx: &RequestContext, name: &str, params: Map<String, Value>) -> Result<Value> {
        let entry = self
            .entries
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| AssistantError::not_found(format!("function not found: {name}")))?;

        let args = filter_params(&entry.definition, params)?;
        ctx.ensure_active()?;
        entry.handler.call(ctx, args).await
    }
}

/// Checks required keys, drops unknown or mistyped parameters and fills defaults.
fn filter_params(definition: &FunctionDefinition, params: Map<String, Value>) -> Result<FunctionArgs> {
    if let Some(missing) = definition.required.iter().find(|r| !params.contains_key(*r)) {
        return Err(AssistantError::invalid(format!(
            "missing required parameter: {missing}"
        )));
    }

    let mut accepted = Map::new();
    for (key, value) in params {
        let Some(schema) = definition.parameters.get(&key) else {
            tracing::warn!(function = %definition.name, param = %key, "dropping unknown parameter");
            continue;
        };
        match schema.coerce(&key, value) {
            Some(value) => {
                accepted.insert(key, value);
            }
            None if definition.required.contains(&key) => {
                return Err(AssistantError::invalid(format!(
                    "invalid value for parameter: {key}"
                )));
            }
            None => {
                tracing::warn!(function = %definition.name, param = %key, "dropping parameter that does not match schema");
            }
        }
    }

    for (key, schema) in &definition.parameters {
        if let (false, Some(default)) = (accepted.contains_key(key), &schema.default) {
            accepted.insert(key.clone(), default.clone());
        }
    }

    Ok(FunctionArgs::new(definition.name.clone(), accepted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Echo;

    #[async_trait::async_trait]
    impl FunctionHandler for Echo {
        async fn call(&self, _ctx: &RequestContext, args: FunctionArgs) -> Result<Value> {
            Ok(Value::Object(args.as_map().clone()))
        }
    }

    fn echo_definition() -> FunctionDefinition {
        FunctionDefinition::new("echo", "returns its arguments")
            .required_param("symbol", ParamSchema::new(ParamType::String, "asset"))
            .param(
                "timeframe",
                ParamSchema::new(ParamType::String, "candle size")
                    .one_of(&["1h", "1d"])
                    .default_value(json!("1h")),
            )
            .param(
                "tags",
                ParamSchema::new(ParamType::Array, "tags")
                    .items(ParamSchema::new(ParamType::String, "tag").one_of(&["a", "b"])),
            )
            .param("limit", ParamSchema::new(ParamType::Integer, "max rows"))
    }

    fn registry() -> FunctionRegistry {
        let r = FunctionRegistry::new();
        r.register(echo_definition(), Arc::new(Echo)).unwrap();
        r
    }

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn unknown_function_is_not_found() {
        let err = registry()
            .call(&RequestContext::background(), "nope", Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().starts_with("function not found"));
    }

    #[tokio::test]
    async fn missing_required_parameter_is_reported() {
        let err = registry()
            .call(&RequestContext::background(), "echo", params(json!({"limit": 1})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(err.to_string(), "missing required parameter: symbol");
    }

    #[tokio::test]
    async fn handler_sees_only_schema_matching_values() {
        let out = registry()
            .call(
                &RequestContext::background(),
                "echo",
                params(json!({
                    "symbol": "BTC",
                    "timeframe": "3m",
                    "limit": 2.5,
                    "tags": ["a", "z", 3, "b"],
                    "extra": true
                })),
            )
            .await
            .unwrap();
        assert_eq!(out, json!({"symbol": "BTC", "timeframe": "1h", "tags": ["a", "b"]}));
    }

    #[tokio::test]
    async fn mistyped_required_parameter_is_invalid() {
        let err = registry()
            .call(&RequestContext::background(), "echo", params(json!({"symbol": 42})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid value for parameter: symbol");
    }

    #[test]
    fn duplicate_registration_fails() {
        let r = registry();
        let err = r.register(echo_definition(), Arc::new(Echo)).unwrap_err();
        assert_eq!(err.to_string(), "function already registered: echo");
    }

    #[test]
    fn required_must_be_in_schema() {
        let mut def = FunctionDefinition::new("broken", "");
        def.required.insert("ghost".to_string());
        let err = FunctionRegistry::new().register(def, Arc::new(Echo)).unwrap_err();
        assert_eq!(err.to_string(), "required parameter not in schema: ghost");
    }

    #[test]
    fn definitions_are_sorted() {
        let r = registry();
        r.register(FunctionDefinition::new("alpha", ""), Arc::new(Echo)).unwrap();
        let names: Vec<_> = r.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "echo"]);
    }

    #[test]
    fn typed_args_decode_errors_are_invalid_input() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Args {
            amount: f64,
        }
        let args = FunctionArgs::new("f", params(json!({"amount": "ten"})));
        let err = args.parse::<Args>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn concurrent_calls_share_the_registry() {
        let r = registry();
        let mut handles = Vec::new();
        for i in 0..8 {
            let r = r.clone();
            handles.push(tokio::spawn(async move {
                r.call(
                    &RequestContext::background(),
                    "echo",
                    params(json!({"symbol": format!("S{i}")})),
                )
                .await
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }
    }
}
