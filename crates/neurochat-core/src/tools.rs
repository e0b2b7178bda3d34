// Tool abstraction
//
// Tools are the units the LLM can invoke. Each tool exposes a stable name,
// frontend-facing metadata, an input JSON schema derived from its typed
// input struct, an `hil` flag for calls that must pause for user approval,
// and an async `run` taking the typed request context.
//
// Design decisions:
// - Tools are trait objects registered once at startup (internal + MCP),
//   then narrowed per request by the whitelist regex and the tool filter
// - Argument validation happens at the dispatch boundary, not inside tools;
//   a tool's `run` receives arguments that already conform to its schema

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use thiserror::Error;

use crate::agent::Agent;
use crate::context::ToolContext;

mod editstate;
mod getstate;
mod handoff;
mod literature;
mod morphologies;

pub use editstate::EditStateTool;
pub use getstate::GetStateTool;
pub use handoff::HandoffTool;
pub use literature::LiteratureSearchTool;
pub use morphologies::{MorphologyGetAllTool, MorphologyGetOneTool};

// ============================================================================
// Tool Trait
// ============================================================================

/// Outcome of a successful tool run
#[derive(Debug, Clone)]
pub enum ToolOutput {
    /// Serialized tool output, passed verbatim to the LLM
    Text(String),
    /// Control transfer to another agent configuration
    Handoff(Agent),
}

/// Errors a tool run can produce
#[derive(Debug, Error)]
pub enum ToolError {
    /// The request context does not grant access to this tool
    /// (missing project scope, absent client, ...)
    #[error("{0}")]
    Forbidden(String),

    /// The tool ran and failed; the message is fed back to the LLM
    #[error("{0}")]
    Execution(String),
}

/// Trait implemented by every invocable tool
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable identifier the LLM calls the tool by
    fn name(&self) -> &str;

    /// Human-facing display name
    fn name_frontend(&self) -> &str;

    /// Description shown to the LLM
    fn description(&self) -> &str;

    /// Description shown in the frontend tool catalog
    fn description_frontend(&self) -> &str {
        self.description()
    }

    /// Example utterances that should trigger this tool
    fn utterances(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether invocation must pause for user approval
    fn hil(&self) -> bool {
        false
    }

    /// JSON schema of the tool's input
    fn input_schema(&self) -> Value;

    /// Execute with validated arguments
    async fn run(
        &self,
        ctx: &ToolContext,
        call_id: &str,
        arguments: Value,
    ) -> std::result::Result<ToolOutput, ToolError>;

    /// Tool schema document sent to the LLM
    fn schema_document(&self) -> Value {
        json!({
            "type": "function",
            "name": self.name(),
            "description": self.description(),
            "parameters": self.input_schema(),
        })
    }
}

// ============================================================================
// ToolRegistry
// ============================================================================

/// Process-wide tool catalog, assembled once at startup from internal tools
/// and any MCP-synthesized tools, then filtered by the whitelist regex.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Assemble the catalog. A missing whitelist means an empty catalog: the
    /// deployment must opt tools in explicitly (the default pattern is `.*`).
    pub fn assemble(
        internal: Vec<Arc<dyn Tool>>,
        mcp: Vec<Arc<dyn Tool>>,
        whitelist: Option<&Regex>,
    ) -> Self {
        let Some(whitelist) = whitelist else {
            return Self::new();
        };
        let tools = internal
            .into_iter()
            .chain(mcp)
            .filter(|tool| whitelist.is_match(tool.name()))
            .collect();
        Self { tools }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Subset of the catalog by name, preserving catalog order and dropping
    /// unknown names
    pub fn select(&self, names: &[String]) -> Vec<Arc<dyn Tool>> {
        self.tools
            .iter()
            .filter(|t| names.iter().any(|n| n == t.name()))
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

// ============================================================================
// Argument validation and sanitization
// ============================================================================

/// Validate arguments against a tool's input schema.
///
/// Returns the validator's error payload on failure so the LLM can
/// self-correct from it.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> std::result::Result<(), Value> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(v) => v,
        Err(e) => return Err(json!([{"message": e.to_string()}])),
    };

    let errors: Vec<Value> = validator
        .iter_errors(arguments)
        .map(|err| {
            json!({
                "path": err.instance_path.to_string(),
                "message": err.to_string(),
            })
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Value::Array(errors))
    }
}

/// Canonicalize a value against a schema: drop properties the schema does not
/// declare and fill in declared defaults for absent ones. Non-object schemas
/// pass values through untouched.
pub fn canonicalize_arguments(schema: &Value, value: &Value) -> Value {
    match (schema.get("properties"), value) {
        (Some(Value::Object(properties)), Value::Object(fields)) => {
            let mut out = Map::new();
            for (key, prop_schema) in properties {
                if let Some(field) = fields.get(key) {
                    out.insert(key.clone(), canonicalize_arguments(prop_schema, field));
                } else if let Some(default) = prop_schema.get("default") {
                    out.insert(key.clone(), default.clone());
                }
            }
            Value::Object(out)
        }
        _ => match (schema.get("items"), value) {
            (Some(item_schema), Value::Array(items)) => Value::Array(
                items
                    .iter()
                    .map(|item| canonicalize_arguments(item_schema, item))
                    .collect(),
            ),
            _ => value.clone(),
        },
    }
}

/// Round-trip arguments through a schema: unknown fields are dropped and
/// defaults applied first, then the result is validated. Mirrors how a typed
/// parser with ignored extras would accept the input.
pub fn coerce_arguments(schema: &Value, arguments: &Value) -> std::result::Result<Value, Value> {
    let canonical = canonicalize_arguments(schema, arguments);
    validate_arguments(schema, &canonical)?;
    Ok(canonical)
}

/// Sanitize a streamed arguments string: if it parses and survives the
/// schema round-trip, return the canonical form; otherwise keep the raw
/// string so the invalid input is preserved verbatim in the part payload.
pub fn sanitize_arguments(schema: &Value, raw: &str) -> String {
    let Ok(parsed) = serde_json::from_str::<Value>(raw) else {
        return raw.to_string();
    };
    match coerce_arguments(schema, &parsed) {
        Ok(canonical) => serde_json::to_string(&canonical).unwrap_or_else(|_| raw.to_string()),
        Err(_) => raw.to_string(),
    }
}

/// Remove properties the caller is never allowed to set from a schema
/// document (they are injected server-side instead).
pub fn omit_properties(mut schema: Value, hidden: &[&str]) -> Value {
    if let Some(Value::Object(properties)) = schema.get_mut("properties") {
        for field in hidden {
            properties.remove(*field);
        }
    }
    if let Some(Value::Array(required)) = schema.get_mut("required") {
        required.retain(|name| {
            name.as_str()
                .map(|n| !hidden.contains(&n))
                .unwrap_or(true)
        });
    }
    schema
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ToolContext;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn name_frontend(&self) -> &str {
            "Echo"
        }
        fn description(&self) -> &str {
            "Echo back the provided message."
        }
        fn input_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "message": {"type": "string"}
                },
                "required": ["message"],
                "additionalProperties": false
            })
        }
        async fn run(&self, _ctx: &ToolContext, _call_id: &str, arguments: Value) -> std::result::Result<ToolOutput, ToolError> {
            Ok(ToolOutput::Text(arguments["message"].to_string()))
        }
    }

    #[test]
    fn test_registry_assemble_applies_whitelist() {
        let whitelist = Regex::new("^echo$").unwrap();
        let registry = ToolRegistry::assemble(vec![Arc::new(EchoTool)], vec![], Some(&whitelist));
        assert!(registry.has("echo"));

        let none = Regex::new("^nothing$").unwrap();
        let registry = ToolRegistry::assemble(vec![Arc::new(EchoTool)], vec![], Some(&none));
        assert!(registry.is_empty());

        let registry = ToolRegistry::assemble(vec![Arc::new(EchoTool)], vec![], None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_select_preserves_catalog_order() {
        let whitelist = Regex::new(".*").unwrap();
        let registry = ToolRegistry::assemble(vec![Arc::new(EchoTool)], vec![], Some(&whitelist));

        let selected = registry.select(&["missing".to_string(), "echo".to_string()]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name(), "echo");
    }

    #[test]
    fn test_schema_document_shape() {
        let doc = EchoTool.schema_document();
        assert_eq!(doc["type"], "function");
        assert_eq!(doc["name"], "echo");
        assert_eq!(doc["parameters"]["type"], "object");
    }

    #[test]
    fn test_validate_arguments_reports_errors() {
        let schema = EchoTool.input_schema();
        assert!(validate_arguments(&schema, &json!({"message": "hi"})).is_ok());

        let err = validate_arguments(&schema, &json!({"message": 3})).unwrap_err();
        let errors = err.as_array().unwrap();
        assert!(!errors.is_empty());
        assert!(errors[0]["message"].as_str().unwrap().contains("3"));
    }

    #[test]
    fn test_canonicalize_drops_unknown_and_applies_defaults() {
        let schema = json!({
            "type": "object",
            "properties": {
                "location": {"type": "string"},
                "units": {"type": "string", "default": "celsius"}
            }
        });
        let value = json!({"location": "Paris", "extra": true});

        let canonical = canonicalize_arguments(&schema, &value);
        assert_eq!(canonical, json!({"location": "Paris", "units": "celsius"}));
    }

    #[test]
    fn test_sanitize_arguments_keeps_invalid_raw() {
        let schema = EchoTool.input_schema();

        let valid = sanitize_arguments(&schema, "{\"message\": \"hi\", \"junk\": 1}");
        assert_eq!(valid, "{\"message\":\"hi\"}");

        let invalid = sanitize_arguments(&schema, "{\"message\": 3}");
        assert_eq!(invalid, "{\"message\": 3}");

        let truncated = sanitize_arguments(&schema, "{\"messa");
        assert_eq!(truncated, "{\"messa");
    }

    #[test]
    fn test_omit_properties() {
        let schema = json!({
            "type": "object",
            "properties": {
                "page": {"type": "integer"},
                "within_brain_region_hierarchy_id": {"type": "string"}
            },
            "required": ["within_brain_region_hierarchy_id"]
        });

        let trimmed = omit_properties(schema, &["within_brain_region_hierarchy_id"]);
        assert!(trimmed["properties"]
            .get("within_brain_region_hierarchy_id")
            .is_none());
        assert!(trimmed["properties"].get("page").is_some());
        assert_eq!(trimmed["required"].as_array().unwrap().len(), 0);
    }
}
