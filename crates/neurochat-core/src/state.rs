// Shared-state patching
//
// Tools read and mutate a typed "shared state" document that round-trips
// through the client and is never persisted server-side. Mutations are
// expressed as JSON-Patch operations applied sequentially; after a patch the
// changed top-level keys drive deep-link hints pointing at the platform page
// that displays that part of the state.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{AgentError, Result};

/// Top-level state keys with a dedicated platform page
pub const STATE_KEY_SIMULATION_CONFIG: &str = "smc_simulation_config";

/// JSON-Patch operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
    Move,
    Copy,
    Test,
}

/// A single JSON-Patch operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    /// JSON pointer to the target location
    pub path: String,
    /// Value for add/replace/test
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Source pointer for move/copy
    #[serde(default, rename = "from", skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

/// Apply a patch list sequentially, returning the new document.
///
/// The input document is left untouched; a failing operation aborts the whole
/// application.
pub fn apply_patches(state: &Value, patches: &[PatchOperation]) -> Result<Value> {
    let mut doc = state.clone();
    for patch in patches {
        apply_one(&mut doc, patch)?;
    }
    Ok(doc)
}

fn apply_one(doc: &mut Value, patch: &PatchOperation) -> Result<()> {
    match patch.op {
        PatchOp::Add => {
            let value = required_value(patch)?;
            add(doc, &patch.path, value)
        }
        PatchOp::Replace => {
            let value = required_value(patch)?;
            if patch.path.is_empty() {
                *doc = value;
                return Ok(());
            }
            let target = doc.pointer_mut(&patch.path).ok_or_else(|| {
                AgentError::patch(format!("replace: path {} does not exist", patch.path))
            })?;
            *target = value;
            Ok(())
        }
        PatchOp::Remove => {
            remove(doc, &patch.path)?;
            Ok(())
        }
        PatchOp::Move => {
            let from = required_from(patch)?;
            if patch.path.starts_with(&format!("{from}/")) {
                return Err(AgentError::patch(format!(
                    "move: cannot move {from} into its own child {}",
                    patch.path
                )));
            }
            let value = remove(doc, &from)?;
            add(doc, &patch.path, value)
        }
        PatchOp::Copy => {
            let from = required_from(patch)?;
            let value = doc
                .pointer(&from)
                .ok_or_else(|| AgentError::patch(format!("copy: path {from} does not exist")))?
                .clone();
            add(doc, &patch.path, value)
        }
        PatchOp::Test => {
            let expected = required_value(patch)?;
            let actual = doc
                .pointer(&patch.path)
                .ok_or_else(|| AgentError::patch(format!("test: path {} does not exist", patch.path)))?;
            if *actual != expected {
                return Err(AgentError::patch(format!(
                    "test failed at {}: expected {expected}, found {actual}",
                    patch.path
                )));
            }
            Ok(())
        }
    }
}

fn required_value(patch: &PatchOperation) -> Result<Value> {
    patch
        .value
        .clone()
        .ok_or_else(|| AgentError::patch(format!("{:?}: missing value for {}", patch.op, patch.path)))
}

fn required_from(patch: &PatchOperation) -> Result<String> {
    patch
        .from
        .clone()
        .ok_or_else(|| AgentError::patch(format!("{:?}: missing from for {}", patch.op, patch.path)))
}

/// Split a pointer into its parent pointer and unescaped last token
fn split_pointer(path: &str) -> Result<(String, String)> {
    if !path.starts_with('/') {
        return Err(AgentError::patch(format!("invalid pointer: {path}")));
    }
    let idx = path
        .rfind('/')
        .ok_or_else(|| AgentError::patch(format!("invalid pointer: {path}")))?;
    let token = path[idx + 1..].replace("~1", "/").replace("~0", "~");
    Ok((path[..idx].to_string(), token))
}

fn add(doc: &mut Value, path: &str, value: Value) -> Result<()> {
    if path.is_empty() {
        *doc = value;
        return Ok(());
    }
    let (parent, token) = split_pointer(path)?;
    let parent_val = doc
        .pointer_mut(&parent)
        .ok_or_else(|| AgentError::patch(format!("add: parent {parent} does not exist")))?;

    match parent_val {
        Value::Object(map) => {
            map.insert(token, value);
            Ok(())
        }
        Value::Array(items) => {
            if token == "-" {
                items.push(value);
                return Ok(());
            }
            let index: usize = token
                .parse()
                .map_err(|_| AgentError::patch(format!("add: bad array index {token}")))?;
            if index > items.len() {
                return Err(AgentError::patch(format!(
                    "add: index {index} out of bounds (len {})",
                    items.len()
                )));
            }
            items.insert(index, value);
            Ok(())
        }
        _ => Err(AgentError::patch(format!(
            "add: parent {parent} is not a container"
        ))),
    }
}

fn remove(doc: &mut Value, path: &str) -> Result<Value> {
    let (parent, token) = split_pointer(path)?;
    let parent_val = doc
        .pointer_mut(&parent)
        .ok_or_else(|| AgentError::patch(format!("remove: parent {parent} does not exist")))?;

    match parent_val {
        Value::Object(map) => map
            .remove(&token)
            .ok_or_else(|| AgentError::patch(format!("remove: path {path} does not exist"))),
        Value::Array(items) => {
            let index: usize = token
                .parse()
                .map_err(|_| AgentError::patch(format!("remove: bad array index {token}")))?;
            if index >= items.len() {
                return Err(AgentError::patch(format!(
                    "remove: index {index} out of bounds (len {})",
                    items.len()
                )));
            }
            Ok(items.remove(index))
        }
        _ => Err(AgentError::patch(format!(
            "remove: parent {parent} is not a container"
        ))),
    }
}

/// Permissive validation of a patched document: the state must remain an
/// object and known keys must hold objects. Partial and unknown content is
/// allowed; full validation is a separate tool call.
pub fn validate_partial_state(state: &Value) -> Result<()> {
    let Some(map) = state.as_object() else {
        return Err(AgentError::patch("state must be a JSON object"));
    };
    if let Some(config) = map.get(STATE_KEY_SIMULATION_CONFIG) {
        if !config.is_object() && !config.is_null() {
            return Err(AgentError::patch(format!(
                "{STATE_KEY_SIMULATION_CONFIG} must be an object"
            )));
        }
    }
    Ok(())
}

/// Top-level state keys touched by a patch list
pub fn modified_keys(patches: &[PatchOperation]) -> BTreeSet<String> {
    patches
        .iter()
        .filter_map(|p| p.path.trim_start_matches('/').split('/').next())
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// Build deep links to the platform pages displaying the changed state keys,
/// unless the user is already on the matching page.
pub fn infer_return_urls(
    patches: &[PatchOperation],
    state: &Value,
    current_frontend_url: Option<&str>,
    request_id: Option<&str>,
) -> Option<HashMap<String, String>> {
    let current = current_frontend_url?;
    let parsed = Url::parse(current).ok()?;

    // Expect /app/virtual-lab/<vlab-id>/<project-id>/...
    let segments: Vec<&str> = parsed.path().split('/').collect();
    if segments.len() < 5 || segments[1] != "app" || segments[2] != "virtual-lab" {
        return None;
    }
    let base_path = segments[..5].join("/");

    let mut urls = HashMap::new();
    let modified = modified_keys(patches);

    if modified.contains(STATE_KEY_SIMULATION_CONFIG) {
        let circuit_id = state
            .pointer("/smc_simulation_config/initialize/circuit/id_str")
            .and_then(Value::as_str)
            .and_then(|s| uuid::Uuid::parse_str(s).ok());

        if let Some(circuit_id) = circuit_id {
            if !is_simulation_page(current, &circuit_id.to_string()) {
                let origin = format!(
                    "{}://{}",
                    parsed.scheme(),
                    parsed.host_str().unwrap_or_default()
                );
                let request_id = request_id.unwrap_or_default();
                urls.insert(
                    STATE_KEY_SIMULATION_CONFIG.to_string(),
                    format!(
                        "{origin}{base_path}/workflows/simulate/configure/circuit/{circuit_id}?x-request-id={request_id}"
                    ),
                );
            }
        }
    }

    if urls.is_empty() {
        None
    } else {
        Some(urls)
    }
}

/// Whether the url already shows the simulation configuration of `circuit_id`
fn is_simulation_page(url: &str, circuit_id: &str) -> bool {
    url.contains("/workflows/simulate/configure/circuit") && url.contains(circuit_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(op: PatchOp, path: &str, value: Option<Value>) -> PatchOperation {
        PatchOperation {
            op,
            path: path.to_string(),
            value,
            from: None,
        }
    }

    #[test]
    fn test_add_replace_remove() {
        let state = json!({"a": {"b": 1}, "list": [1, 2]});

        let patched = apply_patches(
            &state,
            &[
                op(PatchOp::Add, "/a/c", Some(json!("x"))),
                op(PatchOp::Replace, "/a/b", Some(json!(2))),
                op(PatchOp::Add, "/list/-", Some(json!(3))),
                op(PatchOp::Add, "/list/0", Some(json!(0))),
                op(PatchOp::Remove, "/list/1", None),
            ],
        )
        .unwrap();

        assert_eq!(patched, json!({"a": {"b": 2, "c": "x"}, "list": [0, 2, 3]}));
        // Original untouched
        assert_eq!(state["a"]["b"], 1);
    }

    #[test]
    fn test_move_copy_test() {
        let state = json!({"src": {"v": 42}, "dst": {}});

        let patched = apply_patches(
            &state,
            &[
                PatchOperation {
                    op: PatchOp::Test,
                    path: "/src/v".to_string(),
                    value: Some(json!(42)),
                    from: None,
                },
                PatchOperation {
                    op: PatchOp::Copy,
                    path: "/dst/copied".to_string(),
                    value: None,
                    from: Some("/src/v".to_string()),
                },
                PatchOperation {
                    op: PatchOp::Move,
                    path: "/dst/moved".to_string(),
                    value: None,
                    from: Some("/src/v".to_string()),
                },
            ],
        )
        .unwrap();

        assert_eq!(patched, json!({"src": {}, "dst": {"copied": 42, "moved": 42}}));
    }

    #[test]
    fn test_failed_test_aborts() {
        let state = json!({"v": 1});
        let err = apply_patches(
            &state,
            &[op(PatchOp::Test, "/v", Some(json!(2)))],
        )
        .unwrap_err();
        assert!(err.to_string().contains("test failed"));
    }

    #[test]
    fn test_replace_missing_path_errors() {
        let state = json!({});
        assert!(apply_patches(&state, &[op(PatchOp::Replace, "/nope", Some(json!(1)))]).is_err());
    }

    #[test]
    fn test_escaped_pointer_tokens() {
        let state = json!({"a/b": 1, "c~d": 2});
        let patched = apply_patches(
            &state,
            &[
                op(PatchOp::Replace, "/a~1b", Some(json!(10))),
                op(PatchOp::Replace, "/c~0d", Some(json!(20))),
            ],
        )
        .unwrap();
        assert_eq!(patched, json!({"a/b": 10, "c~d": 20}));
    }

    #[test]
    fn test_invertible_roundtrip() {
        let state = json!({"config": {"title": "old"}, "list": [1, 2, 3]});
        let forward = [
            op(PatchOp::Replace, "/config/title", Some(json!("new"))),
            op(PatchOp::Add, "/list/1", Some(json!(99))),
        ];
        let reverse = [
            op(PatchOp::Remove, "/list/1", None),
            op(PatchOp::Replace, "/config/title", Some(json!("old"))),
        ];

        let patched = apply_patches(&state, &forward).unwrap();
        let restored = apply_patches(&patched, &reverse).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn test_validate_partial_state() {
        assert!(validate_partial_state(&json!({})).is_ok());
        assert!(validate_partial_state(&json!({"smc_simulation_config": {"info": {}}})).is_ok());
        assert!(validate_partial_state(&json!({"unknown_key": 1})).is_ok());
        assert!(validate_partial_state(&json!([])).is_err());
        assert!(validate_partial_state(&json!({"smc_simulation_config": 3})).is_err());
    }

    #[test]
    fn test_modified_keys() {
        let patches = [
            op(PatchOp::Replace, "/smc_simulation_config/info/title", Some(json!("t"))),
            op(PatchOp::Add, "/other/field", Some(json!(1))),
        ];
        let keys = modified_keys(&patches);
        assert!(keys.contains("smc_simulation_config"));
        assert!(keys.contains("other"));
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_infer_return_urls() {
        let circuit_id = "0aa8f4a4-91b4-4c37-9531-83a27a61d4a1";
        let state = json!({
            "smc_simulation_config": {
                "initialize": {"circuit": {"id_str": circuit_id}}
            }
        });
        let patches = [op(
            PatchOp::Replace,
            "/smc_simulation_config/initialize/circuit/id_str",
            Some(json!(circuit_id)),
        )];

        // On an unrelated page, a deep link is produced
        let urls = infer_return_urls(
            &patches,
            &state,
            Some("https://platform.example.com/app/virtual-lab/vlab-1/proj-1/home"),
            Some("req-1"),
        )
        .unwrap();
        let link = &urls["smc_simulation_config"];
        assert!(link.contains("/app/virtual-lab/vlab-1/proj-1/workflows/simulate/configure/circuit/"));
        assert!(link.contains(circuit_id));
        assert!(link.ends_with("x-request-id=req-1"));

        // Already on the right page: no link
        let on_page = format!(
            "https://platform.example.com/app/virtual-lab/vlab-1/proj-1/workflows/simulate/configure/circuit/{circuit_id}"
        );
        assert!(infer_return_urls(&patches, &state, Some(&on_page), None).is_none());

        // Outside the virtual-lab section: no link
        assert!(infer_return_urls(
            &patches,
            &state,
            Some("https://platform.example.com/some/other/page"),
            None
        )
        .is_none());
    }
}
