//! Workflow template parsing and substitution (spec §3 `WorkflowTemplate`,
//! `ParsedInputSpec`, §4.4 Workflow Engine).
//!
//! Grounded on `get_parsed_input_nodes` and `parse_workflow_prompt` in
//! `bridge_server/assistant.py`.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::ServerError;
use crate::upload::{FileValidator, StagedUploadRegistry};

/// A single exposed input on a workflow node, keyed by `"<nodeId>/<inputName>"`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ParsedInputSpec {
    #[serde(rename = "type")]
    pub type_: String,
    pub title: String,
    pub default: Value,
}

/// The full set of exposed inputs for one workflow template.
pub type ParsedInputs = HashMap<String, ParsedInputSpec>;

/// Extract every exposed input from a workflow template's `_meta.apiinput`
/// comma-separated lists.
///
/// Rejects a node that names an `apiinput` whose value is absent or the
/// empty string, matching the Python's `if input_value is None or
/// input_value == ""`.
///
/// `tracing_mime_types` retypes a string input whose filename extension
/// maps to one of the configured MIME types, so the workflow engine can
/// later bypass type-checking it as a file handle instead of a plain
/// string (spec §4.4).
pub fn parse_inputs(template: &Value, tracing_mime_types: &[String]) -> Result<ParsedInputs, ServerError> {
    let nodes = template
        .as_object()
        .ok_or_else(|| ServerError::BadTemplate("template root is not an object".into()))?;

    let mut parsed = ParsedInputs::new();

    for (node_id, node) in nodes {
        let Some(api_input_list) = node
            .get("_meta")
            .and_then(|m| m.get("apiinput"))
            .and_then(Value::as_str)
        else {
            continue;
        };

        let title = node
            .get("_meta")
            .and_then(|m| m.get("title"))
            .and_then(Value::as_str)
            .unwrap_or(node_id)
            .to_owned();

        let inputs = node.get("inputs").and_then(Value::as_object).ok_or_else(|| {
            ServerError::BadTemplate(format!("node '{node_id}' has no inputs object"))
        })?;

        for api_input in api_input_list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let input_value = inputs.get(api_input).ok_or_else(|| {
                ServerError::BadTemplate(format!(
                    "node '{node_id}' declares apiinput '{api_input}' with no matching input"
                ))
            })?;

            let is_empty_string = matches!(input_value, Value::String(s) if s.is_empty());
            if input_value.is_null() || is_empty_string {
                return Err(ServerError::BadTemplate(format!(
                    "node '{node_id}' apiinput '{api_input}' has no default value"
                )));
            }

            let mut input_type = json_type_name(input_value).to_owned();
            if let Value::String(s) = input_value {
                if let Some(mime) = mime_from_filename(s) {
                    if tracing_mime_types.iter().any(|m| m == &mime) {
                        input_type = mime;
                    }
                }
            }

            let key = format!("{node_id}/{api_input}");
            parsed.insert(
                key,
                ParsedInputSpec {
                    type_: input_type,
                    title: title.clone(),
                    default: input_value.clone(),
                },
            );
        }
    }

    Ok(parsed)
}

/// Substitute caller-supplied `kwargs` into `template`, type-checking each
/// against its declared input type unless that type is a tagged MIME type
/// (file handles bypass the check, per spec §4.4).
///
/// Inputs not present in `kwargs` keep their template default. Mutates
/// `template` in place.
pub fn substitute(
    template: &mut Value,
    parsed: &ParsedInputs,
    kwargs: &HashMap<String, Value>,
) -> Result<(), ServerError> {
    for (key, spec) in parsed {
        let Some((node_id, input_name)) = key.split_once('/') else {
            continue;
        };

        let Some(value) = kwargs.get(key) else {
            continue;
        };

        let is_mime_tagged = spec.type_.contains('/');
        if !is_mime_tagged {
            let actual_type = json_type_name(value);
            if actual_type != spec.type_ {
                return Err(ServerError::TypeMismatch(format!(
                    "'{key}' need to have type of {} but got {actual_type} from {value}",
                    spec.type_
                )));
            }
        }

        template
            .get_mut(node_id)
            .and_then(|n| n.get_mut("inputs"))
            .and_then(Value::as_object_mut)
            .ok_or_else(|| ServerError::BadTemplate(format!("node '{node_id}' missing inputs")))?
            .insert(input_name.to_owned(), value.clone());
    }
    Ok(())
}

/// Resolve every `bridge_server_comfyui_`-prefixed staged-upload handle
/// appearing as a string input value: read the staged tmp file, upload it
/// to `backend_address`, replace the kwarg with the backend's
/// `"<subfolder>/<filename>"`, and release the staged entry.
///
/// Already-resolved handles elsewhere in the same template are left
/// untouched; a handle with no matching staged entry fails with
/// [`ServerError::StagedFileMissing`].
pub async fn resolve_staged_uploads(
    template: &mut Value,
    registry: &StagedUploadRegistry,
    file_validator: &FileValidator,
    backend: &crate::backend::BackendClient,
    backend_address: &str,
) -> Result<(), ServerError> {
    let Some(nodes) = template.as_object_mut() else {
        return Ok(());
    };

    for node in nodes.values_mut() {
        let Some(inputs) = node.get_mut("inputs").and_then(Value::as_object_mut) else {
            continue;
        };

        for (input_name, value) in inputs.iter_mut() {
            let Some(handle) = value.as_str().filter(|s| s.starts_with(crate::upload::STAGED_UPLOAD_PREFIX)) else {
                continue;
            };
            let handle = handle.to_owned();

            let staged = registry
                .take(&handle)
                .await
                .ok_or_else(|| ServerError::StagedFileMissing(handle.clone()))?;

            let extension = file_validator.canonical_extension(&staged.mime_type).unwrap_or("");
            let upload_filename = format!("{handle}{extension}");

            let response = backend
                .upload_image(backend_address, &staged.tmp_path, &upload_filename, "input")
                .await?;

            tokio::fs::remove_file(&staged.tmp_path).await.ok();

            let subfolder = response.get("subfolder").and_then(Value::as_str).unwrap_or("");
            let name = response
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(&upload_filename);
            let resolved = if subfolder.is_empty() {
                name.to_owned()
            } else {
                format!("{subfolder}/{name}")
            };

            *value = Value::String(resolved);
        }
    }

    Ok(())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "NoneType",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "int",
        Value::Number(_) => "float",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

fn mime_from_filename(name: &str) -> Option<String> {
    mime_guess::from_path(name).first().map(|m| m.essence_str().to_owned())
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_template() -> Value {
        serde_json::json!({
            "3": {
                "class_type": "KSampler",
                "inputs": {"steps": 20, "seed": 42},
                "_meta": {"apiinput": "steps,seed", "title": "Sampler"}
            },
            "6": {
                "class_type": "CLIPTextEncode",
                "inputs": {"text": "a cat"},
                "_meta": {"apiinput": "text", "title": "Prompt"}
            }
        })
    }

    #[test]
    fn parses_declared_inputs() {
        let template = sample_template();
        let parsed = parse_inputs(&template, &[]).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed["3/steps"].type_, "int");
        assert_eq!(parsed["6/text"].type_, "str");
    }

    #[test]
    fn rejects_empty_string_default() {
        let template = serde_json::json!({
            "1": {
                "class_type": "X",
                "inputs": {"text": ""},
                "_meta": {"apiinput": "text"}
            }
        });
        assert!(matches!(parse_inputs(&template, &[]), Err(ServerError::BadTemplate(_))));
    }

    #[test]
    fn substitute_accepts_matching_type() {
        let mut template = sample_template();
        let parsed = parse_inputs(&template, &[]).unwrap();
        let mut kwargs = HashMap::new();
        kwargs.insert("3/steps".to_owned(), serde_json::json!(30));
        substitute(&mut template, &parsed, &kwargs).unwrap();
        assert_eq!(template["3"]["inputs"]["steps"], serde_json::json!(30));
    }

    #[test]
    fn substitute_rejects_mismatched_type() {
        let mut template = sample_template();
        let parsed = parse_inputs(&template, &[]).unwrap();
        let mut kwargs = HashMap::new();
        kwargs.insert("3/steps".to_owned(), serde_json::json!("thirty"));
        let err = substitute(&mut template, &parsed, &kwargs).unwrap_err();
        assert!(matches!(err, ServerError::TypeMismatch(_)));
    }

    #[test]
    fn substitute_falls_back_to_default_when_kwarg_absent() {
        let mut template = sample_template();
        let parsed = parse_inputs(&template, &[]).unwrap();
        substitute(&mut template, &parsed, &HashMap::new()).unwrap();
        assert_eq!(template["3"]["inputs"]["seed"], serde_json::json!(42));
    }

    #[test]
    fn mime_tagged_input_bypasses_type_check() {
        let mut template = serde_json::json!({
            "1": {
                "class_type": "LoadImage",
                "inputs": {"image": "placeholder.png"},
                "_meta": {"apiinput": "image"}
            }
        });
        let parsed = parse_inputs(&template, &["image/png".to_owned()]).unwrap();
        assert_eq!(parsed["1/image"].type_, "image/png");

        let mut kwargs = HashMap::new();
        kwargs.insert(
            "1/image".to_owned(),
            serde_json::json!("bridge_server_comfyui_abc123"),
        );
        substitute(&mut template, &parsed, &kwargs).unwrap();
        assert_eq!(
            template["1"]["inputs"]["image"],
            serde_json::json!("bridge_server_comfyui_abc123")
        );
    }
}
