//! Schema inference from example documents.

use common::ScalarType;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    error::{SchemaError, SchemaResult},
    node::{NodeArray, NodeObject, NodeScalar, StructuralPath},
    openapi::OpenApiDocument,
};

/// Keys under which registry page payloads carry their entries.
pub const PAGE_ENTRY_KEYS: [&str; 2] = ["results", "registerEntries"];

/// Infers the shape of a single sample document rooted at `root_name`.
pub fn infer_schema(sample: &Value, root_name: &str) -> SchemaResult<NodeObject> {
    match sample {
        Value::Object(map) => Ok(infer_object(map, vec![root_name.to_string()])),
        other => Err(SchemaError::InvalidRoot {
            root: root_name.to_string(),
            reason: format!("sample must be a JSON object, found {}", json_kind(other)),
        }),
    }
}

/// Merges the shapes of several samples into one tree.
pub fn infer_samples<'a, I>(samples: I, root_name: &str) -> SchemaResult<NodeObject>
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut merged: Option<NodeObject> = None;
    let mut count = 0usize;
    for sample in samples {
        let node = infer_schema(sample, root_name)?;
        merged = Some(match merged {
            Some(existing) => existing.merge(node),
            None => node,
        });
        count += 1;
    }
    debug!(root = root_name, samples = count, "inferred schema from samples");
    merged.ok_or_else(|| SchemaError::InvalidRoot {
        root: root_name.to_string(),
        reason: "no sample documents".to_string(),
    })
}

/// Uses declaration mode when `document` is itself a JSON Schema object,
/// otherwise treats it (or the entries of a page payload) as example data.
pub fn infer_auto(document: &Value, root_name: &str) -> SchemaResult<NodeObject> {
    if is_schema_document(document) {
        debug!(root = root_name, "document looks like a JSON schema");
        return OpenApiDocument::new(document).infer_root(document, root_name);
    }
    infer_samples(sample_documents(document), root_name)
}

/// True for `{"properties": {...}}` documents whose `type` is `object` or absent.
pub fn is_schema_document(document: &Value) -> bool {
    let Some(map) = document.as_object() else {
        return false;
    };
    map.get("properties").map(Value::is_object).unwrap_or(false)
        && match map.get("type") {
            None => true,
            Some(Value::String(t)) => t == "object",
            Some(Value::Array(types)) => types.iter().any(|t| t == "object"),
            Some(_) => false,
        }
}

/// Splits a payload into the documents it carries: the object items of an
/// array, the entries of a page object, or the payload itself.
pub fn sample_documents(payload: &Value) -> Vec<&Value> {
    match payload {
        Value::Array(items) => items.iter().filter(|v| v.is_object()).collect(),
        Value::Object(map) => PAGE_ENTRY_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .map(|items| items.iter().filter(|v| v.is_object()).collect())
            .unwrap_or_else(|| vec![payload]),
        _ => Vec::new(),
    }
}

fn infer_object(map: &Map<String, Value>, path: StructuralPath) -> NodeObject {
    let mut node = NodeObject::new(path);
    for (key, value) in map {
        match value {
            Value::Object(child) => {
                let child_path = node.child_path(key);
                node.objects
                    .insert(key.clone(), infer_object(child, child_path));
            }
            Value::Array(items) => {
                let child_path = node.child_path(key);
                node.arrays.insert(key.clone(), infer_array(items, child_path));
            }
            scalar => {
                node.scalars.insert(
                    key.clone(),
                    NodeScalar::new(ScalarType::infer(scalar), true),
                );
            }
        }
    }
    node
}

fn infer_array(items: &[Value], path: StructuralPath) -> NodeArray {
    if items.is_empty() {
        return NodeArray::empty();
    }

    // Any non-object item turns the whole list into a scalar list.
    if items.iter().any(|item| !item.is_object()) {
        let scalar_type = items
            .iter()
            .map(ScalarType::infer)
            .reduce(ScalarType::merge)
            .unwrap_or_default();
        return NodeArray::scalar(scalar_type);
    }

    let merged = items
        .iter()
        .filter_map(Value::as_object)
        .map(|item| infer_object(item, path.clone()))
        .reduce(NodeObject::merge)
        .unwrap_or_else(|| NodeObject::new(path));
    NodeArray::Object(merged)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_infer_nested_shapes() {
        let sample = json!({
            "registerNumber": "R001",
            "active": true,
            "address": {"city": "Berlin", "zip": "10117"},
            "tags": ["a", "b"],
            "donors": [{"name": "X", "amount": 10}, {"name": "Y", "amount": 12.5}]
        });
        let node = infer_schema(&sample, "register_entries").unwrap();

        assert_eq!(node.path, vec!["register_entries".to_string()]);
        assert_eq!(node.scalars["registerNumber"].scalar_type, ScalarType::Text);
        assert_eq!(node.scalars["active"].scalar_type, ScalarType::Boolean);
        assert_eq!(
            node.objects["address"].path,
            vec!["register_entries".to_string(), "address".to_string()]
        );
        assert_eq!(node.arrays["tags"], NodeArray::scalar(ScalarType::Text));
        match &node.arrays["donors"] {
            NodeArray::Object(donor) => {
                assert_eq!(donor.scalars["amount"].scalar_type, ScalarType::Number);
                assert_eq!(donor.path.last().map(String::as_str), Some("donors"));
            }
            other => panic!("expected object array, got {other:?}"),
        }
    }

    #[test]
    fn test_inference_is_idempotent() {
        let sample = json!({
            "a": 1,
            "b": {"c": [1, 2.5], "d": [{"e": "2024-01-01T00:00:00Z"}]},
            "f": []
        });
        assert_eq!(
            infer_schema(&sample, "root").unwrap(),
            infer_schema(&sample, "root").unwrap()
        );
    }

    #[test]
    fn test_empty_array_defaults_to_text_scalars() {
        let node = infer_schema(&json!({"items": []}), "root").unwrap();
        assert_eq!(node.arrays["items"], NodeArray::empty());
        assert!(!node.arrays["items"].is_object());
    }

    #[test]
    fn test_stray_scalar_degrades_object_array() {
        let sample = json!({"items": [{"a": 1}, {"a": 2}, "oops"]});
        let node = infer_schema(&sample, "root").unwrap();
        assert_eq!(node.arrays["items"], NodeArray::scalar(ScalarType::Text));
    }

    #[test]
    fn test_scalar_array_widens_across_items() {
        let node = infer_schema(&json!({"n": [1, 2, 3.5]}), "root").unwrap();
        assert_eq!(node.arrays["n"], NodeArray::scalar(ScalarType::Number));
    }

    #[test]
    fn test_samples_widen_and_fill_empty_arrays() {
        let samples = [
            json!({"count": 1, "tags": [], "when": "2024-01-01T00:00:00Z"}),
            json!({"count": "many", "tags": [1, 2], "when": "2024-02-01T08:30:00"}),
        ];
        let node = infer_samples(samples.iter(), "root").unwrap();
        assert_eq!(node.scalars["count"].scalar_type, ScalarType::Text);
        assert_eq!(node.scalars["when"].scalar_type, ScalarType::Datetime);
        assert_eq!(node.arrays["tags"], NodeArray::scalar(ScalarType::Integer));
    }

    #[test]
    fn test_null_sample_pins_text() {
        let samples = [json!({"n": null}), json!({"n": 5})];
        let node = infer_samples(samples.iter(), "root").unwrap();
        assert_eq!(node.scalars["n"].scalar_type, ScalarType::Text);
        assert!(node.scalars["n"].nullable);
    }

    #[test]
    fn test_non_object_root_is_rejected() {
        assert!(matches!(
            infer_schema(&json!([1, 2]), "root"),
            Err(SchemaError::InvalidRoot { .. })
        ));
        assert!(infer_samples(Vec::<&Value>::new(), "root").is_err());
    }

    #[test]
    fn test_sample_documents_of_page_payload() {
        let page = json!({"resultCount": 2, "results": [{"a": 1}, {"a": 2}]});
        assert_eq!(sample_documents(&page).len(), 2);
        let list = json!([{"a": 1}, 3]);
        assert_eq!(sample_documents(&list).len(), 1);
        let single = json!({"a": 1});
        assert_eq!(sample_documents(&single), vec![&single]);
    }

    #[test]
    fn test_infer_auto_detects_schema_documents() {
        let schema = json!({
            "type": "object",
            "required": ["id"],
            "properties": {"id": {"type": "integer"}, "name": {"type": "string"}}
        });
        let node = infer_auto(&schema, "root").unwrap();
        assert_eq!(node.scalars["id"], NodeScalar::new(ScalarType::Integer, false));
        assert_eq!(node.scalars["name"], NodeScalar::new(ScalarType::Text, true));

        let data = json!({"properties": "not a schema"});
        let node = infer_auto(&data, "root").unwrap();
        assert_eq!(node.scalars["properties"].scalar_type, ScalarType::Text);
    }
}
