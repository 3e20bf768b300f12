//! Schema inference from OpenAPI / JSON Schema declarations.
//!
//! `$ref` pointers are resolved against the owning document, `allOf`, `anyOf`
//! and `oneOf` branches contribute properties, and required/nullable flags come
//! from the declaration rather than from observed data.

use std::collections::{BTreeMap, BTreeSet};

use common::ScalarType;
use serde_json::Value;
use tracing::{debug, trace};

use crate::{
    error::{SchemaError, SchemaResult},
    node::{NodeArray, NodeObject, NodeScalar, StructuralPath},
};

const COMPOSITION_KEYS: [&str; 3] = ["allOf", "anyOf", "oneOf"];

/// Declared shape of one schema, after `$ref` resolution.
enum Shape {
    Scalar(NodeScalar),
    Object(NodeObject),
    Array(NodeArray),
}

pub struct OpenApiDocument<'a> {
    root: &'a Value,
    // $refs currently being expanded; re-entering one is a cycle
    active: Vec<String>,
}

impl<'a> OpenApiDocument<'a> {
    pub fn new(root: &'a Value) -> Self {
        OpenApiDocument {
            root,
            active: Vec::new(),
        }
    }

    /// Follows a document-local JSON pointer such as `#/components/schemas/X`.
    pub fn lookup(&self, reference: &str) -> SchemaResult<&'a Value> {
        let Some(pointer) = reference.strip_prefix('#') else {
            return Err(SchemaError::UnsupportedRef(reference.to_string()));
        };
        if !pointer.starts_with('/') {
            return Err(SchemaError::UnsupportedRef(reference.to_string()));
        }
        self.root
            .pointer(pointer)
            .ok_or_else(|| SchemaError::UnresolvedRef(reference.to_string()))
    }

    /// Infers the tree for `components/schemas/<schema_name>`.
    pub fn infer_component(
        &mut self,
        schema_name: &str,
        root_name: &str,
    ) -> SchemaResult<NodeObject> {
        let reference = format!("#/components/schemas/{}", escape_pointer(schema_name));
        let schema = self.lookup(&reference)?;
        self.active.push(reference);
        let result = self.infer_root(schema, root_name);
        self.active.pop();
        result
    }

    /// Infers the tree for an object schema that becomes the root table.
    pub fn infer_root(&mut self, schema: &'a Value, root_name: &str) -> SchemaResult<NodeObject> {
        match self.shape(schema, vec![root_name.to_string()])? {
            Shape::Object(node) => {
                debug!(
                    root = root_name,
                    scalars = node.scalars.len(),
                    objects = node.objects.len(),
                    arrays = node.arrays.len(),
                    "inferred schema from declaration"
                );
                Ok(node)
            }
            _ => Err(SchemaError::InvalidRoot {
                root: root_name.to_string(),
                reason: "schema does not declare an object".to_string(),
            }),
        }
    }

    /// Runs `f` on the schema behind any chain of `$ref`s. Returns `None` when
    /// the chain re-enters a reference that is already being expanded.
    fn with_resolved<T>(
        &mut self,
        schema: &'a Value,
        f: impl FnOnce(&mut Self, &'a Value) -> SchemaResult<T>,
    ) -> SchemaResult<Option<T>> {
        let mut current = schema;
        let mut pushed = 0;
        let result = loop {
            match current.get("$ref").and_then(Value::as_str) {
                Some(reference) if self.active.iter().any(|r| r == reference) => {
                    trace!(reference, "cutting recursive $ref");
                    break Ok(None);
                }
                Some(reference) => match self.lookup(reference) {
                    Ok(target) => {
                        self.active.push(reference.to_string());
                        pushed += 1;
                        current = target;
                    }
                    Err(err) => break Err(err),
                },
                None => break f(self, current).map(Some),
            }
        };
        self.active.truncate(self.active.len() - pushed);
        result
    }

    fn shape(&mut self, schema: &'a Value, path: StructuralPath) -> SchemaResult<Shape> {
        let shape = self.with_resolved(schema, |doc, resolved| {
            let declared = doc.declared_type(resolved)?;
            match declared.kind.as_deref() {
                Some("object") => Ok(Shape::Object(doc.object(resolved, path)?)),
                Some("array") => Ok(Shape::Array(doc.array(resolved, path)?)),
                _ => Ok(Shape::Scalar(NodeScalar::new(
                    scalar_type(declared.kind.as_deref(), resolved),
                    declared.nullable,
                ))),
            }
        })?;
        Ok(shape.unwrap_or(Shape::Scalar(NodeScalar::new(ScalarType::Text, true))))
    }

    fn object(&mut self, schema: &'a Value, path: StructuralPath) -> SchemaResult<NodeObject> {
        let mut properties = BTreeMap::new();
        let mut required = BTreeSet::new();
        self.collect(schema, &mut properties, &mut required, true)?;

        let mut node = NodeObject::new(path);
        for (name, prop_schema) in properties {
            let is_required = required.contains(&name);
            match self.shape(prop_schema, node.child_path(&name))? {
                Shape::Scalar(scalar) => {
                    node.scalars.insert(
                        name,
                        NodeScalar::new(scalar.scalar_type, scalar.nullable || !is_required),
                    );
                }
                Shape::Object(child) => {
                    node.objects.insert(name, child);
                }
                Shape::Array(array) => {
                    node.arrays.insert(name, array);
                }
            }
        }
        Ok(node)
    }

    fn array(&mut self, schema: &'a Value, path: StructuralPath) -> SchemaResult<NodeArray> {
        let Some(items) = schema.get("items").filter(|items| items.is_object()) else {
            return Ok(NodeArray::scalar(ScalarType::Text));
        };
        Ok(match self.shape(items, path)? {
            Shape::Object(node) => NodeArray::Object(node),
            // nested lists flatten into the outer one
            Shape::Array(inner) => inner,
            Shape::Scalar(scalar) => NodeArray::scalar(scalar.scalar_type),
        })
    }

    /// Gathers properties of the schema and all of its composition branches.
    /// Requirements propagate through `allOf` only.
    fn collect(
        &mut self,
        schema: &'a Value,
        properties: &mut BTreeMap<String, &'a Value>,
        required: &mut BTreeSet<String>,
        with_required: bool,
    ) -> SchemaResult<()> {
        if let Some(props) = schema.get("properties").and_then(Value::as_object) {
            for (name, prop_schema) in props {
                if prop_schema.is_object() {
                    properties.insert(name.clone(), prop_schema);
                }
            }
        }
        if with_required {
            if let Some(names) = schema.get("required").and_then(Value::as_array) {
                required.extend(names.iter().filter_map(Value::as_str).map(String::from));
            }
        }
        for key in COMPOSITION_KEYS {
            let Some(branches) = schema.get(key).and_then(Value::as_array) else {
                continue;
            };
            // only allOf branches always apply, so only they add requirements
            let branch_required = with_required && key == "allOf";
            for branch in branches.iter().filter(|b| b.is_object()) {
                self.with_resolved(branch, |doc, resolved| {
                    doc.collect(resolved, properties, required, branch_required)
                })?;
            }
        }
        Ok(())
    }

    fn declared_type(&mut self, schema: &'a Value) -> SchemaResult<DeclaredType> {
        let mut declared = DeclaredType {
            kind: None,
            nullable: schema.get("nullable").and_then(Value::as_bool).unwrap_or(false),
        };
        match schema.get("type") {
            Some(Value::String(kind)) => declared.kind = Some(kind.clone()),
            Some(Value::Array(kinds)) => {
                declared.nullable |= kinds.iter().any(|k| k == "null");
                declared.kind = kinds
                    .iter()
                    .filter_map(Value::as_str)
                    .find(|k| *k != "null")
                    .map(String::from);
            }
            _ => {}
        }
        if declared.kind.is_some() {
            return Ok(declared);
        }

        declared.kind = if schema.get("enum").is_some() {
            Some("string".to_string())
        } else if schema.get("properties").is_some()
            || schema.get("additionalProperties").is_some()
        {
            Some("object".to_string())
        } else if schema.get("items").is_some() {
            Some("array".to_string())
        } else {
            self.composed_type(schema)?
        };
        Ok(declared)
    }

    /// Type of an untyped composition such as `allOf: [{$ref: ...}]`: object if
    /// any branch is an object, else the first declared branch type.
    fn composed_type(&mut self, schema: &'a Value) -> SchemaResult<Option<String>> {
        let mut first = None;
        for key in COMPOSITION_KEYS {
            let Some(branches) = schema.get(key).and_then(Value::as_array) else {
                continue;
            };
            for branch in branches {
                let kind = self
                    .with_resolved(branch, |doc, resolved| Ok(doc.declared_type(resolved)?.kind))?
                    .flatten();
                if kind.as_deref() == Some("object") {
                    return Ok(kind);
                }
                if first.is_none() {
                    first = kind;
                }
            }
        }
        Ok(first)
    }
}

struct DeclaredType {
    kind: Option<String>,
    nullable: bool,
}

fn scalar_type(kind: Option<&str>, schema: &Value) -> ScalarType {
    match kind {
        Some("integer") => ScalarType::Integer,
        Some("number") => ScalarType::Number,
        Some("boolean") => ScalarType::Boolean,
        Some("string") if schema.get("format").and_then(Value::as_str) == Some("date-time") => {
            ScalarType::Datetime
        }
        _ => ScalarType::Text,
    }
}

fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn spec() -> Value {
        json!({
            "openapi": "3.0.1",
            "components": {"schemas": {
                "RegisterEntry": {
                    "type": "object",
                    "required": ["registerNumber"],
                    "properties": {
                        "registerNumber": {"type": "string"},
                        "version": {"type": "integer"},
                        "lastUpdate": {"type": "string", "format": "date-time"},
                        "account": {"$ref": "#/components/schemas/Account"},
                        "codes": {"type": "array", "items": {"enum": ["A", "B"]}},
                        "matrix": {"type": "array", "items": {"type": "array", "items": {"type": "number"}}},
                        "donors": {"type": "array", "items": {"$ref": "#/components/schemas/Donor"}},
                        "extra": {"allOf": [{"$ref": "#/components/schemas/Base"}], "description": "wrapped"}
                    }
                },
                "Account": {
                    "allOf": [
                        {"$ref": "#/components/schemas/Base"},
                        {"type": "object", "required": ["active"], "properties": {"active": {"type": "boolean"}}}
                    ],
                    "anyOf": [{"required": ["note"], "properties": {"note": {"type": ["string", "null"]}}}]
                },
                "Base": {
                    "type": "object",
                    "required": ["createdAt"],
                    "properties": {"createdAt": {"type": "string", "format": "date-time"}}
                },
                "Donor": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string", "nullable": true},
                        "parent": {"$ref": "#/components/schemas/Donor"}
                    }
                },
                "a/b": {"type": "object", "properties": {"x": {"type": "integer"}}}
            }}
        })
    }

    #[test]
    fn test_component_with_refs_and_compositions() {
        let doc = spec();
        let node = OpenApiDocument::new(&doc)
            .infer_component("RegisterEntry", "register_entries")
            .unwrap();

        assert_eq!(
            node.scalars["registerNumber"],
            NodeScalar::new(ScalarType::Text, false)
        );
        assert_eq!(node.scalars["version"], NodeScalar::new(ScalarType::Integer, true));
        assert_eq!(node.scalars["lastUpdate"].scalar_type, ScalarType::Datetime);

        let account = &node.objects["account"];
        assert_eq!(
            account.scalars["createdAt"],
            NodeScalar::new(ScalarType::Datetime, false)
        );
        assert_eq!(account.scalars["active"], NodeScalar::new(ScalarType::Boolean, false));
        // anyOf contributes the property but not the requirement
        assert_eq!(account.scalars["note"], NodeScalar::new(ScalarType::Text, true));

        assert_eq!(node.arrays["codes"], NodeArray::scalar(ScalarType::Text));
        assert_eq!(node.arrays["matrix"], NodeArray::scalar(ScalarType::Number));
        assert!(node.objects.contains_key("extra"));
    }

    #[test]
    fn test_recursive_ref_degrades_to_text() {
        let doc = spec();
        let node = OpenApiDocument::new(&doc)
            .infer_component("RegisterEntry", "register_entries")
            .unwrap();
        let NodeArray::Object(donor) = &node.arrays["donors"] else {
            panic!("donors should be an object array");
        };
        assert_eq!(donor.scalars["name"], NodeScalar::new(ScalarType::Text, true));
        assert_eq!(donor.scalars["parent"], NodeScalar::new(ScalarType::Text, true));
        assert!(donor.objects.is_empty());
    }

    #[test]
    fn test_pointer_escapes() {
        let doc = spec();
        let node = OpenApiDocument::new(&doc).infer_component("a/b", "ab").unwrap();
        assert_eq!(node.scalars["x"].scalar_type, ScalarType::Integer);
    }

    #[test]
    fn test_unresolved_and_unsupported_refs() {
        let doc = json!({
            "components": {"schemas": {
                "Broken": {"type": "object", "properties": {"x": {"$ref": "#/components/schemas/Missing"}}},
                "Remote": {"type": "object", "properties": {"x": {"$ref": "other.yaml#/X"}}}
            }}
        });
        assert_eq!(
            OpenApiDocument::new(&doc).infer_component("Broken", "b").unwrap_err(),
            SchemaError::UnresolvedRef("#/components/schemas/Missing".to_string())
        );
        assert_eq!(
            OpenApiDocument::new(&doc).infer_component("Remote", "r").unwrap_err(),
            SchemaError::UnsupportedRef("other.yaml#/X".to_string())
        );
        assert!(matches!(
            OpenApiDocument::new(&doc).infer_component("Nope", "n"),
            Err(SchemaError::UnresolvedRef(_))
        ));
    }

    #[test]
    fn test_non_object_root_is_rejected() {
        let doc = json!({"components": {"schemas": {"S": {"type": "string"}}}});
        assert!(matches!(
            OpenApiDocument::new(&doc).infer_component("S", "s"),
            Err(SchemaError::InvalidRoot { .. })
        ));
    }

    #[test]
    fn test_array_without_items_is_text() {
        let doc = json!({"type": "object", "properties": {"list": {"type": "array"}}});
        let node = OpenApiDocument::new(&doc).infer_root(&doc, "r").unwrap();
        assert_eq!(node.arrays["list"], NodeArray::scalar(ScalarType::Text));
    }
}
