use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::info;

use common::IdentifierNamer;
use registry_schema::{
    build_schema, build_schema_from_openapi, infer::is_schema_document, infer_auto,
    infer_samples, RootConfig, SchemaSpec,
};

use crate::feed::page_entries;

/// Reads a JSON, YAML (`.yaml`/`.yml`) or JSON Lines (`.jsonl`/`.ndjson`)
/// file. JSON Lines become an array of their documents.
pub fn load_document(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("[load_document] unable to read {}", path.display()))?;
    match extension(path).as_deref() {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&text)
            .with_context(|| format!("[load_document] invalid YAML in {}", path.display())),
        Some("jsonl") | Some("ndjson") => text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line).with_context(|| {
                    format!(
                        "[load_document] invalid JSON on line {} of {}",
                        index + 1,
                        path.display()
                    )
                })
            })
            .collect::<Result<Vec<Value>>>()
            .map(Value::Array),
        _ => serde_json::from_str(&text)
            .with_context(|| format!("[load_document] invalid JSON in {}", path.display())),
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Where the table layout comes from.
#[derive(Debug, Clone)]
pub enum SchemaSource {
    /// Example documents (or a JSON schema) inferred into a single root.
    /// Register pages contribute their entries with the page metadata merged
    /// in, matching what the feeds deliver.
    Samples {
        paths: Vec<PathBuf>,
        root_name: String,
        natural_keys: Vec<String>,
    },
    /// An OpenAPI document with one or more component-backed roots.
    OpenApi { path: PathBuf, roots: Vec<RootConfig> },
}

impl SchemaSource {
    pub fn build(&self, namer: IdentifierNamer) -> Result<SchemaSpec> {
        match self {
            SchemaSource::Samples {
                paths,
                root_name,
                natural_keys,
            } => {
                let documents = paths
                    .iter()
                    .map(|path| load_document(path))
                    .collect::<Result<Vec<Value>>>()?;
                let node = match documents.as_slice() {
                    [single] if is_schema_document(single) => infer_auto(single, root_name),
                    many => {
                        let samples: Vec<Value> = many
                            .iter()
                            .flat_map(|document| {
                                page_entries(document).unwrap_or_else(|| vec![document.clone()])
                            })
                            .collect();
                        infer_samples(&samples, root_name)
                    }
                }
                .with_context(|| {
                    format!("[SchemaSource::build] inferring '{}' from {:?}", root_name, paths)
                })?;
                let spec = build_schema(&node, natural_keys, namer)
                    .with_context(|| {
                        format!("[SchemaSource::build] building tables for '{}'", root_name)
                    })?;
                info!(
                    root = %root_name,
                    samples = paths.len(),
                    tables = spec.len(),
                    "schema inferred from samples"
                );
                Ok(spec)
            }
            SchemaSource::OpenApi { path, roots } => {
                let document = load_document(path)?;
                let spec = build_schema_from_openapi(&document, roots, namer)
                    .with_context(|| {
                        format!("[SchemaSource::build] OpenAPI roots from {}", path.display())
                    })?;
                info!(
                    openapi = %path.display(),
                    roots = roots.len(),
                    tables = spec.len(),
                    "schema built from OpenAPI"
                );
                Ok(spec)
            }
        }
    }
}
