//! Translates inferred shape trees into relational table definitions.
//!
//! Tables live in an arena owned by [`SchemaSpec`] and refer to each other by
//! [`TableId`]; the finished spec is read-only and shared by the DDL emitter
//! and the writer.

use std::{collections::HashMap, fmt::Display, str::FromStr};

use common::{IdentifierNamer, ScalarType};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    error::{SchemaError, SchemaResult},
    node::{NodeArray, NodeObject, StructuralPath},
    openapi::OpenApiDocument,
};

pub const IDENTITY_COLUMN: &str = "id";
pub const POSITION_COLUMN: &str = "position";
pub const SCALAR_ARRAY_VALUE: &str = "value";
const COLLISION_SUFFIX: &str = "value";
const MAX_NAME_ATTEMPTS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(usize);

impl TableId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// Nested object, at most one child row per parent.
    One,
    /// Array of objects, ordered by the child's position column.
    Many,
    /// Array of scalars stored as `(id, parent, position, value)` rows.
    ScalarArray,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::One => "one",
            RelationKind::Many => "many",
            RelationKind::ScalarArray => "scalar_array",
        }
    }
}

impl Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Identity,
    ParentKey(TableId),
    Position,
    Scalar(ScalarType),
}

impl ColumnKind {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnKind::Identity | ColumnKind::ParentKey(_) | ColumnKind::Position => "INTEGER",
            ColumnKind::Scalar(scalar_type) => scalar_type.sql_type(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
}

/// One JSON property stored in one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarField {
    pub name: String,
    pub column_name: String,
    pub scalar_type: ScalarType,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationSpec {
    /// JSON property holding the child payload.
    pub name: String,
    pub target: TableId,
    pub kind: RelationKind,
    pub ordered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub id: TableId,
    pub name: String,
    pub path: StructuralPath,
    pub columns: Vec<ColumnSpec>,
    pub scalars: Vec<ScalarField>,
    pub relations: Vec<RelationSpec>,
    pub parent: Option<TableId>,
    pub parent_fk: Option<String>,
    pub relation_to_parent: Option<RelationKind>,
    pub position_column: Option<String>,
    pub unique_columns: Vec<String>,
}

impl TableSpec {
    fn new(id: TableId, name: String, path: StructuralPath) -> Self {
        TableSpec {
            id,
            name,
            path,
            columns: vec![ColumnSpec {
                name: IDENTITY_COLUMN.to_string(),
                kind: ColumnKind::Identity,
                nullable: false,
            }],
            scalars: Vec::new(),
            relations: Vec::new(),
            parent: None,
            parent_fk: None,
            relation_to_parent: None,
            position_column: None,
            unique_columns: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn scalar(&self, property: &str) -> Option<&ScalarField> {
        self.scalars.iter().find(|s| s.name == property)
    }

    fn push_column(&mut self, name: String, kind: ColumnKind, nullable: bool) {
        self.columns.push(ColumnSpec {
            name,
            kind,
            nullable,
        });
    }
}

/// The complete table registry, keyed by id, name and structural path.
#[derive(Debug, Clone, Default)]
pub struct SchemaSpec {
    tables: Vec<TableSpec>,
    by_name: HashMap<String, TableId>,
    by_path: HashMap<StructuralPath, TableId>,
    roots: Vec<(String, TableId)>,
    namer: IdentifierNamer,
}

impl SchemaSpec {
    pub fn table(&self, id: TableId) -> &TableSpec {
        &self.tables[id.0]
    }

    /// Tables in creation order; parents always precede their children.
    pub fn tables(&self) -> impl Iterator<Item = &TableSpec> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table_named(&self, name: &str) -> Option<&TableSpec> {
        self.by_name.get(name).map(|id| self.table(*id))
    }

    pub fn table_at(&self, path: &[String]) -> Option<&TableSpec> {
        self.by_path.get(path).map(|id| self.table(*id))
    }

    pub fn root(&self, root_name: &str) -> Option<&TableSpec> {
        self.roots
            .iter()
            .find(|(name, _)| name == root_name)
            .map(|(_, id)| self.table(*id))
    }

    /// `(root name, root table)` pairs in declaration order.
    pub fn roots(&self) -> impl Iterator<Item = (&str, &TableSpec)> {
        self.roots
            .iter()
            .map(|(name, id)| (name.as_str(), self.table(*id)))
    }

    pub fn namer(&self) -> IdentifierNamer {
        self.namer
    }
}

/// Depth-first builder, memoized by structural path.
pub struct TableBuilder {
    spec: SchemaSpec,
}

impl TableBuilder {
    pub fn new(namer: IdentifierNamer) -> Self {
        TableBuilder {
            spec: SchemaSpec {
                namer,
                ..Default::default()
            },
        }
    }

    /// Builds the table tree under `node` and registers it as a root named
    /// after the node's path. `natural_keys` name root properties that form
    /// the upsert conflict target.
    pub fn add_root(
        &mut self,
        node: &NodeObject,
        natural_keys: &[String],
    ) -> SchemaResult<TableId> {
        let root_name = node.path.join(".");
        if node.path.is_empty() {
            return Err(SchemaError::InvalidRoot {
                root: root_name,
                reason: "empty structural path".to_string(),
            });
        }
        if self.spec.root(&root_name).is_some() || self.spec.by_path.contains_key(&node.path) {
            return Err(SchemaError::InvalidRoot {
                root: root_name,
                reason: "declared more than once".to_string(),
            });
        }

        let id = self.build_table(node, None)?;
        self.apply_natural_keys(id, natural_keys);
        self.spec.roots.push((root_name, id));
        Ok(id)
    }

    pub fn finish(self) -> SchemaSpec {
        debug!(tables = self.spec.len(), roots = self.spec.roots.len(), "schema built");
        self.spec
    }

    fn build_table(
        &mut self,
        node: &NodeObject,
        parent: Option<(TableId, RelationKind)>,
    ) -> SchemaResult<TableId> {
        if let Some(existing) = self.spec.by_path.get(&node.path) {
            return Ok(*existing);
        }

        let name = self.allocate_table_name(&node.path)?;
        let mut table = TableSpec::new(TableId(self.spec.tables.len()), name, node.path.clone());
        if let Some((parent_id, kind)) = parent {
            self.attach_parent(&mut table, parent_id, kind)?;
        }
        for (property, scalar) in &node.scalars {
            let column_name = self.free_column_name(&table, &[property.as_str()])?;
            table.push_column(
                column_name.clone(),
                ColumnKind::Scalar(scalar.scalar_type),
                scalar.nullable,
            );
            table.scalars.push(ScalarField {
                name: property.clone(),
                column_name,
                scalar_type: scalar.scalar_type,
                nullable: scalar.nullable,
            });
        }
        let id = self.register(table);

        for (property, object) in &node.objects {
            let child = self.build_table(object, Some((id, RelationKind::One)))?;
            self.relate(id, property, child, RelationKind::One);
        }
        for (property, array) in &node.arrays {
            match array {
                NodeArray::Object(object) => {
                    let child = self.build_table(object, Some((id, RelationKind::Many)))?;
                    self.ensure_position(child)?;
                    self.relate(id, property, child, RelationKind::Many);
                }
                NodeArray::Scalar { scalar_type, .. } => {
                    let child = self.scalar_array_table(id, property, *scalar_type)?;
                    self.relate(id, property, child, RelationKind::ScalarArray);
                }
            }
        }
        Ok(id)
    }

    fn scalar_array_table(
        &mut self,
        parent: TableId,
        property: &str,
        scalar_type: ScalarType,
    ) -> SchemaResult<TableId> {
        let mut path = self.spec.table(parent).path.clone();
        path.push(property.to_string());
        if let Some(existing) = self.spec.by_path.get(&path) {
            return Ok(*existing);
        }

        let name = self.allocate_table_name(&path)?;
        let mut table = TableSpec::new(TableId(self.spec.tables.len()), name, path);
        self.attach_parent(&mut table, parent, RelationKind::ScalarArray)?;
        let position = self.free_column_name(&table, &[POSITION_COLUMN])?;
        table.push_column(position.clone(), ColumnKind::Position, false);
        table.position_column = Some(position);
        let value = self.free_column_name(&table, &[SCALAR_ARRAY_VALUE])?;
        table.push_column(value.clone(), ColumnKind::Scalar(scalar_type), true);
        table.scalars.push(ScalarField {
            name: SCALAR_ARRAY_VALUE.to_string(),
            column_name: value,
            scalar_type,
            nullable: true,
        });
        Ok(self.register(table))
    }

    fn attach_parent(
        &self,
        table: &mut TableSpec,
        parent: TableId,
        kind: RelationKind,
    ) -> SchemaResult<()> {
        let parent_table = self.spec.table(parent);
        let segment = parent_table.path.last().unwrap_or(&parent_table.name);
        let fk = self.free_column_name(table, &[segment.as_str(), IDENTITY_COLUMN])?;
        table.push_column(fk.clone(), ColumnKind::ParentKey(parent), false);
        table.parent = Some(parent);
        table.parent_fk = Some(fk);
        table.relation_to_parent = Some(kind);
        Ok(())
    }

    fn ensure_position(&mut self, id: TableId) -> SchemaResult<()> {
        if self.spec.table(id).position_column.is_some() {
            return Ok(());
        }
        let position = self.free_column_name(self.spec.table(id), &[POSITION_COLUMN])?;
        let table = &mut self.spec.tables[id.0];
        table.push_column(position.clone(), ColumnKind::Position, false);
        table.position_column = Some(position);
        Ok(())
    }

    fn relate(&mut self, parent: TableId, property: &str, target: TableId, kind: RelationKind) {
        self.spec.tables[parent.0].relations.push(RelationSpec {
            name: property.to_string(),
            target,
            kind,
            ordered: kind != RelationKind::One,
        });
    }

    fn register(&mut self, table: TableSpec) -> TableId {
        let id = table.id;
        debug!(
            table = %table.name,
            path = ?table.path,
            columns = table.columns.len(),
            "allocated table"
        );
        self.spec.by_name.insert(table.name.clone(), id);
        self.spec.by_path.insert(table.path.clone(), id);
        self.spec.tables.push(table);
        id
    }

    /// Path-derived name; on collision retries with a numeric suffix appended
    /// to the path.
    fn allocate_table_name(&self, path: &[String]) -> SchemaResult<String> {
        let namer = self.spec.namer;
        let mut name = namer.identifier(path);
        for counter in 1..=MAX_NAME_ATTEMPTS {
            if !self.spec.by_name.contains_key(&name) {
                return Ok(name);
            }
            let counter = counter.to_string();
            name = namer.identifier(path.iter().map(String::as_str).chain([counter.as_str()]));
        }
        Err(SchemaError::IdentifierCollision {
            name,
            path: path.to_vec(),
        })
    }

    fn free_column_name(&self, table: &TableSpec, parts: &[&str]) -> SchemaResult<String> {
        let namer = self.spec.namer;
        let base = namer.identifier(parts);
        if table.column(&base).is_none() {
            return Ok(base);
        }
        let mut suffixed: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
        suffixed.push(COLLISION_SUFFIX.to_string());
        let candidate = namer.identifier(&suffixed);
        if table.column(&candidate).is_none() {
            return Ok(candidate);
        }
        for counter in 1..=MAX_NAME_ATTEMPTS {
            let counter = counter.to_string();
            let candidate =
                namer.identifier(suffixed.iter().map(String::as_str).chain([counter.as_str()]));
            if table.column(&candidate).is_none() {
                return Ok(candidate);
            }
        }
        Err(SchemaError::ColumnCollision {
            table: table.name.clone(),
            column: base,
        })
    }

    fn apply_natural_keys(&mut self, id: TableId, natural_keys: &[String]) {
        if natural_keys.is_empty() {
            return;
        }
        let table = &mut self.spec.tables[id.0];
        let missing: Vec<&str> = natural_keys
            .iter()
            .filter(|key| table.scalar(key).is_none())
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            warn!(
                table = %table.name,
                ?missing,
                "natural key properties not found on root, no unique constraint added"
            );
            return;
        }

        for key in natural_keys {
            let Some(field) = table.scalars.iter_mut().find(|s| &s.name == key) else {
                continue;
            };
            field.nullable = false;
            let column_name = field.column_name.clone();
            if let Some(column) = table.columns.iter_mut().find(|c| c.name == column_name) {
                column.nullable = false;
            }
            if !table.unique_columns.contains(&column_name) {
                table.unique_columns.push(column_name);
            }
        }
    }
}

/// Builds a single-root schema from an inferred tree.
pub fn build_schema(
    node: &NodeObject,
    natural_keys: &[String],
    namer: IdentifierNamer,
) -> SchemaResult<SchemaSpec> {
    let mut builder = TableBuilder::new(namer);
    builder.add_root(node, natural_keys)?;
    Ok(builder.finish())
}

/// A root table backed by `components/schemas/<schema_name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootConfig {
    pub name: String,
    pub schema_name: String,
    pub natural_keys: Vec<String>,
}

impl RootConfig {
    pub fn new(name: &str, schema_name: &str, natural_keys: &[&str]) -> Self {
        RootConfig {
            name: name.to_string(),
            schema_name: schema_name.to_string(),
            natural_keys: natural_keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// The register entry, register entry version and statistics roots.
    pub fn register_defaults() -> Vec<RootConfig> {
        vec![
            RootConfig::new("register_entries", "RegisterEntry", &["registerNumber"]),
            RootConfig::new(
                "register_entry_versions",
                "RegisterEntry",
                &["registerNumber", "version"],
            ),
            RootConfig::new(
                "statistics_register_entries",
                "RegisterEntryStatistics",
                &["sourceDate"],
            ),
        ]
    }
}

/// Parses `NAME=Schema` or `NAME=Schema:key1,key2`.
impl FromStr for RootConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, rest) = s
            .split_once('=')
            .ok_or_else(|| format!("expected NAME=Schema[:key,...], got '{s}'"))?;
        let (schema_name, keys) = rest.split_once(':').unwrap_or((rest, ""));
        let (name, schema_name) = (name.trim(), schema_name.trim());
        if name.is_empty() || schema_name.is_empty() {
            return Err(format!("root name and schema name are required in '{s}'"));
        }
        Ok(RootConfig {
            name: name.to_string(),
            schema_name: schema_name.to_string(),
            natural_keys: keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect(),
        })
    }
}

impl Display for RootConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.name, self.schema_name)?;
        if !self.natural_keys.is_empty() {
            write!(f, ":{}", self.natural_keys.join(","))?;
        }
        Ok(())
    }
}

/// Builds every configured root from an OpenAPI document into one registry.
pub fn build_schema_from_openapi(
    document: &Value,
    roots: &[RootConfig],
    namer: IdentifierNamer,
) -> SchemaResult<SchemaSpec> {
    let mut builder = TableBuilder::new(namer);
    for root in roots {
        let node = OpenApiDocument::new(document).infer_component(&root.schema_name, &root.name)?;
        builder.add_root(&node, &root.natural_keys)?;
    }
    Ok(builder.finish())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::infer::infer_schema;

    fn build(sample: Value, keys: &[&str]) -> SchemaSpec {
        let node = infer_schema(&sample, "register_entries").unwrap();
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        build_schema(&node, &keys, IdentifierNamer::default()).unwrap()
    }

    fn column_names(table: &TableSpec) -> Vec<&str> {
        table.columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_root_child_and_array_tables() {
        let spec = build(
            json!({
                "registerNumber": "R1",
                "address": {"city": "Bonn"},
                "donors": [{"name": "A"}],
                "tags": ["x"]
            }),
            &["registerNumber"],
        );

        let root = spec.root("register_entries").unwrap();
        assert_eq!(root.name, "register_entries");
        assert_eq!(column_names(root), vec!["id", "register_number"]);
        assert_eq!(root.unique_columns, vec!["register_number".to_string()]);
        assert!(!root.column("register_number").unwrap().nullable);

        let kinds: Vec<(&str, RelationKind, bool)> = root
            .relations
            .iter()
            .map(|r| (r.name.as_str(), r.kind, r.ordered))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("address", RelationKind::One, false),
                ("donors", RelationKind::Many, true),
                ("tags", RelationKind::ScalarArray, true),
            ]
        );

        let address = spec.table_named("register_entries_address").unwrap();
        assert_eq!(column_names(address), vec!["id", "register_entries_id", "city"]);
        assert_eq!(address.parent_fk.as_deref(), Some("register_entries_id"));
        assert!(address.position_column.is_none());

        let donors = spec.table_named("register_entries_donors").unwrap();
        assert_eq!(
            column_names(donors),
            vec!["id", "register_entries_id", "name", "position"]
        );
        assert_eq!(donors.position_column.as_deref(), Some("position"));

        let tags = spec.table_named("register_entries_tags").unwrap();
        assert_eq!(
            column_names(tags),
            vec!["id", "register_entries_id", "position", "value"]
        );
        assert_eq!(tags.relation_to_parent, Some(RelationKind::ScalarArray));
        assert_eq!(tags.scalars[0].scalar_type, ScalarType::Text);
    }

    #[test]
    fn test_parents_precede_children() {
        let spec = build(json!({"a": {"b": {"c": [{"d": 1}]}}}), &[]);
        for table in spec.tables() {
            if let Some(parent) = table.parent {
                assert!(parent < table.id);
            }
        }
        assert_eq!(spec.len(), 4);
    }

    #[test]
    fn test_column_collisions_are_suffixed() {
        let spec = build(
            json!({"donors": [{"register_entries_id": 7, "id": "x", "position": 2}]}),
            &[],
        );
        let donors = spec.table_named("register_entries_donors").unwrap();
        assert_eq!(
            column_names(donors),
            vec![
                "id",
                "register_entries_id",
                "id_value",
                "position",
                "register_entries_id_value",
                "position_value",
            ]
        );
        assert_eq!(donors.position_column.as_deref(), Some("position_value"));
        assert_eq!(
            donors.scalar("register_entries_id").unwrap().column_name,
            "register_entries_id_value"
        );
    }

    #[test]
    fn test_table_name_collisions_get_a_counter() {
        let spec = build(
            json!({
                "a": {"b": {"c": {"d": {"e": {"x": 1}}}}},
                "z": {"b": {"c": {"d": {"e": {"y": 1}}}}}
            }),
            &[],
        );
        let first = spec
            .table_at(&["register_entries", "a", "b", "c", "d", "e"].map(String::from))
            .unwrap();
        let second = spec
            .table_at(&["register_entries", "z", "b", "c", "d", "e"].map(String::from))
            .unwrap();
        assert_eq!(first.name, "b_c_d_e");
        assert_eq!(second.name, "c_d_e_1");
    }

    #[test]
    fn test_identifiers_are_unique_and_bounded() {
        let long = "averyveryverylongpropertynamethatkeepsgoing";
        let mut sample = json!({"leaf": 1});
        for i in 0..6 {
            let nested = sample.clone();
            sample = json!({ format!("{long}{i}"): nested, format!("{long}{i}List"): [sample] });
        }
        let spec = build(sample, &[]);
        let names: HashSet<&str> = spec.tables().map(|t| t.name.as_str()).collect();
        assert_eq!(names.len(), spec.len());
        for table in spec.tables() {
            assert!(table.name.len() <= 63, "{}", table.name);
            for column in &table.columns {
                assert!(column.name.len() <= 63, "{}", column.name);
            }
        }
    }

    #[test]
    fn test_missing_natural_key_adds_no_constraint() {
        let spec = build(json!({"registerNumber": "R1"}), &["registerNumber", "version"]);
        let root = spec.root("register_entries").unwrap();
        assert!(root.unique_columns.is_empty());
        assert!(root.column("register_number").unwrap().nullable);
    }

    #[test]
    fn test_duplicate_root_is_rejected() {
        let node = infer_schema(&json!({"a": 1}), "r").unwrap();
        let mut builder = TableBuilder::new(IdentifierNamer::default());
        builder.add_root(&node, &[]).unwrap();
        assert!(matches!(
            builder.add_root(&node, &[]),
            Err(SchemaError::InvalidRoot { .. })
        ));
    }

    #[test]
    fn test_root_config_parsing() {
        let root: RootConfig = "register_entry_versions=RegisterEntry:registerNumber, version"
            .parse()
            .unwrap();
        assert_eq!(
            root,
            RootConfig::new(
                "register_entry_versions",
                "RegisterEntry",
                &["registerNumber", "version"]
            )
        );
        assert_eq!(
            root.to_string(),
            "register_entry_versions=RegisterEntry:registerNumber,version"
        );

        let bare: RootConfig = "stats=Stats".parse().unwrap();
        assert!(bare.natural_keys.is_empty());
        assert!("no-equals".parse::<RootConfig>().is_err());
        assert!("=Schema".parse::<RootConfig>().is_err());
    }

    #[test]
    fn test_openapi_roots_share_one_registry() {
        let document = json!({"components": {"schemas": {
            "RegisterEntry": {
                "type": "object",
                "properties": {
                    "registerNumber": {"type": "string"},
                    "version": {"type": "integer"},
                    "lobbyists": {"type": "array", "items": {"type": "object", "properties": {"name": {"type": "string"}}}}
                }
            },
            "RegisterEntryStatistics": {
                "type": "object",
                "properties": {"sourceDate": {"type": "string", "format": "date-time"}, "count": {"type": "integer"}}
            }
        }}});
        let spec = build_schema_from_openapi(
            &document,
            &RootConfig::register_defaults(),
            IdentifierNamer::default(),
        )
        .unwrap();

        let roots: Vec<&str> = spec.roots().map(|(name, _)| name).collect();
        assert_eq!(
            roots,
            vec!["register_entries", "register_entry_versions", "statistics_register_entries"]
        );
        let versions = spec.root("register_entry_versions").unwrap();
        assert_eq!(
            versions.unique_columns,
            vec!["register_number".to_string(), "version".to_string()]
        );
        assert!(spec.table_named("register_entries_lobbyists").is_some());
        assert!(spec.table_named("register_entry_versions_lobbyists").is_some());
        let stats = spec.root("statistics_register_entries").unwrap();
        assert_eq!(
            stats.scalar("sourceDate").unwrap().scalar_type,
            ScalarType::Datetime
        );
    }
}
