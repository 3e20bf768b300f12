//! Recursive writer that upserts documents into the tables of a
//! [`SchemaSpec`] and keeps child collections in step with the payload.
//!
//! Every relation below a written row is replaced wholesale: existing child
//! rows are deleted by parent key, then the current payload's children are
//! inserted again in array order.

use std::sync::Arc;

use rusqlite::{params_from_iter, types::Value as SqlValue, Connection, ErrorCode};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::trace;

use common::quote_identifier;
use registry_schema::{
    builder::{IDENTITY_COLUMN, SCALAR_ARRAY_VALUE},
    ColumnKind, RelationKind, SchemaSpec, TableId, TableSpec,
};

const NATURAL_KEY_SEPARATOR: char = '\u{1f}';

#[derive(Error, Debug)]
pub enum SyncError {
    /// The surrounding transaction failed; nothing of the document persisted.
    #[error("transaction failed: {0}")]
    Transaction(#[from] rusqlite::Error),
    #[error("natural key column '{column}' of '{table}' has no value")]
    MissingNaturalKey { table: String, column: String },
    #[error("no root table named '{0}'")]
    UnknownRoot(String),
}

impl SyncError {
    /// Lock contention that a later attempt may not run into.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Transaction(rusqlite::Error::SqliteFailure(err, _)) => {
                matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    ParentKey,
    Position,
    /// Index into `TableSpec::scalars`.
    Scalar(usize),
}

#[derive(Debug, Clone)]
struct TableStatements {
    write_sql: String,
    slots: Vec<Slot>,
    /// `None` for root tables.
    clear_sql: Option<String>,
    /// Scalar indexes of the conflict-target columns.
    natural_key: Vec<usize>,
}

impl TableStatements {
    fn prepare(table: &TableSpec) -> TableStatements {
        let mut columns = Vec::new();
        let mut slots = Vec::new();
        for column in &table.columns {
            let slot = match column.kind {
                ColumnKind::Identity => continue,
                ColumnKind::ParentKey(_) => Slot::ParentKey,
                ColumnKind::Position => Slot::Position,
                ColumnKind::Scalar(_) => {
                    match table.scalars.iter().position(|s| s.column_name == column.name) {
                        Some(index) => Slot::Scalar(index),
                        None => continue,
                    }
                }
            };
            columns.push(quote_identifier(&column.name));
            slots.push(slot);
        }

        let table_name = quote_identifier(&table.name);
        let returning = format!("RETURNING {}", quote_identifier(IDENTITY_COLUMN));
        let write_sql = if columns.is_empty() {
            format!("INSERT INTO {table_name} DEFAULT VALUES {returning}")
        } else {
            let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
            let insert = format!(
                "INSERT INTO {table_name} ({}) VALUES ({})",
                columns.join(", "),
                placeholders.join(", ")
            );
            if table.unique_columns.is_empty() {
                format!("{insert} {returning}")
            } else {
                let conflict: Vec<String> = table
                    .unique_columns
                    .iter()
                    .map(|c| quote_identifier(c))
                    .collect();
                let mut updates: Vec<String> = columns
                    .iter()
                    .filter(|c| !conflict.contains(c))
                    .map(|c| format!("{c} = excluded.{c}"))
                    .collect();
                if updates.is_empty() {
                    updates = conflict.iter().map(|c| format!("{c} = excluded.{c}")).collect();
                }
                format!(
                    "{insert} ON CONFLICT ({}) DO UPDATE SET {} {returning}",
                    conflict.join(", "),
                    updates.join(", ")
                )
            }
        };

        let clear_sql = table
            .parent_fk
            .as_ref()
            .map(|fk| format!("DELETE FROM {table_name} WHERE {} = ?1", quote_identifier(fk)));

        let natural_key = table
            .unique_columns
            .iter()
            .filter_map(|column| table.scalars.iter().position(|s| &s.column_name == column))
            .collect();

        TableStatements {
            write_sql,
            slots,
            clear_sql,
            natural_key,
        }
    }
}

/// Write plans for every table of a schema, computed once and shared by all
/// syncs of a run.
#[derive(Debug, Clone)]
pub struct SyncContext {
    spec: Arc<SchemaSpec>,
    statements: Vec<TableStatements>,
}

impl SyncContext {
    pub fn new(spec: Arc<SchemaSpec>) -> Self {
        let statements = spec.tables().map(TableStatements::prepare).collect();
        SyncContext { spec, statements }
    }

    pub fn spec(&self) -> &SchemaSpec {
        &self.spec
    }

    /// Writes `payload` as one row of `table` and replaces all of its child
    /// rows. Returns the row id, or `None` without touching the database when
    /// the payload is not an object.
    pub fn sync_table(
        &self,
        conn: &Connection,
        table: TableId,
        payload: &Value,
        parent_id: Option<i64>,
        position: Option<i64>,
    ) -> Result<Option<i64>, SyncError> {
        let Some(object) = payload.as_object() else {
            return Ok(None);
        };
        let spec = self.spec.table(table);
        let plan = &self.statements[table.index()];

        let values: Vec<SqlValue> = plan
            .slots
            .iter()
            .map(|slot| match slot {
                Slot::ParentKey => parent_id.map_or(SqlValue::Null, SqlValue::Integer),
                Slot::Position => position.map_or(SqlValue::Null, SqlValue::Integer),
                Slot::Scalar(index) => {
                    let field = &spec.scalars[*index];
                    object
                        .get(&field.name)
                        .map_or(SqlValue::Null, |value| field.scalar_type.convert(value))
                }
            })
            .collect();
        for index in &plan.natural_key {
            let slot = plan.slots.iter().position(|s| *s == Slot::Scalar(*index));
            if slot.map_or(true, |slot| values[slot] == SqlValue::Null) {
                return Err(SyncError::MissingNaturalKey {
                    table: spec.name.clone(),
                    column: spec.scalars[*index].column_name.clone(),
                });
            }
        }

        let row_id: i64 = conn
            .prepare_cached(&plan.write_sql)?
            .query_row(params_from_iter(values.iter()), |row| row.get(0))?;
        trace!(table = %spec.name, row_id, "row written");

        for relation in &spec.relations {
            if let Some(clear_sql) = &self.statements[relation.target.index()].clear_sql {
                conn.prepare_cached(clear_sql)?.execute([row_id])?;
            }
            let child = object.get(&relation.name);
            match (relation.kind, child) {
                (RelationKind::One, Some(child)) => {
                    self.sync_table(conn, relation.target, child, Some(row_id), None)?;
                }
                (RelationKind::Many, Some(Value::Array(items))) => {
                    for (position, item) in items.iter().enumerate() {
                        self.sync_table(
                            conn,
                            relation.target,
                            item,
                            Some(row_id),
                            Some(position as i64),
                        )?;
                    }
                }
                // an object where other samples held a list is a list of one
                (RelationKind::Many, Some(item @ Value::Object(_))) => {
                    self.sync_table(conn, relation.target, item, Some(row_id), Some(0))?;
                }
                (RelationKind::ScalarArray, Some(Value::Array(items))) => {
                    for (position, item) in items.iter().enumerate() {
                        let mut wrapped = Map::new();
                        wrapped.insert(SCALAR_ARRAY_VALUE.to_string(), item.clone());
                        self.sync_table(
                            conn,
                            relation.target,
                            &Value::Object(wrapped),
                            Some(row_id),
                            Some(position as i64),
                        )?;
                    }
                }
                _ => {}
            }
        }
        Ok(Some(row_id))
    }

    /// Syncs a top-level document under `root` inside its own transaction.
    /// Any failure rolls back every write made for the document.
    pub fn sync_document(
        &self,
        conn: &mut Connection,
        root: &str,
        document: &Value,
    ) -> Result<Option<i64>, SyncError> {
        let table = self
            .spec
            .root(root)
            .ok_or_else(|| SyncError::UnknownRoot(root.to_string()))?
            .id;
        let tx = conn.transaction()?;
        let row_id = self.sync_table(&tx, table, document, None, None)?;
        tx.commit()?;
        Ok(row_id)
    }

    /// Natural key values of a root document joined into one string, used to
    /// drop repeats before they reach the writer. `None` when the root has no
    /// natural key or the document lacks one of its values.
    pub fn natural_key(&self, root: &str, document: &Value) -> Option<String> {
        let table = self.spec.root(root)?;
        let plan = &self.statements[table.id.index()];
        if plan.natural_key.is_empty() {
            return None;
        }
        let object = document.as_object()?;
        let mut parts = Vec::with_capacity(plan.natural_key.len());
        for index in &plan.natural_key {
            let value = object.get(&table.scalars[*index].name)?;
            match value {
                Value::Null => return None,
                Value::String(s) => parts.push(s.clone()),
                other => parts.push(other.to_string()),
            }
        }
        Some(parts.join(&NATURAL_KEY_SEPARATOR.to_string()))
    }
}
