use common::quote_identifier;

use crate::builder::{ColumnKind, RelationKind, SchemaSpec, TableSpec, IDENTITY_COLUMN};

/// `CREATE TABLE`/`CREATE INDEX` statements for every table, parents first.
/// All statements are idempotent (`IF NOT EXISTS`).
pub fn create_statements(spec: &SchemaSpec) -> Vec<String> {
    let mut statements = Vec::with_capacity(spec.len() * 2);
    for table in spec.tables() {
        statements.push(create_table(spec, table));
        if let Some(fk) = &table.parent_fk {
            let index = spec.namer().identifier(["ix", table.name.as_str(), fk.as_str()]);
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_identifier(&index),
                quote_identifier(&table.name),
                quote_identifier(fk)
            ));
        }
    }
    statements
}

/// The full DDL script, one statement per paragraph.
pub fn create_script(spec: &SchemaSpec) -> String {
    create_statements(spec)
        .into_iter()
        .map(|statement| format!("{statement};\n"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn create_table(spec: &SchemaSpec, table: &TableSpec) -> String {
    let mut definitions: Vec<String> = table
        .columns
        .iter()
        .map(|column| {
            let name = quote_identifier(&column.name);
            match column.kind {
                ColumnKind::Identity => format!("{name} INTEGER PRIMARY KEY"),
                ColumnKind::ParentKey(parent) => format!(
                    "{name} INTEGER NOT NULL REFERENCES {}({}) ON DELETE CASCADE",
                    quote_identifier(&spec.table(parent).name),
                    quote_identifier(IDENTITY_COLUMN)
                ),
                kind => {
                    let not_null = if column.nullable { "" } else { " NOT NULL" };
                    format!("{name} {}{not_null}", kind.sql_type())
                }
            }
        })
        .collect();

    if !table.unique_columns.is_empty() {
        let constraint = spec.namer().identifier(["uq", table.name.as_str()]);
        let columns: Vec<String> = table
            .unique_columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect();
        definitions.push(format!(
            "CONSTRAINT {} UNIQUE ({})",
            quote_identifier(&constraint),
            columns.join(", ")
        ));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        quote_identifier(&table.name),
        definitions.join(",\n    ")
    )
}

/// Mermaid `erDiagram` of every table and parent-child edge.
pub fn er_diagram(spec: &SchemaSpec) -> String {
    let mut lines = vec!["erDiagram".to_string()];
    for table in spec.tables() {
        lines.push(format!("    {} {{", table.name));
        for column in &table.columns {
            let marker = match column.kind {
                ColumnKind::Identity => " PK",
                ColumnKind::ParentKey(_) => " FK",
                _ if table.unique_columns.contains(&column.name) => " UK",
                _ => "",
            };
            lines.push(format!("        {} {}{}", column.kind.sql_type(), column.name, marker));
        }
        lines.push("    }".to_string());
    }
    for table in spec.tables() {
        for relation in &table.relations {
            let cardinality = match relation.kind {
                RelationKind::One => "||--o|",
                RelationKind::Many | RelationKind::ScalarArray => "||--o{",
            };
            lines.push(format!(
                "    {} {} {} : \"{}\"",
                table.name,
                cardinality,
                spec.table(relation.target).name,
                relation.name.replace('"', "'")
            ));
        }
    }
    lines.join("\n")
}
