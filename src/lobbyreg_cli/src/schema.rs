use anyhow::Result;
use common::format::{render_table, TableStyle};
use registry_schema::{ddl, SchemaSpec};
use registry_serde::cmd::{SchemaArgs, SchemaCommands, SchemaSourceArgs};

/// Builds the table layout described by the `--sample`/`--openapi` flags.
pub fn build_spec(source: &SchemaSourceArgs) -> Result<SchemaSpec> {
    source.source().build(source.namer())
}

#[derive(Debug, Default)]
pub struct Schema {}

impl Schema {
    pub fn execute(&self, args: &SchemaArgs) -> Result<()> {
        match &args.command {
            SchemaCommands::Tables { source, markdown } => self.tables(source, *markdown),
            SchemaCommands::Ddl { source } => {
                print!("{}", ddl::create_script(&build_spec(source)?));
                Ok(())
            }
            SchemaCommands::Diagram { source } => {
                println!("{}", ddl::er_diagram(&build_spec(source)?));
                Ok(())
            }
        }
    }

    fn tables(&self, source: &SchemaSourceArgs, markdown: bool) -> Result<()> {
        let spec = build_spec(source)?;
        let headers = ["table", "path", "relation", "columns", "natural key"];
        let style = TableStyle::markdown_if(markdown);
        println!("{}", render_table(style, headers, table_rows(&spec), &[3]));
        Ok(())
    }
}

fn table_rows(spec: &SchemaSpec) -> Vec<Vec<String>> {
    spec.tables()
        .map(|table| {
            vec![
                table.name.clone(),
                table.path.join("."),
                table
                    .relation_to_parent
                    .as_ref()
                    .map(|kind| kind.to_string())
                    .unwrap_or_else(|| "root".to_string()),
                table.columns.len().to_string(),
                table.unique_columns.join(", "),
            ]
        })
        .collect()
}
