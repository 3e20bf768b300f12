use std::path::Path;

use anyhow::{Context, Result};
use common::format::{render_table, TableStyle};
use registry_serde::{
    cmd::{AdminArgs, AdminCommands, SchemaSourceArgs},
    DbConn,
};
use tracing::{info, warn};

use crate::schema::build_spec;

#[derive(Debug, Default)]
pub struct Admin {}

impl Admin {
    pub fn execute(&self, args: &AdminArgs) -> Result<()> {
        match &args.command {
            AdminCommands::Init {
                state_db_fs_path,
                source,
                remove_existing_first,
            } => self.init(state_db_fs_path, source, *remove_existing_first),
            AdminCommands::Stats {
                state_db_fs_path,
                source,
                markdown,
            } => self.stats(state_db_fs_path, source, *markdown),
            AdminCommands::CliHelpMd => {
                clap_markdown::print_help_markdown::<crate::Cli>();
                Ok(())
            }
        }
    }

    fn init(
        &self,
        db_fs_path: &str,
        source: &SchemaSourceArgs,
        remove_existing_first: bool,
    ) -> Result<()> {
        if remove_existing_first {
            for suffix in ["", "-wal", "-shm"] {
                let path = format!("{db_fs_path}{suffix}");
                if Path::new(&path).exists() {
                    std::fs::remove_file(&path)
                        .with_context(|| format!("[Admin::init] unable to remove {}", path))?;
                    warn!(path = %path, "removed existing database file");
                }
            }
        }

        let spec = build_spec(source)?;
        let mut dbc = DbConn::new(db_fs_path)?;
        let statements = dbc.apply_schema(&spec)?;
        info!(db = %db_fs_path, tables = spec.len(), statements, "schema applied");
        println!("{} tables ready in {}", spec.len(), db_fs_path);
        Ok(())
    }

    fn stats(&self, db_fs_path: &str, source: &SchemaSourceArgs, markdown: bool) -> Result<()> {
        let spec = build_spec(source)?;
        let dbc = DbConn::new(db_fs_path)?;
        let rows: Vec<Vec<String>> = dbc
            .row_counts(&spec)?
            .into_iter()
            .map(|(table, count)| {
                let count = count.map_or_else(|| "-".to_string(), |c| c.to_string());
                vec![table, count]
            })
            .collect();
        let style = TableStyle::markdown_if(markdown);
        println!("{}", render_table(style, ["table", "rows"], rows, &[1]));
        Ok(())
    }
}
