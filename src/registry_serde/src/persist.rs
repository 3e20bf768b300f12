use std::time::Duration;

use anyhow::{Context, Result};
use registry_schema::{ddl, SchemaSpec};
use rusqlite::Connection;
use tracing::{debug, info};

use common::quote_identifier;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const STATEMENT_CACHE_CAPACITY: usize = 128;

common::execute_sql_batch!(enable_foreign_keys, "PRAGMA foreign_keys = ON;");

common::query_sql_single!(
    table_exists,
    "SELECT COUNT(*) AS table_count FROM sqlite_master WHERE type = 'table' AND name = ?1",
    table_name: &str;
    table_count: i64
);

common::query_sql_rows_no_args!(
    user_table_names,
    r"SELECT name
        FROM sqlite_master
       WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
    ORDER BY name";
    name: String
);

/// Handle to the state database. Owns the single connection the writer uses.
#[derive(Debug)]
pub struct DbConn {
    pub db_fs_path: String,
    pub conn: Connection,
}

impl DbConn {
    /// Opens (or creates) the database at `db_fs_path`, turns on foreign key
    /// enforcement and switches to WAL journaling.
    pub fn new(db_fs_path: &str) -> Result<DbConn> {
        let conn = Connection::open(db_fs_path)
            .with_context(|| format!("[DbConn::new] SQLite connection to {}", db_fs_path))?;
        let dbc = DbConn {
            db_fs_path: db_fs_path.to_string(),
            conn,
        };
        dbc.configure()?;
        let journal_mode: String = dbc
            .conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .with_context(|| format!("[DbConn::new] journal_mode=WAL in {}", db_fs_path))?;
        debug!(db = %db_fs_path, journal_mode = %journal_mode, "opened state database");
        Ok(dbc)
    }

    pub fn open_in_memory() -> Result<DbConn> {
        let conn = Connection::open_in_memory()
            .context("[DbConn::open_in_memory] SQLite connection")?;
        let dbc = DbConn {
            db_fs_path: ":memory:".to_string(),
            conn,
        };
        dbc.configure()?;
        Ok(dbc)
    }

    fn configure(&self) -> Result<()> {
        enable_foreign_keys(&self.conn)
            .with_context(|| {
                format!("[DbConn::configure] foreign_keys=ON in {}", self.db_fs_path)
            })?;
        self.conn
            .busy_timeout(BUSY_TIMEOUT)
            .with_context(|| format!("[DbConn::configure] busy_timeout in {}", self.db_fs_path))?;
        self.conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
        Ok(())
    }

    /// Creates every table and index of `spec` inside one transaction.
    /// Safe to repeat: all statements are `IF NOT EXISTS`.
    pub fn apply_schema(&mut self, spec: &SchemaSpec) -> Result<usize> {
        let statements = ddl::create_statements(spec);
        let tx = self
            .conn
            .transaction()
            .with_context(|| {
                format!("[DbConn::apply_schema] SQLite transaction in {}", self.db_fs_path)
            })?;
        for sql in &statements {
            tx.execute_batch(sql)
                .with_context(|| format!("[DbConn::apply_schema] {} in {}", sql, self.db_fs_path))?;
        }
        tx.commit()
            .with_context(|| format!("[DbConn::apply_schema] commit in {}", self.db_fs_path))?;
        info!(
            db = %self.db_fs_path,
            tables = spec.len(),
            statements = statements.len(),
            "schema applied"
        );
        Ok(statements.len())
    }

    /// True when every root table of `spec` is present.
    pub fn schema_exists(&self, spec: &SchemaSpec) -> Result<bool> {
        for (_, root) in spec.roots() {
            let count = table_exists(&self.conn, &root.name)
                .with_context(|| {
                    format!("[DbConn::schema_exists] {} in {}", root.name, self.db_fs_path)
                })?;
            if count == 0 {
                return Ok(false);
            }
        }
        Ok(!spec.is_empty())
    }

    pub fn user_tables(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        user_table_names(&self.conn, |_, name| {
            names.push(name);
            Ok(())
        })
        .with_context(|| format!("[DbConn::user_tables] in {}", self.db_fs_path))?;
        Ok(names)
    }

    /// Row count of every table in `spec`; `None` for tables not created yet.
    pub fn row_counts(&self, spec: &SchemaSpec) -> Result<Vec<(String, Option<i64>)>> {
        let existing = self.user_tables()?;
        spec.tables()
            .map(|table| {
                if !existing.contains(&table.name) {
                    return Ok((table.name.clone(), None));
                }
                let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(&table.name));
                let count: i64 = self
                    .conn
                    .query_row(&sql, [], |row| row.get(0))
                    .with_context(|| {
                        format!("[DbConn::row_counts] {} in {}", sql, self.db_fs_path)
                    })?;
                Ok((table.name.clone(), Some(count)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use common::IdentifierNamer;
    use registry_schema::{build_schema, infer_schema};
    use serde_json::json;

    use super::*;

    fn spec() -> SchemaSpec {
        let node = infer_schema(
            &json!({"registerNumber": "R1", "keywords": ["a"], "address": {"city": "Bonn"}}),
            "register_entries",
        )
        .unwrap();
        build_schema(&node, &["registerNumber".to_string()], IdentifierNamer::default()).unwrap()
    }

    #[test]
    fn test_apply_schema_is_idempotent() -> Result<()> {
        let spec = spec();
        let mut dbc = DbConn::open_in_memory()?;
        assert!(!dbc.schema_exists(&spec)?);

        dbc.apply_schema(&spec)?;
        dbc.apply_schema(&spec)?;
        assert!(dbc.schema_exists(&spec)?);
        assert_eq!(
            dbc.user_tables()?,
            vec!["register_entries", "register_entries_address", "register_entries_keywords"]
        );
        Ok(())
    }

    #[test]
    fn test_row_counts_report_missing_tables() -> Result<()> {
        let spec = spec();
        let dbc = DbConn::open_in_memory()?;
        let counts = dbc.row_counts(&spec)?;
        assert_eq!(counts.len(), 3);
        assert!(counts.iter().all(|(_, count)| count.is_none()));
        Ok(())
    }

    #[test]
    fn test_foreign_keys_enabled() -> Result<()> {
        let dbc = DbConn::open_in_memory()?;
        let enabled: i64 = dbc.conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        assert_eq!(enabled, 1);
        Ok(())
    }
}
