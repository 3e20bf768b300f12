/*
 * Helper macros that generate type-safe functions around SQLite statements.
 * They resolve rusqlite through this crate so callers need no extra imports.
 * Hot paths (like the per-row upserts of a sync) prepare their own statements.
 */

#[doc(hidden)]
pub use rusqlite;

/// Defines `fn $func_name(conn) -> rusqlite::Result<()>` that runs a batch of
/// statements without bind parameters.
#[macro_export]
macro_rules! execute_sql_batch {
    ($func_name:ident, $sql:expr) => {
        pub fn $func_name(conn: &$crate::sqlite_helpers::rusqlite::Connection) -> $crate::sqlite_helpers::rusqlite::Result<()> {
            conn.execute_batch($sql)?;
            Ok(())
        }
    };
}

/// Defines a function returning the first row of a parameterized query.
#[macro_export]
macro_rules! query_sql_single {
    ($func_name:ident, $sql:expr, $($param_name:ident : $param_type:ty),*; $out_name:ident : $out_type:ty) => {
        pub fn $func_name(conn: &$crate::sqlite_helpers::rusqlite::Connection $(, $param_name: $param_type)*) -> $crate::sqlite_helpers::rusqlite::Result<$out_type> {
            let mut stmt = conn.prepare_cached($sql)?;
            let params = [$(&$param_name as &dyn $crate::sqlite_helpers::rusqlite::ToSql),*];
            let mut rows = stmt.query(params.as_slice())?;

            if let Some(row) = rows.next()? {
                Ok(row.get::<_, $out_type>(0)?)
            } else {
                Err($crate::sqlite_helpers::rusqlite::Error::QueryReturnedNoRows)
            }
        }
    };
}

/// Defines a function that calls `callback(row_index, value)` for each
/// row of a query without bind parameters.
#[macro_export]
macro_rules! query_sql_rows_no_args {
    ($func_name:ident, $sql:expr; $out_name:ident : $out_type:ty) => {
        pub fn $func_name<F>(conn: &$crate::sqlite_helpers::rusqlite::Connection, mut callback: F) -> $crate::sqlite_helpers::rusqlite::Result<()>
        where
            F: FnMut(usize, $out_type) -> $crate::sqlite_helpers::rusqlite::Result<()>,
        {
            let mut stmt = conn.prepare_cached($sql)?;
            let mut rows = stmt.query([])?;
            let mut row_index = 0;
            while let Some(row) = rows.next()? {
                let value = row.get::<_, $out_type>(0)?;
                callback(row_index, value)?;
                row_index += 1;
            }
            Ok(())
        }
    };
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    execute_sql_batch!(
        create_fixture,
        "CREATE TABLE t (name TEXT NOT NULL, size INTEGER NOT NULL);
         INSERT INTO t VALUES ('a', 1), ('b', 2);"
    );
    query_sql_single!(size_named, "SELECT size FROM t WHERE name = ?", name: &str; size: i64);
    query_sql_rows_no_args!(all_names, "SELECT name FROM t ORDER BY name"; name: String);

    #[test]
    fn test_generated_helpers() -> rusqlite::Result<()> {
        let conn = Connection::open_in_memory()?;
        create_fixture(&conn)?;
        assert_eq!(size_named(&conn, "b")?, 2);
        assert!(matches!(
            size_named(&conn, "zzz"),
            Err(rusqlite::Error::QueryReturnedNoRows)
        ));

        let mut names = Vec::new();
        all_names(&conn, |_, name| {
            names.push(name);
            Ok(())
        })?;
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
        Ok(())
    }
}
