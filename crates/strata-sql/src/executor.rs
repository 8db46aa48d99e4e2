use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, warn};

use strata_core::error::{Result, StrataError};
use strata_core::traits::QueryExecutor;
use strata_core::types::{QueryError, QueryErrorKind, QueryRows, Row};

/// Lowercase aliases for the Northwind tables, as `(view, source table)`.
const COMPAT_VIEWS: &[(&str, &str)] = &[
    ("orders", "Orders"),
    ("order_items", "Order Details"),
    ("products", "Products"),
    ("customers", "Customers"),
];

const DEFAULT_MAX_ROWS: usize = 500;

/// Read-only SQLite executor.
///
/// The dataset is opened read-only, so generated statements cannot modify
/// it. Compatibility views live in the connection's temp schema.
pub struct SqliteExecutor {
    conn: Arc<Mutex<Connection>>,
    max_rows: usize,
}

impl SqliteExecutor {
    /// Open an existing database file read-only.
    pub fn open(path: &Path, compat_views: bool) -> Result<Self> {
        if !path.is_file() {
            return Err(StrataError::Database(format!(
                "Database file not found at {}",
                path.display()
            )));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StrataError::Database(e.to_string()))?;

        debug!(path = %path.display(), "SQLite dataset opened");
        Self::from_connection(conn, compat_views)
    }

    /// Wrap an already-open connection (used for in-memory fixtures).
    pub fn from_connection(conn: Connection, compat_views: bool) -> Result<Self> {
        if compat_views {
            create_compat_views(&conn)?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            max_rows: DEFAULT_MAX_ROWS,
        })
    }

    /// Cap the number of rows returned per query.
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows.max(1);
        self
    }

    /// CREATE statements for every user table, brackets stripped, followed
    /// by the compatibility views. Fed to the query generator.
    pub fn schema(&self) -> Result<String> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StrataError::Database(e.to_string()))?;

        let mut stmt = conn
            .prepare(
                "SELECT sql FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND sql IS NOT NULL
                 ORDER BY name",
            )
            .map_err(|e| StrataError::Database(e.to_string()))?;

        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| StrataError::Database(e.to_string()))?;

        let mut parts = Vec::new();
        for sql in tables {
            let sql = sql.map_err(|e| StrataError::Database(e.to_string()))?;
            parts.push(sql.replace(['[', ']'], ""));
        }

        let mut views = conn
            .prepare("SELECT name FROM sqlite_temp_master WHERE type = 'view' ORDER BY name")
            .map_err(|e| StrataError::Database(e.to_string()))?;
        let names = views
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| StrataError::Database(e.to_string()))?;
        for name in names {
            let name = name.map_err(|e| StrataError::Database(e.to_string()))?;
            if let Some((_, source)) = COMPAT_VIEWS.iter().find(|(v, _)| *v == name) {
                parts.push(format!("-- view {} is an alias of \"{}\"", name, source));
            }
        }

        Ok(parts.join("\n\n"))
    }
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1 COLLATE NOCASE",
        [name],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n > 0)
    .map_err(|e| StrataError::Database(e.to_string()))
}

fn create_compat_views(conn: &Connection) -> Result<()> {
    for (view, source) in COMPAT_VIEWS {
        // Identifiers are case-insensitive: `orders` already resolves to `Orders`.
        if view.eq_ignore_ascii_case(source) || table_exists(conn, view)? {
            continue;
        }
        if !table_exists(conn, source)? {
            continue;
        }
        conn.execute_batch(&format!(
            "CREATE TEMP VIEW IF NOT EXISTS {} AS SELECT * FROM main.\"{}\";",
            view, source
        ))
        .map_err(|e| StrataError::Database(e.to_string()))?;
        debug!(view, source, "Compatibility view created");
    }
    Ok(())
}

/// Map a SQLite error message onto the repair-relevant categories.
pub fn classify_error(message: &str) -> QueryErrorKind {
    let lower = message.to_lowercase();
    if lower.contains("syntax error") || lower.contains("incomplete input") || lower.contains("unrecognized token") {
        QueryErrorKind::Syntax
    } else if lower.contains("no such column")
        || lower.contains("no such table")
        || lower.contains("no such function")
        || lower.contains("ambiguous column")
    {
        QueryErrorKind::UnknownIdentifier
    } else {
        QueryErrorKind::Other
    }
}

fn to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::String(format!("<blob {} bytes>", b.len())),
    }
}

/// Suffix repeated column names (`x`, `x_2`, ...) so every value keeps a key.
fn unique_columns(names: Vec<&str>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let mut candidate = name.to_string();
        let mut n = 2;
        while seen.contains(&candidate) {
            candidate = format!("{}_{}", name, n);
            n += 1;
        }
        seen.insert(candidate.clone());
        out.push(candidate);
    }
    out
}

fn run_query(
    conn: &Connection,
    sql: &str,
    max_rows: usize,
) -> std::result::Result<QueryRows, QueryError> {
    let fail = |e: rusqlite::Error| {
        let message = format!("SQL Error: {}. Query: '{}'", e, sql);
        QueryError::new(classify_error(&e.to_string()), message)
    };

    let mut stmt = conn.prepare(sql).map_err(fail)?;
    let columns = unique_columns(stmt.column_names());

    let mut rows = stmt.query([]).map_err(fail)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(fail)? {
        if out.len() >= max_rows {
            warn!(max_rows, "Query result truncated");
            break;
        }
        let mut record = Row::new();
        for (i, name) in columns.iter().enumerate() {
            let value = row.get_ref(i).map_err(fail)?;
            record.insert(name.clone(), to_json(value));
        }
        out.push(record);
    }

    Ok(QueryRows::new(columns, out))
}

impl QueryExecutor for SqliteExecutor {
    fn execute(&self, sql: &str) -> BoxFuture<'_, std::result::Result<QueryRows, QueryError>> {
        let sql = sql.to_string();
        let conn = Arc::clone(&self.conn);
        let max_rows = self.max_rows;

        Box::pin(async move {
            debug!(sql = %sql, "Executing SQL query");
            let joined = tokio::task::spawn_blocking(move || {
                let conn = conn
                    .lock()
                    .map_err(|e| QueryError::new(QueryErrorKind::Other, e.to_string()))?;
                run_query(&conn, &sql, max_rows)
            })
            .await;

            match joined {
                Ok(result) => result,
                Err(e) => Err(QueryError::new(
                    QueryErrorKind::Other,
                    format!("query task failed: {}", e),
                )),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> SqliteExecutor {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"CREATE TABLE Orders (OrderID INTEGER PRIMARY KEY, CustomerID TEXT, OrderDate TEXT);
               CREATE TABLE "Order Details" (OrderID INTEGER, ProductID INTEGER, UnitPrice REAL, Quantity INTEGER, Discount REAL);
               CREATE TABLE Products ([ProductID] INTEGER PRIMARY KEY, [ProductName] TEXT);
               INSERT INTO Orders VALUES (1, 'ALFKI', '1997-01-10'), (2, 'BONAP', '1997-02-11');
               INSERT INTO "Order Details" VALUES (1, 1, 10.0, 5, 0.0), (2, 1, 10.0, 3, 0.5);
               INSERT INTO Products VALUES (1, 'Chai');"#,
        )
        .unwrap();
        SqliteExecutor::from_connection(conn, true).unwrap()
    }

    #[tokio::test]
    async fn returns_rows_in_column_order() {
        let db = fixture();
        let rows = db
            .execute("SELECT OrderID, CustomerID FROM Orders ORDER BY OrderID")
            .await
            .unwrap();
        assert_eq!(rows.columns, vec!["OrderID", "CustomerID"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.rows[0]["CustomerID"], serde_json::json!("ALFKI"));
    }

    #[tokio::test]
    async fn duplicate_columns_keep_every_value_in_order() {
        let db = fixture();
        let rows = db
            .execute(
                "SELECT o.OrderID, d.OrderID, 'b' AS zeta, 'a' AS alpha
                 FROM Orders o JOIN \"Order Details\" d ON d.OrderID = o.OrderID
                 ORDER BY o.OrderID LIMIT 1",
            )
            .await
            .unwrap();
        assert_eq!(rows.columns, vec!["OrderID", "OrderID_2", "zeta", "alpha"]);

        let row = &rows.rows[0];
        let keys: Vec<&str> = row.keys().map(String::as_str).collect();
        assert_eq!(keys, rows.columns);
        assert_eq!(row["OrderID"], serde_json::json!(1));
        assert_eq!(row["OrderID_2"], serde_json::json!(1));
        assert_eq!(
            serde_json::to_string(row).unwrap(),
            r#"{"OrderID":1,"OrderID_2":1,"zeta":"b","alpha":"a"}"#
        );
    }

    #[test]
    fn unique_columns_skips_taken_names() {
        assert_eq!(
            unique_columns(vec!["x", "x", "x_2", "y"]),
            vec!["x", "x_2", "x_2_2", "y"]
        );
    }

    #[tokio::test]
    async fn compat_view_resolves_order_details() {
        let db = fixture();
        let rows = db
            .execute("SELECT SUM(UnitPrice * Quantity * (1 - Discount)) AS revenue FROM order_items")
            .await
            .unwrap();
        assert_eq!(rows.rows[0]["revenue"], serde_json::json!(65.0));
    }

    #[tokio::test]
    async fn empty_result_is_success() {
        let db = fixture();
        let rows = db
            .execute("SELECT * FROM Orders WHERE CustomerID = 'NOPE'")
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert_eq!(rows.columns.len(), 3);
    }

    #[tokio::test]
    async fn syntax_errors_are_classified() {
        let db = fixture();
        let err = db.execute("SELEC * FROM Orders").await.unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::Syntax);
        assert!(err.message.contains("SELEC * FROM Orders"));
    }

    #[tokio::test]
    async fn unknown_columns_are_classified() {
        let db = fixture();
        let err = db.execute("SELECT Revenue FROM Orders").await.unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::UnknownIdentifier);
    }

    #[tokio::test]
    async fn row_cap_applies() {
        let db = fixture().with_max_rows(1);
        let rows = db.execute("SELECT * FROM Orders").await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn schema_strips_brackets_and_lists_views() {
        let db = fixture();
        let schema = db.schema().unwrap();
        assert!(schema.contains("CREATE TABLE Products (ProductID INTEGER PRIMARY KEY, ProductName TEXT)"));
        assert!(schema.contains("view order_items is an alias of \"Order Details\""));
        // `orders` collides with `Orders`, so no alias is created for it.
        assert!(!schema.contains("view orders"));
    }

    #[test]
    fn open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = SqliteExecutor::open(&dir.path().join("missing.sqlite"), true);
        assert!(matches!(result, Err(StrataError::Database(_))));
    }

    #[tokio::test]
    async fn opened_file_is_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shop.sqlite");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE Orders (OrderID INTEGER);").unwrap();
        }
        let db = SqliteExecutor::open(&path, false).unwrap();
        let err = db.execute("INSERT INTO Orders VALUES (1)").await.unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::Other);
        assert!(err.message.to_lowercase().contains("readonly"));
    }
}
