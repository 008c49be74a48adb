//! SQLite connection handle with lazy, one-shot initialization.
//!
//! The [`Database`] struct owns a store location and opens the underlying
//! `rusqlite::Connection` the first time it is needed. Every operation is
//! dispatched onto tokio's blocking pool via `spawn_blocking`, and clones
//! share the same connection.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::value::{Row, Value};

/// Store name that selects a private in-memory database.
pub const MEMORY_NAME: &str = ":memory:";

/// Placeholder in a locator that is replaced with the store name.
pub const FILENAME_PLACEHOLDER: &str = "$filename";

/// Default locator: the store name is used as the path unchanged.
pub const DEFAULT_LOCATOR: &str = FILENAME_PLACEHOLDER;

// ═══════════════════════════════════════════════════════════════════════
//  Location
// ═══════════════════════════════════════════════════════════════════════

/// Where a store lives once its name has been resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// A private in-memory database that disappears with its connection.
    Memory,
    /// A database file on disk.
    File(PathBuf),
}

impl StoreLocation {
    /// Resolve a store `name` through a `locator` template.
    ///
    /// `":memory:"` and the empty name select an in-memory store. Otherwise
    /// each `$filename` in the locator is replaced by `name`; a locator
    /// without the placeholder is used as the path as-is.
    pub fn resolve(name: &str, locator: &str) -> Self {
        if name.is_empty() || name == MEMORY_NAME {
            return Self::Memory;
        }
        let locator = if locator.is_empty() {
            DEFAULT_LOCATOR
        } else {
            locator
        };
        Self::File(PathBuf::from(locator.replace(FILENAME_PLACEHOLDER, name)))
    }

    fn open(&self) -> StoreResult<Connection> {
        let conn = match self {
            Self::Memory => {
                debug!("opening in-memory database");
                Connection::open_in_memory()?
            }
            Self::File(path) => {
                info!(path = %path.display(), "opening database");
                Connection::open(path)?
            }
        };
        apply_pragmas(&conn)?;
        Ok(conn)
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Database
// ═══════════════════════════════════════════════════════════════════════

/// Result of a mutating statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    /// Rows inserted, updated or deleted by the statement.
    pub changes: usize,
    /// Rowid of the most recent successful INSERT on this connection.
    pub last_insert_rowid: i64,
}

struct Inner {
    name: String,
    location: StoreLocation,
    conn: OnceCell<Mutex<Connection>>,
}

/// Thread-safe, lazily opened handle to a SQLite database.
///
/// All read/write operations go through [`Database::execute`], which opens
/// the connection on first use and runs the closure on the blocking pool.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl Database {
    /// Describe a store without opening it.
    ///
    /// The connection is opened by the first call to [`Database::init`] or
    /// any operation that needs it.
    pub fn new(name: impl Into<String>, locator: &str) -> Self {
        let name = name.into();
        let location = StoreLocation::resolve(&name, locator);
        Self {
            inner: Arc::new(Inner {
                name,
                location,
                conn: OnceCell::new(),
            }),
        }
    }

    /// Open (or create) a database at `path` right away.
    ///
    /// This call blocks briefly (file I/O), so call it during startup or
    /// wrap it in `spawn_blocking` yourself.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let location = StoreLocation::File(path.to_path_buf());
        let conn = location.open()?;
        Ok(Self::from_connection(path.display().to_string(), location, conn))
    }

    /// Create an already-open in-memory database, mostly for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let location = StoreLocation::Memory;
        let conn = location.open()?;
        Ok(Self::from_connection(MEMORY_NAME.to_string(), location, conn))
    }

    fn from_connection(name: String, location: StoreLocation, conn: Connection) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                location,
                conn: OnceCell::new_with(Some(Mutex::new(conn))),
            }),
        }
    }

    /// The store name this handle was created with.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn location(&self) -> &StoreLocation {
        &self.inner.location
    }

    /// Whether the connection has been opened yet.
    pub fn is_initialized(&self) -> bool {
        self.inner.conn.initialized()
    }

    /// Open the connection if it is not open yet.
    ///
    /// Safe to call on every request; only the first call does any work and
    /// concurrent first calls wait for a single open.
    pub async fn init(&self) -> StoreResult<()> {
        self.inner
            .conn
            .get_or_try_init(|| async {
                let location = self.inner.location.clone();
                let conn = tokio::task::spawn_blocking(move || location.open()).await??;
                Ok::<_, StoreError>(Mutex::new(conn))
            })
            .await?;
        Ok(())
    }

    /// Execute an arbitrary closure against the connection on the blocking pool.
    ///
    /// This is the primary way to interact with the database from async code.
    /// The closure receives a `&Connection` and must return a `StoreResult<T>`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let count: i64 = db.execute(|conn| {
    ///     let count = conn.query_row("SELECT count(*) FROM users", [], |row| row.get(0))?;
    ///     Ok(count)
    /// }).await?;
    /// ```
    pub async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.execute_mut(move |conn| f(conn)).await
    }

    /// Execute a mutable closure (for transactions, etc.) on the blocking pool.
    pub async fn execute_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.init().await?;
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let conn = inner
                .conn
                .get()
                .ok_or_else(|| StoreError::ConnectionUnavailable("not opened".into()))?;
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::ConnectionUnavailable(format!("mutex poisoned: {e}")))?;
            f(&mut conn)
        })
        .await?
    }

    // ── collaborator surface ─────────────────────────────────────────

    /// Execute a mutating statement and report the affected row count.
    pub async fn run(&self, sql: impl Into<String>, params: Vec<Value>) -> StoreResult<RunResult> {
        let sql = sql.into();
        self.execute(move |conn| run(conn, &sql, &params)).await
    }

    /// Execute a statement and collect every row it returns.
    pub async fn all(&self, sql: impl Into<String>, params: Vec<Value>) -> StoreResult<Vec<Row>> {
        let sql = sql.into();
        self.execute(move |conn| all(conn, &sql, &params)).await
    }

    /// Execute a statement and return its first row, if any.
    pub async fn get(&self, sql: impl Into<String>, params: Vec<Value>) -> StoreResult<Option<Row>> {
        let sql = sql.into();
        self.execute(move |conn| get(conn, &sql, &params)).await
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.inner.name)
            .field("location", &self.inner.location)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

// ── synchronous helpers ──────────────────────────────────────────────

/// Run a mutating statement on `conn`. Call from inside [`Database::execute`].
pub fn run(conn: &Connection, sql: &str, params: &[Value]) -> StoreResult<RunResult> {
    let changes = conn.execute(sql, rusqlite::params_from_iter(params))?;
    Ok(RunResult {
        changes,
        last_insert_rowid: conn.last_insert_rowid(),
    })
}

/// Collect all rows of a query on `conn` as ordered column/value maps.
pub fn all(conn: &Connection, sql: &str, params: &[Value]) -> StoreResult<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let columns = column_names(&stmt);
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), |row| read_row(&columns, row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// First row of a query on `conn`, or `None`. Later rows are never stepped.
pub fn get(conn: &Connection, sql: &str, params: &[Value]) -> StoreResult<Option<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let columns = column_names(&stmt);
    let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
    match rows.next()? {
        Some(row) => Ok(Some(read_row(&columns, row)?)),
        None => Ok(None),
    }
}

fn column_names(stmt: &rusqlite::Statement<'_>) -> Vec<String> {
    stmt.column_names().into_iter().map(String::from).collect()
}

fn read_row(columns: &[String], row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    let mut out = Row::with_capacity(columns.len());
    for (idx, column) in columns.iter().enumerate() {
        out.set(column.as_str(), row.get::<_, Value>(idx)?);
    }
    Ok(out)
}

// ── pragmas ──────────────────────────────────────────────────────────

/// Apply connection pragmas to a fresh connection.
fn apply_pragmas(conn: &Connection) -> StoreResult<()> {
    debug!("applying SQLite pragmas");

    // WAL mode: concurrent readers, non-blocking writes.
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // NORMAL sync is safe with WAL; we only lose the last transaction
    // on a power failure, not corruption.
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    // Sessions and memberships must always point at live rows.
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // Busy timeout so concurrent writers wait instead of failing immediately.
    conn.pragma_update(None, "busy_timeout", 5_000_i32)?;

    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_names_resolve_to_memory() {
        assert_eq!(StoreLocation::resolve(":memory:", "$filename"), StoreLocation::Memory);
        assert_eq!(StoreLocation::resolve("", "/data/$filename"), StoreLocation::Memory);
    }

    #[test]
    fn locator_placeholder_is_substituted() {
        assert_eq!(
            StoreLocation::resolve("app.sqlite", "/var/lib/sqlds/$filename"),
            StoreLocation::File(PathBuf::from("/var/lib/sqlds/app.sqlite"))
        );
        assert_eq!(
            StoreLocation::resolve("app.sqlite", ""),
            StoreLocation::File(PathBuf::from("app.sqlite"))
        );
        assert_eq!(
            StoreLocation::resolve("app.sqlite", "/fixed/path.db"),
            StoreLocation::File(PathBuf::from("/fixed/path.db"))
        );
    }

    #[tokio::test]
    async fn connection_opens_lazily_once() {
        let db = Database::new(":memory:", DEFAULT_LOCATOR);
        assert!(!db.is_initialized());

        db.init().await.unwrap();
        assert!(db.is_initialized());

        // Same connection after a second init: the table survives.
        db.run("CREATE TABLE t (x INTEGER)", vec![]).await.unwrap();
        db.init().await.unwrap();
        let rows = db.all("SELECT * FROM t", vec![]).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn operations_open_the_connection_on_demand() {
        let db = Database::new(":memory:", DEFAULT_LOCATOR);
        let row = db.get("SELECT 1 AS one", vec![]).await.unwrap().unwrap();
        assert!(db.is_initialized());
        assert_eq!(row.get("one"), Some(&Value::Integer(1)));
    }

    #[tokio::test]
    async fn clones_share_the_connection() {
        let db = Database::new(":memory:", DEFAULT_LOCATOR);
        let other = db.clone();
        db.run("CREATE TABLE t (x INTEGER)", vec![]).await.unwrap();
        let result = other
            .run("INSERT INTO t (x) VALUES (?1)", vec![Value::Integer(5)])
            .await
            .unwrap();
        assert_eq!(result.changes, 1);
        assert_eq!(result.last_insert_rowid, 1);
    }

    #[tokio::test]
    async fn all_keeps_statement_column_order() {
        let db = Database::open_in_memory().unwrap();
        let rows = db
            .all("SELECT 'b' AS second, 1 AS first", vec![])
            .await
            .unwrap();
        let columns: Vec<&str> = rows[0].columns().collect();
        assert_eq!(columns, ["second", "first"]);
    }

    #[tokio::test]
    async fn get_returns_none_for_empty_result() {
        let db = Database::open_in_memory().unwrap();
        let row = db
            .get("SELECT 1 WHERE 1 = ?1", vec![Value::Integer(2)])
            .await
            .unwrap();
        assert!(row.is_none());
    }

    const OVERFLOW_ON_SECOND_ROW: &str = "SELECT CASE WHEN x = 1 THEN x \
         ELSE abs(-9223372036854775807 - (x - 1)) END AS v \
         FROM (SELECT 1 AS x UNION ALL SELECT 2)";

    #[tokio::test]
    async fn get_stops_after_the_first_row() {
        let db = Database::open_in_memory().unwrap();
        // abs() of i64::MIN is an overflow error, raised only when row 2 is stepped.
        let row = db.get(OVERFLOW_ON_SECOND_ROW, vec![]).await.unwrap().unwrap();
        assert_eq!(row.get("v"), Some(&Value::Integer(1)));

        assert!(db.all(OVERFLOW_ON_SECOND_ROW, vec![]).await.is_err());
    }

    #[tokio::test]
    async fn poisoned_connection_is_reported_as_unavailable() {
        let db = Database::open_in_memory().unwrap();
        let shared = db.clone();
        let _ = std::thread::spawn(move || {
            let _guard = shared.inner.conn.get().unwrap().lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        let err = db.run("SELECT 1", vec![]).await.unwrap_err();
        assert!(matches!(err, StoreError::ConnectionUnavailable(_)), "{err:?}");
    }

    #[tokio::test]
    async fn foreign_keys_are_enforced() {
        let db = Database::open_in_memory().unwrap();
        let enabled = db.get("PRAGMA foreign_keys", vec![]).await.unwrap().unwrap();
        assert_eq!(enabled.get("foreign_keys"), Some(&Value::Integer(1)));
    }
}
