//! One-time schema creation and administrator seeding.
//!
//! A store is considered bootstrapped as soon as `users` can be read.
//! Otherwise all six auth tables are created and an `admin` account is
//! seeded, linked to the `administrators` group, which holds the
//! `administrate` permission. Creation and seeding share one immediate
//! transaction, so a crash half-way never leaves a readable `users` table
//! without its seed.

use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::StoreResult;

/// Name and password of the seeded administrator account.
pub const ADMIN_USER: &str = "admin";
pub const ADMIN_PASSWORD: &str = "admin";

/// Group the administrator is placed in.
pub const ADMIN_GROUP: &str = "administrators";

/// Permission granted to [`ADMIN_GROUP`].
pub const ADMIN_PERMISSION: &str = "administrate";

/// Tables created by [`initialize`], in creation order.
pub const TABLES: [&str; 6] = [
    "users",
    "groups",
    "permissions",
    "user_groups",
    "group_permissions",
    "sessions",
];

const PROBE_SQL: &str = "SELECT * FROM users LIMIT 1";

const SCHEMA_SQL: &str = r#"
    CREATE TABLE users (
        id       INTEGER PRIMARY KEY AUTOINCREMENT,
        name     TEXT NOT NULL UNIQUE,
        password TEXT NOT NULL
    );

    CREATE TABLE groups (
        id   INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    );

    CREATE TABLE permissions (
        id   INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    );

    CREATE TABLE user_groups (
        id       INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id  INTEGER NOT NULL,
        group_id INTEGER NOT NULL,
        FOREIGN KEY (user_id) REFERENCES users(id),
        FOREIGN KEY (group_id) REFERENCES groups(id),
        UNIQUE (user_id, group_id)
    );

    CREATE TABLE group_permissions (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        group_id      INTEGER NOT NULL,
        permission_id INTEGER NOT NULL,
        FOREIGN KEY (group_id) REFERENCES groups(id),
        FOREIGN KEY (permission_id) REFERENCES permissions(id),
        UNIQUE (group_id, permission_id)
    );

    CREATE TABLE sessions (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id    INTEGER NOT NULL,
        token      TEXT NOT NULL UNIQUE,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY (user_id) REFERENCES users(id)
    );
"#;

/// What [`initialize`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapOutcome {
    /// The schema was created and seeded by this call.
    Created,
    /// The `users` table was already readable; nothing was changed.
    AlreadyPresent,
}

/// Create and seed the auth schema unless it already exists.
///
/// This is a **synchronous** function; call it from `spawn_blocking`
/// (e.g. through `Database::execute_mut`).
///
/// Any failure of the probe query counts as "schema absent", so a store that
/// is unreadable for other reasons will be treated as fresh and the
/// subsequent `CREATE TABLE` reports the real problem.
pub fn initialize(conn: &mut Connection) -> StoreResult<BootstrapOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if let Err(err) = probe(&tx) {
        debug!(%err, "users table not readable, bootstrapping schema");
    } else {
        debug!("auth schema already present");
        return Ok(BootstrapOutcome::AlreadyPresent);
    }

    tx.execute_batch(SCHEMA_SQL)?;
    seed(&tx)?;
    tx.commit()?;

    info!(
        admin = ADMIN_USER,
        group = ADMIN_GROUP,
        permission = ADMIN_PERMISSION,
        "auth schema created and seeded"
    );
    Ok(BootstrapOutcome::Created)
}

fn probe(conn: &Connection) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(PROBE_SQL)?;
    let mut rows = stmt.query([])?;
    rows.next()?;
    Ok(())
}

fn seed(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO users (name, password) VALUES (?1, ?2)",
        [ADMIN_USER, ADMIN_PASSWORD],
    )?;
    let user_id = conn.last_insert_rowid();

    conn.execute("INSERT INTO groups (name) VALUES (?1)", [ADMIN_GROUP])?;
    let group_id = conn.last_insert_rowid();

    conn.execute("INSERT INTO permissions (name) VALUES (?1)", [ADMIN_PERMISSION])?;
    let permission_id = conn.last_insert_rowid();

    conn.execute(
        "INSERT INTO user_groups (user_id, group_id) VALUES (?1, ?2)",
        [user_id, group_id],
    )?;
    conn.execute(
        "INSERT INTO group_permissions (group_id, permission_id) VALUES (?1, ?2)",
        [group_id, permission_id],
    )?;
    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn fresh_store_is_created_and_seeded() {
        let mut conn = setup_conn();
        assert_eq!(initialize(&mut conn).unwrap(), BootstrapOutcome::Created);

        for table in TABLES {
            let exists: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "missing table {table}");
        }

        assert_eq!(count(&conn, "users"), 1);
        assert_eq!(count(&conn, "groups"), 1);
        assert_eq!(count(&conn, "permissions"), 1);
        assert_eq!(count(&conn, "user_groups"), 1);
        assert_eq!(count(&conn, "group_permissions"), 1);
        assert_eq!(count(&conn, "sessions"), 0);
    }

    #[test]
    fn second_run_changes_nothing() {
        let mut conn = setup_conn();
        initialize(&mut conn).unwrap();
        assert_eq!(
            initialize(&mut conn).unwrap(),
            BootstrapOutcome::AlreadyPresent
        );

        assert_eq!(count(&conn, "users"), 1);
        assert_eq!(count(&conn, "groups"), 1);
        assert_eq!(count(&conn, "permissions"), 1);
    }

    #[test]
    fn admin_is_linked_to_administrate() {
        let mut conn = setup_conn();
        initialize(&mut conn).unwrap();

        let permission: String = conn
            .query_row(
                "SELECT p.name FROM users u \
                 JOIN user_groups ug ON ug.user_id = u.id \
                 JOIN group_permissions gp ON gp.group_id = ug.group_id \
                 JOIN permissions p ON p.id = gp.permission_id \
                 WHERE u.name = ?1",
                [ADMIN_USER],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(permission, ADMIN_PERMISSION);
    }

    #[test]
    fn existing_users_table_blocks_bootstrap() {
        let mut conn = setup_conn();
        conn.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER);")
            .unwrap();

        assert_eq!(
            initialize(&mut conn).unwrap(),
            BootstrapOutcome::AlreadyPresent
        );
        assert_eq!(count(&conn, "users"), 0);
    }
}
