//! Session management and user registration.
//!
//! [`AuthStore`] issues, validates, rotates and revokes opaque session
//! tokens, and registers or removes user accounts. Every operation lazily
//! opens the connection and bootstraps the auth schema on first use.
//!
//! Passwords are stored and compared in plaintext. That keeps existing
//! stores readable but is a known security deficiency; do not expose these
//! tables to untrusted readers.

use std::sync::Arc;

use chrono::NaiveDateTime;
use rusqlite::OptionalExtension;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use crate::bootstrap::{self, BootstrapOutcome};
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::token::generate_token;

/// Format SQLite's `CURRENT_TIMESTAMP` writes.
const SQLITE_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A freshly opened session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenedSession {
    /// Name of the authenticated user.
    pub user: String,
    /// Opaque session token.
    pub token: String,
}

/// The replacement token issued by [`AuthStore::refresh_session`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshedSession {
    pub new_token: String,
}

/// A live session resolved from its token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: i64,
    pub user_id: i64,
    /// Name of the session's user.
    pub user: String,
    /// When the session was opened. `None` if the column holds something
    /// other than a SQLite timestamp.
    pub created_at: Option<NaiveDateTime>,
}

// ═══════════════════════════════════════════════════════════════════════
//  AuthStore
// ═══════════════════════════════════════════════════════════════════════

/// Session and user-account operations over the auth schema.
#[derive(Clone)]
pub struct AuthStore {
    db: Database,
    bootstrapped: Arc<OnceCell<BootstrapOutcome>>,
}

impl AuthStore {
    /// Create an auth store backed by `db`. Nothing is opened yet.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            bootstrapped: Arc::new(OnceCell::new()),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Open the connection and bootstrap the schema, once per store.
    ///
    /// Later calls return the outcome of the first one without touching
    /// the database.
    pub async fn init(&self) -> StoreResult<BootstrapOutcome> {
        let outcome = self
            .bootstrapped
            .get_or_try_init(|| async {
                self.db.init().await?;
                self.db.execute_mut(bootstrap::initialize).await
            })
            .await?;
        Ok(*outcome)
    }

    /// Authenticate by exact name and password and open a new session.
    #[instrument(skip(self, password))]
    pub async fn open_session(&self, name: &str, password: &str) -> StoreResult<OpenedSession> {
        self.init().await?;
        let name = name.to_string();
        let password = password.to_string();
        let token = generate_token()?;

        let (user_id, session) = self
            .db
            .execute(move |conn| {
                let user_id: Option<i64> = conn
                    .query_row(
                        "SELECT id FROM users WHERE name = ?1 AND password = ?2",
                        rusqlite::params![name, password],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(user_id) = user_id else {
                    return Err(StoreError::InvalidCredentials { name });
                };

                conn.execute(
                    "INSERT INTO sessions (user_id, token) VALUES (?1, ?2)",
                    rusqlite::params![user_id, token],
                )?;
                Ok((user_id, OpenedSession { user: name, token }))
            })
            .await?;

        info!(user_id, user = %session.user, "session opened");
        Ok(session)
    }

    /// Delete the session holding `token`. Unknown tokens are ignored.
    #[instrument(skip(self, token))]
    pub async fn close_session(&self, token: &str) -> StoreResult<()> {
        self.init().await?;
        let token = token.to_string();
        let deleted = self
            .db
            .execute(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM sessions WHERE token = ?1",
                    rusqlite::params![token],
                )?)
            })
            .await?;
        debug!(deleted, "session closed");
        Ok(())
    }

    /// Replace the token of a live session, keeping its id, user and
    /// creation time.
    #[instrument(skip(self, token))]
    pub async fn refresh_session(&self, token: &str) -> StoreResult<RefreshedSession> {
        self.init().await?;
        let token = token.to_string();
        let new_token = generate_token()?;

        let (session_id, refreshed) = self
            .db
            .execute(move |conn| {
                let session_id = session_id_for(conn, &token)?;
                conn.execute(
                    "UPDATE sessions SET token = ?1 WHERE id = ?2",
                    rusqlite::params![new_token, session_id],
                )?;
                Ok((session_id, RefreshedSession { new_token }))
            })
            .await?;

        debug!(session_id, "session token rotated");
        Ok(refreshed)
    }

    /// Create a user account.
    ///
    /// A taken name is rejected by the `users.name` UNIQUE constraint and
    /// surfaces as [`StoreError::UniqueViolation`].
    #[instrument(skip(self, password))]
    pub async fn register_user(&self, name: &str, password: &str) -> StoreResult<()> {
        self.init().await?;
        let name = name.to_string();
        let password = password.to_string();

        let user_id = self
            .db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO users (name, password) VALUES (?1, ?2)",
                    rusqlite::params![name, password],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        info!(user_id, "user registered");
        Ok(())
    }

    /// Delete the user owning `token`, along with all of that user's
    /// sessions and group memberships.
    ///
    /// Rows are removed in dependency order (sessions, memberships, user)
    /// as separate statements.
    #[instrument(skip(self, token))]
    pub async fn deregister_user(&self, token: &str) -> StoreResult<()> {
        self.init().await?;
        let token = token.to_string();

        let user_id = self
            .db
            .execute(move |conn| {
                let user_id: i64 = conn
                    .query_row(
                        "SELECT user_id FROM sessions WHERE token = ?1",
                        rusqlite::params![token],
                        |row| row.get(0),
                    )
                    .optional()?
                    .ok_or(StoreError::InvalidSession)?;

                conn.execute(
                    "DELETE FROM sessions WHERE user_id = ?1",
                    rusqlite::params![user_id],
                )?;
                conn.execute(
                    "DELETE FROM user_groups WHERE user_id = ?1",
                    rusqlite::params![user_id],
                )?;
                conn.execute("DELETE FROM users WHERE id = ?1", rusqlite::params![user_id])?;
                Ok(user_id)
            })
            .await?;

        info!(user_id, "user deregistered");
        Ok(())
    }

    /// Resolve a token to its live session, or `None`.
    #[instrument(skip(self, token))]
    pub async fn validate_session(&self, token: &str) -> StoreResult<Option<SessionInfo>> {
        self.init().await?;
        let token = token.to_string();
        self.db
            .execute(move |conn| session_info(conn, &token))
            .await
    }

    /// Names of the permissions the session's user holds through group
    /// membership, sorted and de-duplicated.
    #[instrument(skip(self, token))]
    pub async fn permissions(&self, token: &str) -> StoreResult<Vec<String>> {
        self.init().await?;
        let token = token.to_string();
        self.db
            .execute(move |conn| {
                let info = session_info(conn, &token)?.ok_or(StoreError::InvalidSession)?;
                let mut stmt = conn.prepare(
                    "SELECT DISTINCT p.name FROM user_groups ug \
                     JOIN group_permissions gp ON gp.group_id = ug.group_id \
                     JOIN permissions p ON p.id = gp.permission_id \
                     WHERE ug.user_id = ?1 ORDER BY p.name",
                )?;
                let names = stmt
                    .query_map(rusqlite::params![info.user_id], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Internal queries
// ═══════════════════════════════════════════════════════════════════════

fn session_id_for(conn: &rusqlite::Connection, token: &str) -> StoreResult<i64> {
    conn.query_row(
        "SELECT id FROM sessions WHERE token = ?1",
        rusqlite::params![token],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(StoreError::InvalidSession)
}

fn session_info(conn: &rusqlite::Connection, token: &str) -> StoreResult<Option<SessionInfo>> {
    let info = conn
        .query_row(
            "SELECT s.id, s.user_id, u.name, s.created_at FROM sessions s \
             JOIN users u ON u.id = s.user_id WHERE s.token = ?1",
            rusqlite::params![token],
            |row| {
                let created_at: Option<String> = row.get(3)?;
                Ok(SessionInfo {
                    session_id: row.get(0)?,
                    user_id: row.get(1)?,
                    user: row.get(2)?,
                    created_at: created_at.and_then(|raw| {
                        NaiveDateTime::parse_from_str(&raw, SQLITE_TIMESTAMP).ok()
                    }),
                })
            },
        )
        .optional()?;
    Ok(info)
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::{ADMIN_PASSWORD, ADMIN_PERMISSION, ADMIN_USER};
    use crate::token::is_well_formed;

    fn setup_store() -> AuthStore {
        AuthStore::new(Database::new(":memory:", "$filename"))
    }

    async fn count(store: &AuthStore, sql: &'static str) -> i64 {
        store
            .database()
            .execute(move |conn| Ok(conn.query_row(sql, [], |row| row.get(0))?))
            .await
            .unwrap()
    }

    async fn stored_token(store: &AuthStore, session_id: i64) -> String {
        store
            .database()
            .execute(move |conn| {
                Ok(conn.query_row(
                    "SELECT token FROM sessions WHERE id = ?1",
                    [session_id],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn init_bootstraps_once() {
        let store = setup_store();
        assert_eq!(store.init().await.unwrap(), BootstrapOutcome::Created);
        assert_eq!(store.init().await.unwrap(), BootstrapOutcome::Created);

        // A second store on the same connection sees the existing schema.
        let other = AuthStore::new(store.database().clone());
        assert_eq!(other.init().await.unwrap(), BootstrapOutcome::AlreadyPresent);
        assert_eq!(count(&store, "SELECT COUNT(*) FROM users").await, 1);
    }

    #[tokio::test]
    async fn open_session_with_admin_credentials() {
        let store = setup_store();
        let session = store.open_session(ADMIN_USER, ADMIN_PASSWORD).await.unwrap();
        assert_eq!(session.user, ADMIN_USER);
        assert!(is_well_formed(&session.token));
        assert_eq!(count(&store, "SELECT COUNT(*) FROM sessions").await, 1);
    }

    #[tokio::test]
    async fn each_login_gets_a_distinct_token() {
        let store = setup_store();
        let first = store.open_session("admin", "admin").await.unwrap();
        let second = store.open_session("admin", "admin").await.unwrap();
        assert_ne!(first.token, second.token);
        assert_eq!(count(&store, "SELECT COUNT(*) FROM sessions").await, 2);
    }

    #[tokio::test]
    async fn wrong_password_is_rejected_without_a_session() {
        let store = setup_store();
        let err = store.open_session("admin", "nope").await.unwrap_err();
        assert!(
            matches!(err, StoreError::InvalidCredentials { ref name } if name == "admin"),
            "got {err:?}"
        );
        assert!(!err.to_string().contains("nope"));
        assert_eq!(count(&store, "SELECT COUNT(*) FROM sessions").await, 0);
    }

    #[tokio::test]
    async fn unknown_user_is_rejected() {
        let store = setup_store();
        let err = store.open_session("ghost", "admin").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidCredentials { .. }));
    }

    #[tokio::test]
    async fn close_session_removes_row_and_ignores_unknown_tokens() {
        let store = setup_store();
        let session = store.open_session("admin", "admin").await.unwrap();

        store.close_session(&session.token).await.unwrap();
        assert_eq!(count(&store, "SELECT COUNT(*) FROM sessions").await, 0);

        store.close_session(&session.token).await.unwrap();
        store.close_session("NOT-A-TOKEN").await.unwrap();
    }

    #[tokio::test]
    async fn refresh_rotates_token_in_place() {
        let store = setup_store();
        let session = store.open_session("admin", "admin").await.unwrap();
        let before = store.validate_session(&session.token).await.unwrap().unwrap();

        let refreshed = store.refresh_session(&session.token).await.unwrap();
        assert_ne!(refreshed.new_token, session.token);
        assert!(is_well_formed(&refreshed.new_token));
        assert_eq!(stored_token(&store, before.session_id).await, refreshed.new_token);

        let after = store
            .validate_session(&refreshed.new_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.session_id, before.session_id);
        assert_eq!(after.user_id, before.user_id);
        assert_eq!(after.created_at, before.created_at);

        assert!(store.validate_session(&session.token).await.unwrap().is_none());
        let err = store.refresh_session(&session.token).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidSession));
    }

    #[tokio::test]
    async fn refresh_unknown_token_fails() {
        let store = setup_store();
        let err = store.refresh_session("MISSING").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidSession));
    }

    #[tokio::test]
    async fn register_then_login() {
        let store = setup_store();
        store.register_user("usuario1", "password1").await.unwrap();
        let session = store.open_session("usuario1", "password1").await.unwrap();
        assert_eq!(session.user, "usuario1");
    }

    #[tokio::test]
    async fn duplicate_registration_is_a_unique_violation() {
        let store = setup_store();
        store.register_user("bob", "one").await.unwrap();
        let err = store.register_user("bob", "two").await.unwrap_err();
        assert!(err.is_unique_violation(), "got {err:?}");
        assert_eq!(count(&store, "SELECT COUNT(*) FROM users").await, 2);
    }

    #[tokio::test]
    async fn deregister_cascades_sessions_and_memberships() {
        let store = setup_store();
        store.register_user("carol", "pw").await.unwrap();
        let first = store.open_session("carol", "pw").await.unwrap();
        let second = store.open_session("carol", "pw").await.unwrap();
        let info = store.validate_session(&first.token).await.unwrap().unwrap();
        let user_id = info.user_id;

        store
            .database()
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO user_groups (user_id, group_id) VALUES (?1, 1)",
                    [user_id],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        store.deregister_user(&second.token).await.unwrap();

        let remaining = |sql: &'static str| {
            let store = store.clone();
            async move {
                store
                    .database()
                    .execute(move |conn| Ok(conn.query_row(sql, [user_id], |row| row.get::<_, i64>(0))?))
                    .await
                    .unwrap()
            }
        };
        assert_eq!(remaining("SELECT COUNT(*) FROM users WHERE id = ?1").await, 0);
        assert_eq!(remaining("SELECT COUNT(*) FROM sessions WHERE user_id = ?1").await, 0);
        assert_eq!(remaining("SELECT COUNT(*) FROM user_groups WHERE user_id = ?1").await, 0);

        // The admin is untouched.
        store.open_session("admin", "admin").await.unwrap();
    }

    #[tokio::test]
    async fn deregister_unknown_token_fails() {
        let store = setup_store();
        let err = store.deregister_user("MISSING").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidSession));
    }

    #[tokio::test]
    async fn validate_session_reports_user_and_timestamp() {
        let store = setup_store();
        let session = store.open_session("admin", "admin").await.unwrap();
        let info = store.validate_session(&session.token).await.unwrap().unwrap();
        assert_eq!(info.user, "admin");
        assert!(info.created_at.is_some());

        store.close_session(&session.token).await.unwrap();
        assert!(store.validate_session(&session.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn permissions_follow_group_membership() {
        let store = setup_store();
        let admin = store.open_session("admin", "admin").await.unwrap();
        assert_eq!(
            store.permissions(&admin.token).await.unwrap(),
            vec![ADMIN_PERMISSION.to_string()]
        );

        store.register_user("dave", "pw").await.unwrap();
        let dave = store.open_session("dave", "pw").await.unwrap();
        assert!(store.permissions(&dave.token).await.unwrap().is_empty());

        let err = store.permissions("MISSING").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidSession));
    }
}
