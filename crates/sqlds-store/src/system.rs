//! Convenience wiring of one database, one auth store and one query builder.

use crate::auth::AuthStore;
use crate::db::Database;
use crate::rest::{RestOptions, RestStore};

/// An auth store and a query builder sharing one lazily opened database.
///
/// Sharing matters for `":memory:"` stores, where every separate
/// connection would see its own empty database.
#[derive(Clone)]
pub struct DataSystem {
    pub db: Database,
    pub auth: AuthStore,
    pub rest: RestStore,
}

impl DataSystem {
    /// Describe the store `name` resolved through `locator`; nothing is
    /// opened until the first operation.
    pub fn create(name: impl Into<String>, locator: &str) -> Self {
        Self::with_options(name, locator, RestOptions::default())
    }

    pub fn with_options(name: impl Into<String>, locator: &str, options: RestOptions) -> Self {
        Self::from_database(Database::new(name, locator), options)
    }

    /// Wire both components onto an existing handle.
    pub fn from_database(db: Database, options: RestOptions) -> Self {
        Self {
            auth: AuthStore::new(db.clone()),
            rest: RestStore::with_options(db.clone(), options),
            db,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::SelectRequest;

    #[tokio::test]
    async fn components_share_one_in_memory_store() {
        let system = DataSystem::create(":memory:", "$filename");
        assert!(!system.db.is_initialized());

        system.auth.register_user("erin", "pw").await.unwrap();

        let users = system
            .rest
            .select(SelectRequest::new("users").filter("name", "=", "erin"))
            .await
            .unwrap();
        assert_eq!(users.len(), 1);
        assert!(system.db.is_initialized());
    }
}
