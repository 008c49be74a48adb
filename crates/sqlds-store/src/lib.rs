//! # sqlds-store
//!
//! A small data system on top of an embedded SQLite database: token-based
//! sessions over a fixed user/group/permission schema, and a generic CRUD
//! query builder for any table in the same store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┬──────────────────────────┐
//! │  AuthStore               │  RestStore               │
//! │  sessions, registration  │  select/insert/update/   │
//! │  bootstrap (once)        │  delete, get_schema      │
//! ├──────────────────────────┴──────────────────────────┤
//! │  Database (rusqlite, lazy open, spawn_blocking)     │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use sqlds_store::{DataSystem, SelectRequest};
//!
//! let system = DataSystem::create("app.sqlite", "$filename");
//! let session = system.auth.open_session("admin", "admin").await?;
//! let users = system.rest.select(SelectRequest::new("users")).await?;
//! ```

pub mod auth;
pub mod bootstrap;
pub mod db;
pub mod error;
pub mod rest;
pub mod schema;
pub mod system;
pub mod token;
pub mod value;

// ── re-exports ───────────────────────────────────────────────────────

pub use auth::{AuthStore, OpenedSession, RefreshedSession, SessionInfo};
pub use bootstrap::BootstrapOutcome;
pub use db::{Database, RunResult, StoreLocation};
pub use error::{StoreError, StoreResult};
pub use rest::{
    Condition, DeleteOutcome, DeleteRequest, InsertOutcome, InsertRequest, OrderBy, RestOptions,
    RestStore, SelectRequest, UpdateOutcome, UpdateRequest,
};
pub use schema::{ColumnSchema, ForeignKey, Schema, TableSchema};
pub use system::DataSystem;
pub use value::{Row, Value};
