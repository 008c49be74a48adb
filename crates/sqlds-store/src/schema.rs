//! Read-only schema introspection.
//!
//! Walks `sqlite_master` and the `table_info` / `foreign_key_list` pragma
//! functions. Nothing is cached; every call reads the catalog again.

use std::collections::BTreeMap;

use rusqlite::Connection;
use serde::Serialize;

use crate::error::StoreResult;

/// Every table in a store, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Schema {
    pub tables: BTreeMap<String, TableSchema>,
}

impl Schema {
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }
}

/// Columns and foreign keys of one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    /// Columns in declaration order.
    pub columns: Vec<ColumnSchema>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSchema {
    pub name: String,
    /// Declared type as written in the DDL (may be empty).
    #[serde(rename = "type")]
    pub declared_type: String,
    pub not_null: bool,
    /// Default value expression as SQL text.
    pub default: Option<String>,
    /// Part of the primary key (composite keys flag every member).
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    /// Constraint id; columns of a composite key share it.
    pub id: i64,
    /// Position within a composite key.
    pub seq: i64,
    pub from: String,
    /// Referenced column, `None` when the key targets the parent's primary key implicitly.
    pub to: Option<String>,
    /// Referenced table.
    pub table: String,
    pub on_delete: String,
    pub on_update: String,
}

/// Read the full schema of the store behind `conn`.
///
/// This is a **synchronous** function; call it from `spawn_blocking`.
pub fn introspect(conn: &Connection) -> StoreResult<Schema> {
    let names: Vec<String> = {
        let mut stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        names
    };

    let mut schema = Schema::default();
    for name in names {
        let table = TableSchema {
            columns: columns(conn, &name)?,
            foreign_keys: foreign_keys(conn, &name)?,
        };
        schema.tables.insert(name, table);
    }
    Ok(schema)
}

fn columns(conn: &Connection, table: &str) -> StoreResult<Vec<ColumnSchema>> {
    let mut stmt = conn.prepare(
        "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
    )?;
    let columns = stmt
        .query_map([table], |row| {
            Ok(ColumnSchema {
                name: row.get(0)?,
                declared_type: row.get(1)?,
                not_null: row.get::<_, i64>(2)? != 0,
                default: row.get(3)?,
                primary_key: row.get::<_, i64>(4)? > 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

fn foreign_keys(conn: &Connection, table: &str) -> StoreResult<Vec<ForeignKey>> {
    let mut stmt = conn.prepare(
        "SELECT id, seq, \"from\", \"to\", \"table\", on_delete, on_update \
         FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
    )?;
    let keys = stmt
        .query_map([table], |row| {
            Ok(ForeignKey {
                id: row.get(0)?,
                seq: row.get(1)?,
                from: row.get(2)?,
                to: row.get(3)?,
                table: row.get(4)?,
                on_delete: row.get(5)?,
                on_update: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE parents (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL DEFAULT 'x');
             CREATE TABLE children (
                 id INTEGER PRIMARY KEY,
                 parent_id INTEGER REFERENCES parents(id) ON DELETE CASCADE,
                 label
             );",
        )
        .unwrap();
        conn
    }

    #[test]
    fn lists_every_table_including_internal_ones() {
        let schema = introspect(&setup_conn()).unwrap();
        let names: Vec<&str> = schema.tables.keys().map(String::as_str).collect();
        // AUTOINCREMENT creates sqlite_sequence.
        assert_eq!(names, ["children", "parents", "sqlite_sequence"]);
    }

    #[test]
    fn describes_columns() {
        let schema = introspect(&setup_conn()).unwrap();
        let parents = schema.table("parents").unwrap();

        let id = parents.column("id").unwrap();
        assert_eq!(id.declared_type, "INTEGER");
        assert!(id.primary_key);

        let name = parents.column("name").unwrap();
        assert!(name.not_null);
        assert!(!name.primary_key);
        assert_eq!(name.default.as_deref(), Some("'x'"));

        let label = schema.table("children").unwrap().column("label").unwrap();
        assert_eq!(label.declared_type, "");
        assert!(!label.not_null);
        assert_eq!(label.default, None);
    }

    #[test]
    fn describes_foreign_keys() {
        let schema = introspect(&setup_conn()).unwrap();
        let keys = &schema.table("children").unwrap().foreign_keys;
        assert_eq!(keys.len(), 1);
        let fk = &keys[0];
        assert_eq!(fk.from, "parent_id");
        assert_eq!(fk.to.as_deref(), Some("id"));
        assert_eq!(fk.table, "parents");
        assert_eq!(fk.on_delete, "CASCADE");
        assert_eq!(fk.on_update, "NO ACTION");
    }

    #[test]
    fn serializes_with_camel_case_field_names() {
        let schema = introspect(&setup_conn()).unwrap();
        let json = serde_json::to_value(&schema).unwrap();
        let column = &json["tables"]["parents"]["columns"][1];
        assert_eq!(column["name"], "name");
        assert_eq!(column["type"], "TEXT");
        assert_eq!(column["notNull"], true);
        assert_eq!(column["primaryKey"], false);
        assert!(json["tables"]["children"]["foreignKeys"].is_array());
    }
}
