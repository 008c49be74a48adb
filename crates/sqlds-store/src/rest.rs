//! Generic CRUD over arbitrary tables.
//!
//! [`RestStore`] turns structured select/insert/update/delete requests
//! into parameterized SQL. Values are always bound as parameters. Operators
//! (`=`, `>`, `LIKE`, ...) and ordering directions are spliced into the SQL
//! text verbatim, so they must come from trusted code, never from end users.
//! Table and column names are checked against a plain identifier pattern
//! unless [`RestOptions::strict_identifiers`] is turned off, in which case
//! they are spliced verbatim as well.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::db::{self, Database};
use crate::error::{StoreError, StoreResult};
use crate::schema::{self, Schema};
use crate::value::{Row, Value};

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("valid regex")
});

// ═══════════════════════════════════════════════════════════════════════
//  Requests
// ═══════════════════════════════════════════════════════════════════════

/// One `column operator ?` term of a WHERE clause.
///
/// Serialized as a `[column, operator, value]` triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, String, Value)", into = "(String, String, Value)")]
pub struct Condition {
    pub column: String,
    /// Inserted into the SQL text as-is.
    pub operator: String,
    /// Always bound as a parameter.
    pub value: Value,
}

impl Condition {
    pub fn new(column: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }
}

impl From<(String, String, Value)> for Condition {
    fn from((column, operator, value): (String, String, Value)) -> Self {
        Self {
            column,
            operator,
            value,
        }
    }
}

impl From<Condition> for (String, String, Value) {
    fn from(c: Condition) -> Self {
        (c.column, c.operator, c.value)
    }
}

/// One `column direction` term of an ORDER BY clause.
///
/// Serialized as a `[column, direction]` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct OrderBy {
    pub column: String,
    /// Inserted into the SQL text as-is (`ASC`, `DESC`, `DESC NULLS LAST`, ...).
    pub direction: String,
}

impl OrderBy {
    pub fn new(column: impl Into<String>, direction: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: direction.into(),
        }
    }

    pub fn asc(column: impl Into<String>) -> Self {
        Self::new(column, "ASC")
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self::new(column, "DESC")
    }
}

impl From<(String, String)> for OrderBy {
    fn from((column, direction): (String, String)) -> Self {
        Self { column, direction }
    }
}

impl From<OrderBy> for (String, String) {
    fn from(o: OrderBy) -> Self {
        (o.column, o.direction)
    }
}

fn default_order() -> Vec<OrderBy> {
    vec![OrderBy::asc("id")]
}

/// `SELECT * FROM table [WHERE ...] [ORDER BY ...]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectRequest {
    pub table: String,
    #[serde(default, rename = "where")]
    pub conditions: Vec<Condition>,
    /// Defaults to `[("id", "ASC")]`; an empty list means no ORDER BY.
    #[serde(default = "default_order")]
    pub order_by: Vec<OrderBy>,
}

impl SelectRequest {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            conditions: Vec::new(),
            order_by: default_order(),
        }
    }

    /// AND another condition onto the WHERE clause.
    pub fn filter(
        mut self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.conditions.push(Condition::new(column, operator, value));
        self
    }

    /// Replace the ordering.
    pub fn order(mut self, order_by: Vec<OrderBy>) -> Self {
        self.order_by = order_by;
        self
    }
}

/// Insert `items`, or `item` alone when `items` is empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsertRequest {
    pub table: String,
    #[serde(default)]
    pub item: Row,
    #[serde(default)]
    pub items: Vec<Row>,
}

impl InsertRequest {
    pub fn one(table: impl Into<String>, item: Row) -> Self {
        Self {
            table: table.into(),
            item,
            items: Vec::new(),
        }
    }

    pub fn many(table: impl Into<String>, items: Vec<Row>) -> Self {
        Self {
            table: table.into(),
            item: Row::new(),
            items,
        }
    }

    /// The rows this request inserts, in order.
    pub fn rows(&self) -> Vec<&Row> {
        if self.items.is_empty() {
            vec![&self.item]
        } else {
            self.items.iter().collect()
        }
    }
}

/// `UPDATE table SET ... [WHERE ...]`. Without conditions every row changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub table: String,
    pub values: Row,
    #[serde(default, rename = "where")]
    pub conditions: Vec<Condition>,
}

impl UpdateRequest {
    pub fn new(table: impl Into<String>, values: Row) -> Self {
        Self {
            table: table.into(),
            values,
            conditions: Vec::new(),
        }
    }

    pub fn filter(
        mut self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.conditions.push(Condition::new(column, operator, value));
        self
    }
}

/// `DELETE FROM table [WHERE ...]`. Without conditions every row goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub table: String,
    #[serde(default, rename = "where")]
    pub conditions: Vec<Condition>,
}

impl DeleteRequest {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            conditions: Vec::new(),
        }
    }

    pub fn filter(
        mut self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.conditions.push(Condition::new(column, operator, value));
        self
    }
}

// ── outcomes ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InsertOutcome {
    pub inserted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    pub changes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub deleted: usize,
}

// ═══════════════════════════════════════════════════════════════════════
//  Statement building
// ═══════════════════════════════════════════════════════════════════════

/// Query builder settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RestOptions {
    /// Reject table and column names that are not plain identifiers
    /// (optionally `schema.name`). Operators and directions are never checked.
    pub strict_identifiers: bool,
}

impl Default for RestOptions {
    fn default() -> Self {
        Self {
            strict_identifiers: true,
        }
    }
}

/// SQL text plus its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// One INSERT statement and the parameters for each row it is run with.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertPlan {
    pub sql: String,
    pub rows: Vec<Vec<Value>>,
}

impl RestOptions {
    fn identifier<'a>(&self, name: &'a str) -> StoreResult<&'a str> {
        if self.strict_identifiers && !IDENTIFIER_RE.is_match(name) {
            return Err(StoreError::InvalidIdentifier(name.to_string()));
        }
        Ok(name)
    }

    fn push_where(
        &self,
        conditions: &[Condition],
        sql: &mut String,
        params: &mut Vec<Value>,
    ) -> StoreResult<()> {
        if conditions.is_empty() {
            return Ok(());
        }
        let terms = conditions
            .iter()
            .map(|c| Ok(format!("{} {} ?", self.identifier(&c.column)?, c.operator)))
            .collect::<StoreResult<Vec<_>>>()?;
        sql.push_str(" WHERE ");
        sql.push_str(&terms.join(" AND "));
        params.extend(conditions.iter().map(|c| c.value.clone()));
        Ok(())
    }

    /// Build the statement for a [`SelectRequest`].
    pub fn select_statement(&self, request: &SelectRequest) -> StoreResult<Statement> {
        let mut sql = format!("SELECT * FROM {}", self.identifier(&request.table)?);
        let mut params = Vec::with_capacity(request.conditions.len());
        self.push_where(&request.conditions, &mut sql, &mut params)?;

        if !request.order_by.is_empty() {
            let terms = request
                .order_by
                .iter()
                .map(|o| Ok(format!("{} {}", self.identifier(&o.column)?, o.direction)))
                .collect::<StoreResult<Vec<_>>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        Ok(Statement { sql, params })
    }

    /// Build the statement and per-row parameters for an [`InsertRequest`].
    ///
    /// The column list comes from the first row; every other row must have
    /// exactly the same columns (in any order).
    pub fn insert_plan(&self, request: &InsertRequest) -> StoreResult<InsertPlan> {
        let rows = request.rows();
        let first = match rows.first() {
            Some(row) if !row.is_empty() => *row,
            _ => return Err(StoreError::NoDataProvided),
        };

        let columns: Vec<&str> = first.columns().collect();
        for column in &columns {
            self.identifier(column)?;
        }

        let mut params = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != columns.len() || !columns.iter().all(|c| row.contains(c)) {
                return Err(StoreError::InvalidArgument(format!(
                    "row {idx} does not have the columns of the first row ({})",
                    columns.join(", ")
                )));
            }
            params.push(
                columns
                    .iter()
                    .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                    .collect(),
            );
        }

        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            self.identifier(&request.table)?,
            columns.join(", ")
        );
        Ok(InsertPlan { sql, rows: params })
    }

    /// Build the statement for an [`UpdateRequest`].
    pub fn update_statement(&self, request: &UpdateRequest) -> StoreResult<Statement> {
        if request.values.is_empty() {
            return Err(StoreError::InvalidArgument(
                "update requires at least one value".into(),
            ));
        }

        let assignments = request
            .values
            .columns()
            .map(|c| Ok(format!("{} = ?", self.identifier(c)?)))
            .collect::<StoreResult<Vec<_>>>()?;
        let mut sql = format!(
            "UPDATE {} SET {}",
            self.identifier(&request.table)?,
            assignments.join(", ")
        );
        let mut params: Vec<Value> = request.values.iter().map(|(_, v)| v.clone()).collect();
        self.push_where(&request.conditions, &mut sql, &mut params)?;

        Ok(Statement { sql, params })
    }

    /// Build the statement for a [`DeleteRequest`].
    pub fn delete_statement(&self, request: &DeleteRequest) -> StoreResult<Statement> {
        let mut sql = format!("DELETE FROM {}", self.identifier(&request.table)?);
        let mut params = Vec::with_capacity(request.conditions.len());
        self.push_where(&request.conditions, &mut sql, &mut params)?;
        Ok(Statement { sql, params })
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  RestStore
// ═══════════════════════════════════════════════════════════════════════

/// CRUD and schema introspection over any table of a store.
#[derive(Clone)]
pub struct RestStore {
    db: Database,
    options: RestOptions,
}

impl RestStore {
    /// Create a query builder backed by `db` with default options.
    pub fn new(db: Database) -> Self {
        Self::with_options(db, RestOptions::default())
    }

    pub fn with_options(db: Database, options: RestOptions) -> Self {
        Self { db, options }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn options(&self) -> RestOptions {
        self.options
    }

    /// Open the connection if needed. Every operation does this itself.
    pub async fn init(&self) -> StoreResult<()> {
        self.db.init().await
    }

    /// Describe every table, its columns and its foreign keys.
    #[instrument(skip(self))]
    pub async fn get_schema(&self) -> StoreResult<Schema> {
        let schema = self.db.execute(|conn| schema::introspect(conn)).await?;
        debug!(tables = schema.tables.len(), "schema introspected");
        Ok(schema)
    }

    /// Fetch matching rows.
    #[instrument(skip(self, request), fields(table = %request.table))]
    pub async fn select(&self, request: SelectRequest) -> StoreResult<Vec<Row>> {
        let stmt = self.options.select_statement(&request)?;
        debug!(sql = %stmt.sql, "select");
        self.db
            .execute(move |conn| db::all(conn, &stmt.sql, &stmt.params))
            .await
    }

    /// Insert each row with its own statement, in order.
    ///
    /// There is no rollback: if row N fails, rows before it stay written and
    /// the error is returned.
    #[instrument(skip(self, request), fields(table = %request.table))]
    pub async fn insert(&self, request: InsertRequest) -> StoreResult<InsertOutcome> {
        let plan = self.options.insert_plan(&request)?;
        debug!(sql = %plan.sql, rows = plan.rows.len(), "insert");

        let inserted = self
            .db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&plan.sql)?;
                for (idx, params) in plan.rows.iter().enumerate() {
                    if let Err(err) = stmt.execute(rusqlite::params_from_iter(params)) {
                        warn!(row = idx, %err, "insert stopped, earlier rows remain");
                        return Err(err.into());
                    }
                }
                Ok(plan.rows.len())
            })
            .await?;

        Ok(InsertOutcome { inserted })
    }

    /// Update matching rows (all rows when there are no conditions).
    #[instrument(skip(self, request), fields(table = %request.table))]
    pub async fn update(&self, request: UpdateRequest) -> StoreResult<UpdateOutcome> {
        let stmt = self.options.update_statement(&request)?;
        debug!(sql = %stmt.sql, "update");
        let result = self
            .db
            .execute(move |conn| db::run(conn, &stmt.sql, &stmt.params))
            .await?;
        Ok(UpdateOutcome {
            changes: result.changes,
        })
    }

    /// Delete matching rows (all rows when there are no conditions).
    #[instrument(skip(self, request), fields(table = %request.table))]
    pub async fn delete(&self, request: DeleteRequest) -> StoreResult<DeleteOutcome> {
        let stmt = self.options.delete_statement(&request)?;
        debug!(sql = %stmt.sql, "delete");
        let result = self
            .db
            .execute(move |conn| db::run(conn, &stmt.sql, &stmt.params))
            .await?;
        Ok(DeleteOutcome {
            deleted: result.changes,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────
