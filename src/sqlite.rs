//! SQLite execution: the prepared-statement handle and the insert/update/delete
//! capability records delegate to.

use crate::error::{DataLayerError, Result};
use crate::value::{Attributes, Params, Value};
use rusqlite::{Connection, Statement};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

const SQL_TARGET: &str = "datalayer.sql";

/// Prepared-statement capable handle.
///
/// Placeholders are named (`:name`, `@name` or `$name`) and bound from [`Params`]
/// by name without the sigil. A placeholder with no value fails with
/// [`DataLayerError::MissingParameter`]; extra values are ignored.
pub trait Executor: Send + Sync {
    /// Run a statement and map every returned row to its columns.
    fn query(&self, sql: &str, params: &Params) -> Result<Vec<Attributes>>;

    /// Run a statement and return the number of affected rows.
    fn execute(&self, sql: &str, params: &Params) -> Result<usize>;

    /// Run an insert and return the id of the new row.
    fn insert(&self, sql: &str, params: &Params) -> Result<i64>;
}

/// Raw insert/update/delete capability used by `save` and `destroy`.
pub trait Crud: Send + Sync {
    /// Insert a row, returning its primary key, or `None` if the store assigned none.
    fn create(&self, entity: &str, columns: &Attributes) -> Result<Option<Value>>;

    fn update(&self, entity: &str, columns: &Attributes, terms: &str, params: &Params)
        -> Result<bool>;

    fn delete(&self, entity: &str, terms: &str, params: &Params) -> Result<bool>;
}

/// SQL statement with named parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub statement: String,
    pub params: Params,
}

impl SqlQuery {
    pub fn new(statement: &str) -> Self {
        Self {
            statement: statement.to_string(),
            params: Params::new(),
        }
    }
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }
}

/// CRUD operation types
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOperation {
    pub table: String,
    pub data: Attributes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOperation {
    pub table: String,
    pub updates: Attributes,
    pub terms: String,
    pub params: Params,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOperation {
    pub table: String,
    pub terms: String,
    pub params: Params,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CrudOperation {
    Create(CreateOperation),
    Update(UpdateOperation),
    Delete(DeleteOperation),
}

impl CrudOperation {
    /// Render the operation to SQL.
    ///
    /// Inserts bind each column as `:column`. Updates bind SET values as
    /// `:set_<n>` so they never collide with the caller's WHERE parameters.
    pub fn to_sql(&self) -> SqlQuery {
        match self {
            CrudOperation::Create(op) if op.data.is_empty() => {
                SqlQuery::new(&format!("INSERT INTO {} DEFAULT VALUES", op.table))
            }
            CrudOperation::Create(op) => {
                let columns: Vec<&str> = op.data.keys().map(String::as_str).collect();
                let placeholders: Vec<String> =
                    columns.iter().map(|column| format!(":{column}")).collect();
                let statement = format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    op.table,
                    columns.join(", "),
                    placeholders.join(", ")
                );
                SqlQuery::new(&statement).with_params(Params::from(op.data.clone()))
            }
            CrudOperation::Update(op) => {
                let mut params = op.params.clone();
                let assignments: Vec<String> = op
                    .updates
                    .iter()
                    .enumerate()
                    .map(|(index, (column, value))| {
                        params.insert(&format!("set_{index}"), value.clone());
                        format!("{column} = :set_{index}")
                    })
                    .collect();
                let statement = format!(
                    "UPDATE {} SET {} WHERE {}",
                    op.table,
                    assignments.join(", "),
                    op.terms
                );
                SqlQuery::new(&statement).with_params(params)
            }
            CrudOperation::Delete(op) => {
                SqlQuery::new(&format!("DELETE FROM {} WHERE {}", op.table, op.terms))
                    .with_params(op.params.clone())
            }
        }
    }
}

/// rusqlite-backed store; one connection guarded for reuse across records.
pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection: Mutex::new(connection),
        }
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Connection::open_in_memory()?))
    }

    /// Run a batch of statements without parameters, e.g. to create tables.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        debug!(target: SQL_TARGET, sql, "batch");
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| DataLayerError::connection("sqlite connection mutex poisoned"))
    }

    fn run_query(&self, sql: &str, params: &Params) -> Result<Vec<Attributes>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        bind(&mut stmt, params)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.raw_query();
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut attributes = Attributes::new();
            for (index, name) in columns.iter().enumerate() {
                attributes.insert(name.clone(), row.get::<_, Value>(index)?);
            }
            result.push(attributes);
        }
        Ok(result)
    }

    fn run_execute(&self, sql: &str, params: &Params) -> Result<(usize, i64)> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        bind(&mut stmt, params)?;
        let affected = stmt.raw_execute()?;
        Ok((affected, conn.last_insert_rowid()))
    }
}

impl Executor for SqliteStore {
    fn query(&self, sql: &str, params: &Params) -> Result<Vec<Attributes>> {
        log_statement("query", sql, params);
        self.run_query(sql, params)
            .inspect_err(|err| log_failure(sql, err))
    }

    fn execute(&self, sql: &str, params: &Params) -> Result<usize> {
        log_statement("execute", sql, params);
        self.run_execute(sql, params)
            .map(|(affected, _)| affected)
            .inspect_err(|err| log_failure(sql, err))
    }

    fn insert(&self, sql: &str, params: &Params) -> Result<i64> {
        log_statement("insert", sql, params);
        self.run_execute(sql, params)
            .map(|(_, id)| id)
            .inspect_err(|err| log_failure(sql, err))
    }
}

impl Crud for SqliteStore {
    fn create(&self, entity: &str, columns: &Attributes) -> Result<Option<Value>> {
        let query = CrudOperation::Create(CreateOperation {
            table: entity.to_string(),
            data: columns.clone(),
        })
        .to_sql();
        let id = self.insert(&query.statement, &query.params)?;
        Ok((id != 0).then_some(Value::Integer(id)))
    }

    fn update(
        &self,
        entity: &str,
        columns: &Attributes,
        terms: &str,
        params: &Params,
    ) -> Result<bool> {
        // Nothing besides the key: the row is already up to date.
        if columns.is_empty() {
            return Ok(true);
        }
        let query = CrudOperation::Update(UpdateOperation {
            table: entity.to_string(),
            updates: columns.clone(),
            terms: terms.to_string(),
            params: params.clone(),
        })
        .to_sql();
        self.execute(&query.statement, &query.params)?;
        Ok(true)
    }

    fn delete(&self, entity: &str, terms: &str, params: &Params) -> Result<bool> {
        let query = CrudOperation::Delete(DeleteOperation {
            table: entity.to_string(),
            terms: terms.to_string(),
            params: params.clone(),
        })
        .to_sql();
        self.execute(&query.statement, &query.params)?;
        Ok(true)
    }
}

fn bind(stmt: &mut Statement<'_>, params: &Params) -> Result<()> {
    for index in 1..=stmt.parameter_count() {
        let name = stmt
            .parameter_name(index)
            .map(|name| name.trim_start_matches(|c| matches!(c, ':' | '@' | '$')).to_string())
            .ok_or_else(|| DataLayerError::MissingParameter(format!("?{index}")))?;
        let value = params
            .get(&name)
            .ok_or(DataLayerError::MissingParameter(name))?;
        stmt.raw_bind_parameter(index, value)?;
    }
    Ok(())
}

fn log_statement(kind: &str, sql: &str, params: &Params) {
    debug!(target: SQL_TARGET, kind, sql, param_count = params.len());
}

fn log_failure(sql: &str, err: &DataLayerError) {
    warn!(target: SQL_TARGET, sql, error = %err, "statement failed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .execute_batch(
                r#"
                CREATE TABLE users (
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL,
                    email TEXT UNIQUE,
                    status TEXT
                );
                "#,
            )
            .unwrap();
        store
    }

    fn columns(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect()
    }

    #[test]
    fn test_render_insert() {
        let op = CrudOperation::Create(CreateOperation {
            table: "users".to_string(),
            data: columns(&[("name", "Ann"), ("email", "a@x.com")]),
        });
        let query = op.to_sql();
        assert_eq!(
            query.statement,
            "INSERT INTO users (email, name) VALUES (:email, :name)"
        );
        assert_eq!(query.params.get("name"), Some(&Value::from("Ann")));
    }

    #[test]
    fn test_render_insert_without_columns() {
        let op = CrudOperation::Create(CreateOperation {
            table: "users".to_string(),
            data: Attributes::new(),
        });
        assert_eq!(op.to_sql().statement, "INSERT INTO users DEFAULT VALUES");
    }

    #[test]
    fn test_render_update_keeps_where_params_apart() {
        let op = CrudOperation::Update(UpdateOperation {
            table: "users".to_string(),
            updates: columns(&[("name", "Bob"), ("status", "active")]),
            terms: "status = :status".to_string(),
            params: Params::new().with_value("status", "pending"),
        });
        let query = op.to_sql();
        assert_eq!(
            query.statement,
            "UPDATE users SET name = :set_0, status = :set_1 WHERE status = :status"
        );
        assert_eq!(query.params.get("status"), Some(&Value::from("pending")));
        assert_eq!(query.params.get("set_1"), Some(&Value::from("active")));
    }

    #[test]
    fn test_render_delete() {
        let op = CrudOperation::Delete(DeleteOperation {
            table: "users".to_string(),
            terms: "id = :id".to_string(),
            params: Params::new().with_value("id", 3),
        });
        assert_eq!(op.to_sql().statement, "DELETE FROM users WHERE id = :id");
    }

    #[test]
    fn test_crud_round() {
        let store = store();
        let id = store
            .create("users", &columns(&[("name", "Ann"), ("email", "a@x.com")]))
            .unwrap();
        assert_eq!(id, Some(Value::Integer(1)));

        let params = Params::new().with_value("id", 1);
        assert!(store
            .update("users", &columns(&[("status", "active")]), "id = :id", &params)
            .unwrap());

        let rows = store
            .query("SELECT * FROM users WHERE id = :id", &params)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["status"], Value::from("active"));
        assert_eq!(rows[0]["name"], Value::from("Ann"));

        assert!(store.delete("users", "id = :id", &params).unwrap());
        assert!(store
            .query("SELECT * FROM users", &Params::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_text_params_compare_against_integer_column() {
        let store = store();
        store.create("users", &columns(&[("name", "Ann")])).unwrap();
        let rows = store
            .query("SELECT * FROM users WHERE id = :id", &Params::parse("id=1"))
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_missing_parameter() {
        let store = store();
        let err = store
            .query("SELECT * FROM users WHERE name = :name", &Params::new())
            .unwrap_err();
        assert!(matches!(err, DataLayerError::MissingParameter(ref name) if name == "name"));
    }

    #[test]
    fn test_constraint_violation_is_execution_error() {
        let store = store();
        store
            .create("users", &columns(&[("name", "Ann"), ("email", "a@x.com")]))
            .unwrap();
        let err = store
            .create("users", &columns(&[("name", "Bob"), ("email", "a@x.com")]))
            .unwrap_err();
        assert!(err.is_execution());
    }

    #[test]
    fn test_insert_and_execute() {
        let store = store();
        let id = store
            .insert(
                "INSERT INTO users (name) VALUES (@name)",
                &Params::new().with_value("name", "Ann"),
            )
            .unwrap();
        assert_eq!(id, 1);
        let affected = store
            .execute(
                "UPDATE users SET status = $status",
                &Params::new().with_value("status", "gone"),
            )
            .unwrap();
        assert_eq!(affected, 1);
    }
}
