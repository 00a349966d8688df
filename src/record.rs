//! Active-record core: attribute bag, fluent finders and save/destroy.
//!
//! Failure reporting is deliberately uneven: [`Record::fetch`], [`Record::fetch_all`]
//! and [`Record::save`] never return errors, they store them for [`Record::fail`]
//! and return `None`/`false`. [`Record::count`] and [`Record::destroy`] return
//! `Result` and leave handling to the caller.

use crate::connect::Connect;
use crate::entity::{Entity, Schema};
use crate::error::{DataLayerError, Result};
use crate::sqlite::{Crud, Executor};
use crate::value::{Attributes, Params, Value};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::warn;

static NULL: Value = Value::Null;

/// Handles a record executes through.
#[derive(Clone)]
struct Backend {
    executor: Arc<dyn Executor>,
    crud: Arc<dyn Crud>,
}

impl Backend {
    fn shared() -> Result<Self> {
        let store = Connect::instance()?;
        Ok(Self {
            executor: store.clone(),
            crud: store,
        })
    }
}

/// One row of `E`'s table, or a query being built against it.
pub struct Record<E: Entity> {
    schema: Arc<Schema>,
    attributes: Option<Attributes>,
    statement: Option<String>,
    order: Option<String>,
    limit: Option<String>,
    offset: Option<String>,
    params: Params,
    fail: Option<DataLayerError>,
    // None means the shared store from `Connect::instance`.
    backend: Option<Backend>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Record<E> {
    /// A transient record using the shared store.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A transient record executing through the given handles.
    pub fn with_store(executor: Arc<dyn Executor>, crud: Arc<dyn Crud>) -> Self {
        Self::build(Some(Backend { executor, crud }))
    }

    fn build(backend: Option<Backend>) -> Self {
        Self {
            schema: Schema::of::<E>(),
            attributes: None,
            statement: None,
            order: None,
            limit: None,
            offset: None,
            params: Params::new(),
            fail: None,
            backend,
            _entity: PhantomData,
        }
    }

    /// A persisted record built from a fetched row, sharing this record's handles.
    fn hydrate(&self, row: Attributes) -> Self {
        let mut record = Self::build(self.backend.clone());
        record.attributes = Some(row);
        record
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Read an attribute; unset names read as [`Value::Null`].
    pub fn get(&self, name: &str) -> &Value {
        self.attributes
            .as_ref()
            .and_then(|attributes| attributes.get(name))
            .unwrap_or(&NULL)
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.attributes
            .get_or_insert_with(Attributes::new)
            .insert(name.to_string(), value.into());
        self
    }

    /// Whether `name` is set to something other than null.
    pub fn has(&self, name: &str) -> bool {
        !self.get(name).is_null()
    }

    /// Current attributes, `None` until the first `set` or fetch.
    pub fn data(&self) -> Option<&Attributes> {
        self.attributes.as_ref()
    }

    /// The failure captured by the last `fetch`/`save` that failed.
    pub fn fail(&self) -> Option<&DataLayerError> {
        self.fail.as_ref()
    }

    /// Whether the primary-key attribute is filled in.
    pub fn is_persisted(&self) -> bool {
        !self.get(&self.schema.primary).is_empty()
    }

    /// Start a statement. `params` is a URL-encoded `key=value&...` string
    /// bound to the named placeholders in `terms`.
    ///
    /// Order, limit and offset set earlier are kept.
    pub fn find(&mut self, terms: Option<&str>, params: Option<&str>, columns: &str) -> &mut Self {
        let params = params.map(Params::parse).unwrap_or_default();
        self.find_with(terms, params, columns)
    }

    /// [`Record::find`] with typed parameters.
    pub fn find_with(&mut self, terms: Option<&str>, params: Params, columns: &str) -> &mut Self {
        match terms.filter(|terms| !terms.is_empty()) {
            Some(terms) => {
                self.statement = Some(format!(
                    "SELECT {columns} FROM {} WHERE {terms}",
                    self.schema.entity
                ));
                self.params = params;
            }
            None => {
                self.statement = Some(format!("SELECT {columns} FROM {}", self.schema.entity));
                self.params = Params::new();
            }
        }
        self
    }

    pub fn find_by_id(&mut self, id: impl Into<Value>, columns: &str) -> Option<Record<E>> {
        let terms = format!("{} = :id", self.schema.primary);
        self.find_with(Some(&terms), Params::new().with_value("id", id), columns)
            .fetch()
    }

    pub fn order(&mut self, column_order: &str) -> &mut Self {
        self.order = Some(format!(" ORDER BY {column_order}"));
        self
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(format!(" LIMIT {limit}"));
        self
    }

    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.offset = Some(format!(" OFFSET {offset}"));
        self
    }

    /// The full SQL `fetch` would run, if `find` was called.
    pub fn statement(&self) -> Option<String> {
        self.statement.as_ref().map(|statement| {
            let mut sql = statement.clone();
            for clause in [&self.order, &self.limit, &self.offset].into_iter().flatten() {
                sql.push_str(clause);
            }
            sql
        })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The first matching row, or `None` if nothing matched or the query failed.
    pub fn fetch(&mut self) -> Option<Record<E>> {
        match self.try_fetch() {
            Ok(rows) => {
                self.fail = None;
                rows.into_iter().next().map(|row| self.hydrate(row))
            }
            Err(err) => {
                self.capture("fetch", err);
                None
            }
        }
    }

    /// Every matching row in order, or `None` if nothing matched or the query failed.
    pub fn fetch_all(&mut self) -> Option<Vec<Record<E>>> {
        match self.try_fetch() {
            Ok(rows) => {
                self.fail = None;
                if rows.is_empty() {
                    return None;
                }
                Some(rows.into_iter().map(|row| self.hydrate(row)).collect())
            }
            Err(err) => {
                self.capture("fetch", err);
                None
            }
        }
    }

    fn try_fetch(&self) -> Result<Vec<Attributes>> {
        let sql = self.statement().ok_or(DataLayerError::NoStatement)?;
        self.backend()?.executor.query(&sql, &self.params)
    }

    /// Number of rows the pending statement matches, ignoring order, limit and offset.
    ///
    /// Errors are returned, not captured.
    pub fn count(&self) -> Result<usize> {
        let statement = self.statement.as_deref().ok_or(DataLayerError::NoStatement)?;
        let sql = format!("SELECT COUNT(*) AS total FROM ({statement})");
        let rows = self.backend()?.executor.query(&sql, &self.params)?;
        let total = rows
            .first()
            .and_then(|row| row.get("total"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(usize::try_from(total).unwrap_or(0))
    }

    /// Insert or update depending on the primary key, then reload the row.
    ///
    /// Returns false on a validation or store failure (see [`Record::fail`]),
    /// or when the store assigned no id.
    pub fn save(&mut self) -> bool {
        match self.try_save() {
            Ok(saved) => saved,
            Err(err) => {
                self.capture("save", err);
                false
            }
        }
    }

    fn try_save(&mut self) -> Result<bool> {
        self.validate_required()?;
        let crud = self.backend()?.crud;
        let columns = self.safe();
        let primary = self.schema.primary.clone();

        let id = if self.is_persisted() {
            let id = self.get(&primary).clone();
            let params = Params::new().with_value("id", id.clone());
            crud.update(&self.schema.entity, &columns, &format!("{primary} = :id"), &params)?;
            Some(id)
        } else {
            crud.create(&self.schema.entity, &columns)?
        };

        let Some(id) = id.filter(|id| !id.is_empty()) else {
            return Ok(false);
        };

        match self.find_by_id(id.clone(), "*") {
            Some(fresh) => {
                self.attributes = fresh.attributes;
                Ok(true)
            }
            None => Err(self.fail.take().unwrap_or_else(|| {
                DataLayerError::NotFound(format!("{} {primary} = {id}", self.schema.entity))
            })),
        }
    }

    /// Delete the row by primary key. False without touching the store if the key is empty.
    ///
    /// Errors are returned, not captured.
    pub fn destroy(&self) -> Result<bool> {
        if !self.is_persisted() {
            return Ok(false);
        }
        let id = self.get(&self.schema.primary).clone();
        let terms = format!("{} = :id", self.schema.primary);
        self.backend()?
            .crud
            .delete(&self.schema.entity, &terms, &Params::new().with_value("id", id))
    }

    fn validate_required(&self) -> Result<()> {
        let missing: Vec<&str> = self
            .schema
            .required
            .iter()
            .filter(|field| self.get(field).is_empty())
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(DataLayerError::validation(format!(
            "required fields missing for {}: {}",
            self.schema.entity,
            missing.join(", ")
        )))
    }

    /// Attributes without the primary key.
    fn safe(&self) -> Attributes {
        let mut safe = self.attributes.clone().unwrap_or_default();
        safe.remove(&self.schema.primary);
        safe
    }

    fn backend(&self) -> Result<Backend> {
        match &self.backend {
            Some(backend) => Ok(backend.clone()),
            None => Backend::shared(),
        }
    }

    fn capture(&mut self, operation: &str, err: DataLayerError) {
        warn!(entity = %self.schema.entity, operation, error = %err, "record operation failed");
        self.fail = Some(err);
    }
}

impl<E: Entity> Default for Record<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> fmt::Debug for Record<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("entity", &self.schema.entity)
            .field("attributes", &self.attributes)
            .field("statement", &self.statement())
            .field("fail", &self.fail)
            .finish()
    }
}
